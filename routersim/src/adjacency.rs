// RouterSim: Simulating Multi-Protocol Routing and Forwarding
// Copyright (C) 2021  Tibor Schneider
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Adjacency state machine
//!
//! The common neighbor FSM shared by all protocol drivers. BGP drives it with Open and
//! Keepalive messages, the link-state protocols with Hellos standing in for both. Transitions
//! are event-driven; the caller owns the clock and pumps [`Adjacency::tick`] for the timers.
//! Every transition returns the actions the driver has to perform (send a message, withdraw the
//! neighbor's routes); the FSM itself never touches the wire or the RIB.

use crate::types::Protocol;
use log::*;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// State of a neighbor adjacency.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum AdjacencyState {
    /// configured but not started
    Idle,
    /// connect in progress
    Connecting,
    /// our Open/Hello is out, waiting for the peer's
    OpenSent,
    /// peer's Open/Hello was valid, waiting for first liveness message
    OpenConfirm,
    /// full adjacency, routes may be exchanged
    Established,
    /// the adjacency broke; restart after backoff
    Failed,
}

/// Events driving the adjacency FSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjacencyEvent {
    /// begin connecting (initial start or retry after backoff)
    Start,
    /// the underlying session came up
    ConnectOk,
    /// the underlying session could not be established
    ConnectFail,
    /// the peer's Open/initial Hello was received; `valid` is the driver's verdict
    OpenRecv {
        /// whether the driver accepted the message
        valid: bool,
    },
    /// a keepalive was received
    KeepaliveRecv,
    /// a hello was received (link-state protocols)
    HelloRecv,
    /// the hold timer fired
    HoldTimerExpired,
    /// the neighbor was stopped administratively
    Stop,
    /// a protocol error occurred on this neighbor
    Error(String),
}

/// Actions requested from the driver by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjacencyAction {
    /// send an Open (or initial Hello) to the peer
    SendOpen,
    /// send a keepalive (or periodic Hello) to the peer
    SendKeepalive,
    /// withdraw all routes learned from this neighbor in one batch
    WithdrawRoutes,
    /// the neighbor just reached Established
    Up,
    /// the neighbor left Established
    Down,
}

/// Upper bound of the exponential reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(64);
/// Timeout for a connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One neighbor and its adjacency state.
#[derive(Debug, Clone)]
pub struct Adjacency {
    /// address of the peer
    peer: IpAddr,
    /// protocol the adjacency belongs to
    protocol: Protocol,
    state: AdjacencyState,
    hold_time: Duration,
    keepalive_interval: Duration,
    last_heard: Instant,
    hold_deadline: Option<Instant>,
    next_keepalive: Option<Instant>,
    connect_deadline: Option<Instant>,
    /// deadline for the peer's Open while in OpenSent
    open_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    backoff: Duration,
    failures: u32,
    capabilities: HashMap<String, String>,
    msgs_sent: u64,
    msgs_received: u64,
    last_error: Option<String>,
}

impl Adjacency {
    /// Create a new adjacency in `Idle`.
    pub fn new(
        peer: IpAddr,
        protocol: Protocol,
        hold_time: Duration,
        keepalive_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            peer,
            protocol,
            state: AdjacencyState::Idle,
            hold_time,
            keepalive_interval,
            last_heard: now,
            hold_deadline: None,
            next_keepalive: None,
            connect_deadline: None,
            open_deadline: None,
            retry_at: None,
            backoff: Duration::from_secs(1),
            failures: 0,
            capabilities: HashMap::new(),
            msgs_sent: 0,
            msgs_received: 0,
            last_error: None,
        }
    }

    /// The peer address.
    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// The protocol of the adjacency.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Current FSM state.
    pub fn state(&self) -> AdjacencyState {
        self.state
    }

    /// True iff the adjacency is fully established.
    pub fn is_established(&self) -> bool {
        self.state == AdjacencyState::Established
    }

    /// The configured hold time.
    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// Timestamp of the last inbound liveness message.
    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Number of connect failures since the last successful establishment.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The last recorded error on this neighbor.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Capability map exchanged at session setup.
    pub fn capabilities(&self) -> &HashMap<String, String> {
        &self.capabilities
    }

    /// Record a capability of the peer.
    pub fn set_capability(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.capabilities.insert(key.into(), value.into());
    }

    /// Messages sent to this peer.
    pub fn msgs_sent(&self) -> u64 {
        self.msgs_sent
    }

    /// Messages received from this peer.
    pub fn msgs_received(&self) -> u64 {
        self.msgs_received
    }

    /// Count one sent message.
    pub fn count_sent(&mut self) {
        self.msgs_sent += 1;
    }

    /// Count one received message.
    pub fn count_received(&mut self) {
        self.msgs_received += 1;
    }

    /// Drive the FSM with one event. Returns the actions the driver must perform.
    pub fn handle(&mut self, event: AdjacencyEvent, now: Instant) -> Vec<AdjacencyAction> {
        use AdjacencyEvent::*;
        use AdjacencyState::*;

        let mut actions = Vec::new();
        let old_state = self.state;

        match (self.state, event) {
            (Idle, Start) | (Failed, Start) => {
                self.state = Connecting;
                self.connect_deadline = Some(now + CONNECT_TIMEOUT);
                self.retry_at = None;
            }
            (Connecting, ConnectOk) => {
                self.state = OpenSent;
                self.connect_deadline = None;
                self.open_deadline = Some(now + self.hold_time);
                actions.push(AdjacencyAction::SendOpen);
            }
            (Connecting, ConnectFail) => {
                self.failures += 1;
                self.schedule_retry(now);
                self.state = Idle;
            }
            (OpenSent, OpenRecv { valid: true }) => {
                self.state = OpenConfirm;
                self.open_deadline = None;
                self.note_heard(now);
                actions.push(AdjacencyAction::SendKeepalive);
            }
            (OpenSent, OpenRecv { valid: false }) => {
                self.fail("invalid open received".to_string(), now);
            }
            (OpenConfirm, KeepaliveRecv) | (OpenConfirm, HelloRecv) => {
                self.state = Established;
                self.note_heard(now);
                self.next_keepalive = Some(now + self.keepalive_interval);
                self.backoff = Duration::from_secs(1);
                self.failures = 0;
                actions.push(AdjacencyAction::Up);
            }
            (Established, KeepaliveRecv) | (Established, HelloRecv) => {
                self.note_heard(now);
            }
            (Established, HoldTimerExpired) => {
                self.fail(format!("hold timer expired after {:?}", self.hold_time), now);
                actions.push(AdjacencyAction::Down);
                actions.push(AdjacencyAction::WithdrawRoutes);
            }
            (Established, Stop) => {
                self.state = Idle;
                self.clear_timers();
                actions.push(AdjacencyAction::Down);
                actions.push(AdjacencyAction::WithdrawRoutes);
            }
            (Established, Error(e)) => {
                self.last_error = Some(e);
                self.state = Idle;
                self.clear_timers();
                actions.push(AdjacencyAction::Down);
                actions.push(AdjacencyAction::WithdrawRoutes);
            }
            (_, Stop) => {
                self.state = Idle;
                self.clear_timers();
            }
            (_, Error(e)) => {
                self.fail(e, now);
            }
            (_, HoldTimerExpired) => {
                self.fail("hold timer expired outside established".to_string(), now);
            }
            (state, event) => {
                trace!("{} {}: ignoring {:?} in {:?}", self.protocol, self.peer, event, state);
            }
        }

        if old_state != self.state {
            debug!(
                "{} neighbor {}: {:?} -> {:?}",
                self.protocol, self.peer, old_state, self.state
            );
        }
        actions
    }

    /// Pump the timers. Produces keepalives while established, fails the adjacency one hold
    /// time after the last liveness message, times out connects and half-open sessions, and
    /// restarts a failed neighbor once the backoff elapsed.
    pub fn tick(&mut self, now: Instant) -> Vec<AdjacencyAction> {
        let mut actions = Vec::new();

        if let Some(deadline) = self.open_deadline {
            if now >= deadline && self.state == AdjacencyState::OpenSent {
                self.fail("open timer expired while waiting for the peer".to_string(), now);
                return actions;
            }
        }

        if let Some(deadline) = self.hold_deadline {
            let armed = matches!(
                self.state,
                AdjacencyState::Established | AdjacencyState::OpenConfirm
            );
            if now >= deadline && armed {
                actions.extend(self.handle(AdjacencyEvent::HoldTimerExpired, now));
                return actions;
            }
        }

        match self.state {
            AdjacencyState::Established => {
                if let Some(next) = self.next_keepalive {
                    if now >= next {
                        self.next_keepalive = Some(now + self.keepalive_interval);
                        actions.push(AdjacencyAction::SendKeepalive);
                    }
                }
            }
            AdjacencyState::Connecting => {
                if let Some(deadline) = self.connect_deadline {
                    if now >= deadline {
                        actions.extend(self.handle(AdjacencyEvent::ConnectFail, now));
                    }
                }
            }
            AdjacencyState::Idle | AdjacencyState::Failed => {
                if let Some(retry) = self.retry_at {
                    if now >= retry {
                        self.retry_at = None;
                        actions.extend(self.handle(AdjacencyEvent::Start, now));
                    }
                }
            }
            _ => {}
        }

        actions
    }

    /// The earliest deadline the caller has to wake this adjacency up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.hold_deadline,
            self.next_keepalive,
            self.connect_deadline,
            self.open_deadline,
            self.retry_at,
        ]
        .iter()
        .flatten()
        .min()
        .copied()
    }

    fn note_heard(&mut self, now: Instant) {
        self.last_heard = now;
        self.hold_deadline = Some(now + self.hold_time);
    }

    fn fail(&mut self, error: String, now: Instant) {
        warn!("{} neighbor {} failed: {}", self.protocol, self.peer, error);
        self.last_error = Some(error);
        self.state = AdjacencyState::Failed;
        self.failures += 1;
        self.clear_timers();
        self.schedule_retry(now);
    }

    fn schedule_retry(&mut self, now: Instant) {
        self.retry_at = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
    }

    fn clear_timers(&mut self) {
        self.hold_deadline = None;
        self.next_keepalive = None;
        self.connect_deadline = None;
        self.open_deadline = None;
    }
}
