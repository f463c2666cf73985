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

use crate::adjacency::{Adjacency, AdjacencyAction, AdjacencyEvent, AdjacencyState};
use crate::types::Protocol;
use std::time::{Duration, Instant};

fn adjacency(now: Instant) -> Adjacency {
    Adjacency::new(
        "10.0.0.2".parse().unwrap(),
        Protocol::Bgp,
        Duration::from_secs(90),
        Duration::from_secs(30),
        now,
    )
}

#[test]
fn happy_path_reaches_established() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    assert_eq!(adj.state(), AdjacencyState::Idle);

    assert!(adj.handle(AdjacencyEvent::Start, t0).is_empty());
    assert_eq!(adj.state(), AdjacencyState::Connecting);

    let actions = adj.handle(AdjacencyEvent::ConnectOk, t0);
    assert_eq!(actions, vec![AdjacencyAction::SendOpen]);
    assert_eq!(adj.state(), AdjacencyState::OpenSent);

    let actions = adj.handle(AdjacencyEvent::OpenRecv { valid: true }, t0);
    assert_eq!(actions, vec![AdjacencyAction::SendKeepalive]);
    assert_eq!(adj.state(), AdjacencyState::OpenConfirm);

    let actions = adj.handle(AdjacencyEvent::KeepaliveRecv, t0);
    assert_eq!(actions, vec![AdjacencyAction::Up]);
    assert!(adj.is_established());
}

#[test]
fn stuck_open_sent_times_out() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    assert_eq!(adj.state(), AdjacencyState::OpenSent);

    // the peer never answers our open; one hold time later the session fails
    assert!(adj.tick(t0 + Duration::from_secs(89)).is_empty());
    assert_eq!(adj.state(), AdjacencyState::OpenSent);
    adj.tick(t0 + Duration::from_secs(91));
    assert_eq!(adj.state(), AdjacencyState::Failed);
    assert!(adj.last_error().unwrap().contains("open timer expired"));
}

#[test]
fn stuck_open_confirm_times_out() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::OpenRecv { valid: true }, t0);
    assert_eq!(adj.state(), AdjacencyState::OpenConfirm);

    // the first keepalive never arrives; the hold timer kills the half-open session
    assert!(adj.tick(t0 + Duration::from_secs(89)).is_empty());
    assert_eq!(adj.state(), AdjacencyState::OpenConfirm);
    adj.tick(t0 + Duration::from_secs(91));
    assert_eq!(adj.state(), AdjacencyState::Failed);
    assert!(adj.last_error().is_some());
}

#[test]
fn invalid_open_fails_the_neighbor() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::OpenRecv { valid: false }, t0);
    assert_eq!(adj.state(), AdjacencyState::Failed);
    assert!(adj.last_error().is_some());
}

#[test]
fn hold_timer_expiry_fails_and_withdraws() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::OpenRecv { valid: true }, t0);
    adj.handle(AdjacencyEvent::KeepaliveRecv, t0);
    assert!(adj.is_established());

    // liveness just before the deadline keeps the session up
    let t1 = t0 + Duration::from_secs(89);
    assert!(adj.tick(t1).iter().all(|a| a != &AdjacencyAction::WithdrawRoutes));
    adj.handle(AdjacencyEvent::KeepaliveRecv, t1);

    // one full hold time of silence kills it
    let t2 = t1 + Duration::from_secs(91);
    let actions = adj.tick(t2);
    assert!(actions.contains(&AdjacencyAction::Down));
    assert!(actions.contains(&AdjacencyAction::WithdrawRoutes));
    assert_eq!(adj.state(), AdjacencyState::Failed);
}

#[test]
fn established_emits_periodic_keepalives() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::OpenRecv { valid: true }, t0);
    adj.handle(AdjacencyEvent::KeepaliveRecv, t0);

    assert!(adj.tick(t0 + Duration::from_secs(29)).is_empty());
    let actions = adj.tick(t0 + Duration::from_secs(31));
    assert_eq!(actions, vec![AdjacencyAction::SendKeepalive]);
    // and again one interval later
    let actions = adj.tick(t0 + Duration::from_secs(62));
    assert_eq!(actions, vec![AdjacencyAction::SendKeepalive]);
}

#[test]
fn stop_withdraws_and_goes_idle() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::OpenRecv { valid: true }, t0);
    adj.handle(AdjacencyEvent::KeepaliveRecv, t0);

    let actions = adj.handle(AdjacencyEvent::Stop, t0);
    assert!(actions.contains(&AdjacencyAction::WithdrawRoutes));
    assert_eq!(adj.state(), AdjacencyState::Idle);
}

#[test]
fn failed_neighbor_retries_after_backoff() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.handle(AdjacencyEvent::Start, t0);
    adj.handle(AdjacencyEvent::ConnectOk, t0);
    adj.handle(AdjacencyEvent::Error("notification".to_string()), t0);
    assert_eq!(adj.state(), AdjacencyState::Failed);
    assert_eq!(adj.failures(), 1);

    // nothing happens before the backoff elapsed
    assert!(adj.tick(t0 + Duration::from_millis(500)).is_empty());
    assert_eq!(adj.state(), AdjacencyState::Failed);

    adj.tick(t0 + Duration::from_millis(1100));
    assert_eq!(adj.state(), AdjacencyState::Connecting);
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    let mut now = t0;
    // repeated connect failures double the backoff: 1, 2, 4, ... capped at 64 seconds
    for _ in 0..10 {
        adj.handle(AdjacencyEvent::Start, now);
        adj.handle(AdjacencyEvent::ConnectFail, now);
        now += Duration::from_secs(128);
        adj.tick(now);
    }
    adj.handle(AdjacencyEvent::Start, now);
    adj.handle(AdjacencyEvent::ConnectFail, now);
    // 65 seconds later the retry must have fired (the cap is 64s)
    let later = now + Duration::from_secs(65);
    adj.tick(later);
    assert_eq!(adj.state(), AdjacencyState::Connecting);
    assert!(adj.failures() > 10);
}

#[test]
fn counters_and_capabilities_are_tracked() {
    let t0 = Instant::now();
    let mut adj = adjacency(t0);
    adj.count_sent();
    adj.count_sent();
    adj.count_received();
    adj.set_capability("multiprotocol", "ipv4");
    assert_eq!(adj.msgs_sent(), 2);
    assert_eq!(adj.msgs_received(), 1);
    assert_eq!(adj.capabilities().get("multiprotocol").map(|s| s.as_str()), Some("ipv4"));
}
