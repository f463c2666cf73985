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

//! # OSPF driver
//!
//! Hello exchange drives the adjacency FSM; every router originates one LSA describing its
//! links and its advertised prefixes into the per-area link-state database. A database change
//! schedules an SPF run, coalesced over a short dampening window to avoid churn. The SPF result
//! is diffed against the previous one and handed to the merger as a batch.

use super::{
    shortest_paths, MessageSender, NeighborSummary, OutboundMessage, ProtocolDriver, Reader,
    RouteSender, Writer,
};
use crate::adjacency::{Adjacency, AdjacencyAction, AdjacencyEvent, AdjacencyState};
use crate::config::OspfConfig;
use crate::metrics::Metrics;
use crate::rib::{RouteAction, RouteUpdate};
use crate::types::{InterfaceId, Prefix, Protocol, Route, RouteAttrs, RouterId};
use crate::Error;
use log::*;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// SPF dampening window: triggers within this window coalesce into one run.
pub(crate) const SPF_HOLD: Duration = Duration::from_millis(200);
/// An LSA older than this is purged from the database.
const MAX_AGE: Duration = Duration::from_secs(3600);

/// One link-state advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct Lsa {
    /// originating router
    pub origin: RouterId,
    /// sequence number; higher wins
    pub seq: u32,
    /// links of the originator: (neighbor router, cost)
    pub links: Vec<(RouterId, u32)>,
    /// prefixes advertised by the originator: (prefix, cost)
    pub prefixes: Vec<(Prefix, u32)>,
}

/// Wire messages of the simulated OSPF session.
#[derive(Debug, Clone, PartialEq)]
pub enum OspfMessage {
    /// periodic hello; `seen` lists the router ids heard on the link
    Hello {
        /// originating router
        router_id: RouterId,
        /// area of the sender
        area: u32,
        /// router ids the sender has heard from
        seen: Vec<RouterId>,
    },
    /// flooded link-state advertisements
    LsUpdate(Vec<Lsa>),
}

impl OspfMessage {
    /// Encode the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::Hello { router_id, area, seen } => {
                w.u8(1).u32(router_id.0).u32(*area).u16(seen.len() as u16);
                for r in seen {
                    w.u32(r.0);
                }
            }
            Self::LsUpdate(lsas) => {
                w.u8(2).u16(lsas.len() as u16);
                for lsa in lsas {
                    w.u32(lsa.origin.0).u32(lsa.seq);
                    w.u16(lsa.links.len() as u16);
                    for (nbr, cost) in &lsa.links {
                        w.u32(nbr.0).u32(*cost);
                    }
                    w.u16(lsa.prefixes.len() as u16);
                    for (prefix, cost) in &lsa.prefixes {
                        w.prefix(prefix).u32(*cost);
                    }
                }
            }
        }
        w.finish()
    }

    /// Decode a message; anything truncated or unknown is [`Error::MalformedMessage`].
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let msg = match r.u8()? {
            1 => {
                let router_id = RouterId(r.u32()?);
                let area = r.u32()?;
                let n = r.u16()? as usize;
                let mut seen = Vec::with_capacity(n);
                for _ in 0..n {
                    seen.push(RouterId(r.u32()?));
                }
                Self::Hello { router_id, area, seen }
            }
            2 => {
                let n = r.u16()? as usize;
                let mut lsas = Vec::with_capacity(n);
                for _ in 0..n {
                    let origin = RouterId(r.u32()?);
                    let seq = r.u32()?;
                    let n_links = r.u16()? as usize;
                    let mut links = Vec::with_capacity(n_links);
                    for _ in 0..n_links {
                        links.push((RouterId(r.u32()?), r.u32()?));
                    }
                    let n_prefixes = r.u16()? as usize;
                    let mut prefixes = Vec::with_capacity(n_prefixes);
                    for _ in 0..n_prefixes {
                        prefixes.push((r.prefix()?, r.u32()?));
                    }
                    lsas.push(Lsa { origin, seq, links, prefixes });
                }
                Self::LsUpdate(lsas)
            }
            _ => return Err(Error::MalformedMessage("unknown ospf message type")),
        };
        if !r.is_empty() {
            return Err(Error::MalformedMessage("trailing bytes after ospf message"));
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
struct NeighborCfg {
    iface: InterfaceId,
    cost: u32,
}

/// The OSPF protocol driver.
pub struct OspfDriver {
    router_id: RouterId,
    area: u32,
    hello_interval: Duration,
    /// next periodic hello emission; hellos flow in every non-idle state, two-way detection
    /// depends on them
    next_hello: Instant,
    neighbors: HashMap<IpAddr, NeighborCfg>,
    adjacencies: HashMap<IpAddr, Adjacency>,
    /// router ids learned from hellos, per peer address
    peer_ids: HashMap<IpAddr, RouterId>,
    /// link-state database of the area, with the age reference of each LSA
    lsdb: HashMap<RouterId, (Lsa, Instant)>,
    /// prefixes this router advertises into the area
    local_prefixes: HashMap<Prefix, u32>,
    /// sequence number of the own LSA
    seq: u32,
    /// pending SPF run, dampened
    spf_at: Option<Instant>,
    /// routes currently handed to the merger
    installed: HashMap<Prefix, Route>,
    routes_out: RouteSender,
    messages_out: MessageSender,
    metrics: Arc<Metrics>,
    running: bool,
}

impl std::fmt::Debug for OspfDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OspfDriver")
            .field("router_id", &self.router_id)
            .field("area", &self.area)
            .field("lsdb", &self.lsdb.len())
            .finish()
    }
}

impl OspfDriver {
    /// Build a driver from its configuration section.
    pub fn new(
        config: &OspfConfig,
        router_id: u32,
        routes_out: RouteSender,
        messages_out: MessageSender,
        metrics: Arc<Metrics>,
        now: Instant,
    ) -> Self {
        let hello_interval = Duration::from_secs(config.hello_interval);
        let dead_interval = Duration::from_secs(config.dead_interval);
        let mut neighbors = HashMap::new();
        let mut adjacencies = HashMap::new();
        for n in config.neighbors.iter() {
            neighbors
                .insert(n.peer, NeighborCfg { iface: InterfaceId(n.iface), cost: n.cost });
            adjacencies.insert(
                n.peer,
                Adjacency::new(n.peer, Protocol::Ospf, dead_interval, hello_interval, now),
            );
        }
        Self {
            router_id: RouterId(router_id),
            area: config.area,
            hello_interval,
            next_hello: now,
            neighbors,
            adjacencies,
            peer_ids: HashMap::new(),
            lsdb: HashMap::new(),
            local_prefixes: HashMap::new(),
            seq: 0,
            spf_at: None,
            installed: HashMap::new(),
            routes_out,
            messages_out,
            metrics,
            running: false,
        }
    }

    fn send(&mut self, peer: IpAddr, msg: &OspfMessage) {
        let out = OutboundMessage { protocol: Protocol::Ospf, peer, bytes: msg.encode() };
        if self.messages_out.try_send(out).is_err() {
            warn!("ospf: dropping outbound message to {} (channel full)", peer);
        }
        if let Some(adj) = self.adjacencies.get_mut(&peer) {
            adj.count_sent();
        }
    }

    fn hello(&self) -> OspfMessage {
        OspfMessage::Hello {
            router_id: self.router_id,
            area: self.area,
            seen: self.peer_ids.values().copied().collect(),
        }
    }

    /// Originate (or refresh) the own LSA and flood it.
    fn originate_lsa(&mut self, now: Instant) {
        self.seq += 1;
        let links = self
            .adjacencies
            .iter()
            .filter(|(_, a)| a.is_established())
            .filter_map(|(peer, _)| {
                let id = self.peer_ids.get(peer)?;
                let cost = self.neighbors.get(peer)?.cost;
                Some((*id, cost))
            })
            .collect();
        let lsa = Lsa {
            origin: self.router_id,
            seq: self.seq,
            links,
            prefixes: self.local_prefixes.iter().map(|(p, c)| (*p, *c)).collect(),
        };
        self.lsdb.insert(self.router_id, (lsa.clone(), now));
        self.flood(vec![lsa], None);
        self.schedule_spf(now);
    }

    /// Flood LSAs to all established neighbors except the one they came from.
    fn flood(&mut self, lsas: Vec<Lsa>, except: Option<IpAddr>) {
        let peers: Vec<IpAddr> = self
            .adjacencies
            .iter()
            .filter(|(peer, a)| a.is_established() && Some(**peer) != except)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in peers {
            self.send(peer, &OspfMessage::LsUpdate(lsas.clone()));
        }
    }

    fn schedule_spf(&mut self, now: Instant) {
        let at = now + SPF_HOLD;
        self.spf_at = Some(self.spf_at.map_or(at, |t| t.min(at)));
    }

    /// Run SPF over the database and synchronize the merger with the result.
    fn run_spf(&mut self, now: Instant) {
        self.spf_at = None;
        let mut links = Vec::new();
        for (lsa, _) in self.lsdb.values() {
            for (nbr, cost) in &lsa.links {
                links.push((lsa.origin, *nbr, *cost));
            }
        }
        let paths = shortest_paths(&links, self.router_id);
        trace!("ospf: spf over {} links reached {} routers", links.len(), paths.len());

        // map first-hop router ids back to (peer address, interface)
        let next_hops: HashMap<RouterId, (IpAddr, InterfaceId)> = self
            .peer_ids
            .iter()
            .filter_map(|(peer, id)| {
                let cfg = self.neighbors.get(peer)?;
                Some((*id, (*peer, cfg.iface)))
            })
            .collect();

        let mut new_routes: HashMap<Prefix, Route> = HashMap::new();
        for (lsa, _) in self.lsdb.values() {
            if lsa.origin == self.router_id {
                continue;
            }
            let (first_hop, cost) = match paths.get(&lsa.origin) {
                Some(x) => *x,
                None => continue,
            };
            let (next_hop, iface) = match next_hops.get(&first_hop) {
                Some(x) => *x,
                None => continue,
            };
            for (prefix, prefix_cost) in &lsa.prefixes {
                let total = cost as u32 + prefix_cost;
                let better = new_routes.get(prefix).map_or(true, |r| total < r.metric);
                if better {
                    let mut route =
                        Route::new(*prefix, next_hop, iface, total, Protocol::Ospf);
                    route.last_updated = now;
                    route.attrs = RouteAttrs::Ospf { area: self.area };
                    new_routes.insert(*prefix, route);
                }
            }
        }

        // withdraw what disappeared, install what changed
        let gone: Vec<Prefix> =
            self.installed.keys().filter(|p| !new_routes.contains_key(p)).copied().collect();
        for prefix in gone {
            if let Some(route) = self.installed.remove(&prefix) {
                let _ = self.routes_out.send(RouteUpdate { route, action: RouteAction::Withdraw });
            }
        }
        for (prefix, route) in new_routes {
            let changed = self.installed.get(&prefix).map_or(true, |r| r != &route);
            if changed {
                self.installed.insert(prefix, route.clone());
                let _ = self.routes_out.send(RouteUpdate { route, action: RouteAction::Add });
            }
        }
    }

    /// Age the database; purge LSAs past max age.
    fn age_lsdb(&mut self, now: Instant) {
        let before = self.lsdb.len();
        let own = self.router_id;
        self.lsdb.retain(|origin, (_, born)| {
            *origin == own || now.saturating_duration_since(*born) < MAX_AGE
        });
        if self.lsdb.len() != before {
            debug!("ospf: purged {} aged LSAs", before - self.lsdb.len());
            self.schedule_spf(now);
        }
    }

    fn process_actions(&mut self, peer: IpAddr, actions: Vec<AdjacencyAction>, now: Instant) {
        for action in actions {
            match action {
                AdjacencyAction::SendOpen | AdjacencyAction::SendKeepalive => {
                    let msg = self.hello();
                    self.send(peer, &msg);
                }
                AdjacencyAction::Up => {
                    self.metrics.neighbor_established(Protocol::Ospf, true);
                    // full adjacency: re-describe our links and give the peer our database view
                    self.originate_lsa(now);
                    let lsas: Vec<Lsa> =
                        self.lsdb.values().map(|(lsa, _)| lsa.clone()).collect();
                    if !lsas.is_empty() {
                        self.send(peer, &OspfMessage::LsUpdate(lsas));
                    }
                }
                AdjacencyAction::Down => {
                    self.metrics.neighbor_established(Protocol::Ospf, false);
                }
                AdjacencyAction::WithdrawRoutes => {
                    // the neighbor is gone: our own links changed, SPF handles the rest
                    self.originate_lsa(now);
                }
            }
        }
    }

    fn handle_hello(&mut self, from: IpAddr, router_id: RouterId, area: u32, seen: Vec<RouterId>, now: Instant) {
        if area != self.area {
            debug!("ospf: hello from {} in foreign area {}", from, area);
            self.metrics.message_error(Protocol::Ospf);
            return;
        }
        self.peer_ids.insert(from, router_id);
        let two_way = seen.contains(&self.router_id);
        let state = match self.adjacencies.get(&from) {
            Some(adj) => adj.state(),
            None => return,
        };
        let event = match state {
            AdjacencyState::OpenSent if two_way => Some(AdjacencyEvent::OpenRecv { valid: true }),
            AdjacencyState::OpenConfirm | AdjacencyState::Established => {
                Some(AdjacencyEvent::HelloRecv)
            }
            _ => None,
        };
        if let Some(event) = event {
            let actions = match self.adjacencies.get_mut(&from) {
                Some(adj) => adj.handle(event, now),
                None => return,
            };
            self.process_actions(from, actions, now);
        }
    }

    fn handle_ls_update(&mut self, from: IpAddr, lsas: Vec<Lsa>, now: Instant) {
        let mut fresh = Vec::new();
        for lsa in lsas {
            if lsa.origin == self.router_id {
                // a stale copy of our own LSA is circulating; out-sequence it
                if lsa.seq >= self.seq {
                    self.seq = lsa.seq;
                    self.originate_lsa(now);
                }
                continue;
            }
            let newer = self.lsdb.get(&lsa.origin).map_or(true, |(old, _)| lsa.seq > old.seq);
            if newer {
                self.lsdb.insert(lsa.origin, (lsa.clone(), now));
                fresh.push(lsa);
            }
        }
        if !fresh.is_empty() {
            self.flood(fresh, Some(from));
            self.schedule_spf(now);
        }
    }
}

impl ProtocolDriver for OspfDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Ospf
    }

    fn start(&mut self, now: Instant) {
        self.running = true;
        info!(
            "ospf: starting in area {} with {} configured neighbors",
            self.area,
            self.adjacencies.len()
        );
        let peers: Vec<IpAddr> = self.adjacencies.keys().copied().collect();
        for peer in peers {
            let actions = match self.adjacencies.get_mut(&peer) {
                Some(adj) => adj.handle(AdjacencyEvent::Start, now),
                None => continue,
            };
            self.process_actions(peer, actions, now);
        }
    }

    fn stop(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.running = false;
        let peers: Vec<IpAddr> = self.adjacencies.keys().copied().collect();
        for peer in peers {
            let actions = match self.adjacencies.get_mut(&peer) {
                Some(adj) => adj.handle(AdjacencyEvent::Stop, now),
                None => continue,
            };
            self.process_actions(peer, actions, now);
        }
        // withdraw everything we handed to the merger, in one batch
        for (_, route) in self.installed.drain() {
            let _ = self.routes_out.send(RouteUpdate { route, action: RouteAction::Withdraw });
        }
    }

    fn advertise(&mut self, route: Route, now: Instant) -> Result<(), Error> {
        self.local_prefixes.insert(route.prefix, route.metric);
        if self.running {
            self.originate_lsa(now);
        }
        Ok(())
    }

    fn withdraw(&mut self, prefix: Prefix, now: Instant) -> Result<(), Error> {
        if self.local_prefixes.remove(&prefix).is_some() && self.running {
            self.originate_lsa(now);
        }
        Ok(())
    }

    fn handle_message(&mut self, from: IpAddr, bytes: &[u8], now: Instant) {
        if !self.neighbors.contains_key(&from) {
            debug!("ospf: message from unconfigured peer {}", from);
            self.metrics.message_error(Protocol::Ospf);
            return;
        }
        let msg = match OspfMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("ospf: discarding message from {}: {}", from, e);
                self.metrics.message_error(Protocol::Ospf);
                return;
            }
        };
        if let Some(adj) = self.adjacencies.get_mut(&from) {
            adj.count_received();
        }
        match msg {
            OspfMessage::Hello { router_id, area, seen } => {
                self.handle_hello(from, router_id, area, seen, now)
            }
            OspfMessage::LsUpdate(lsas) => {
                // flooding proves liveness as well
                if let Some(adj) = self.adjacencies.get_mut(&from) {
                    if adj.is_established() {
                        adj.handle(AdjacencyEvent::HelloRecv, now);
                    }
                }
                self.handle_ls_update(from, lsas, now)
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        if now >= self.next_hello {
            self.next_hello = now + self.hello_interval;
            let peers: Vec<IpAddr> = self
                .adjacencies
                .iter()
                .filter(|(_, a)| a.state() != AdjacencyState::Idle)
                .map(|(peer, _)| *peer)
                .collect();
            for peer in peers {
                let msg = self.hello();
                self.send(peer, &msg);
            }
        }
        let peers: Vec<IpAddr> = self.adjacencies.keys().copied().collect();
        for peer in peers {
            let connect = self
                .adjacencies
                .get(&peer)
                .map_or(false, |a| a.state() == AdjacencyState::Connecting);
            if connect {
                let actions = match self.adjacencies.get_mut(&peer) {
                    Some(adj) => adj.handle(AdjacencyEvent::ConnectOk, now),
                    None => continue,
                };
                self.process_actions(peer, actions, now);
            }
            let actions = match self.adjacencies.get_mut(&peer) {
                Some(adj) => adj.tick(now),
                None => continue,
            };
            self.process_actions(peer, actions, now);
        }
        self.age_lsdb(now);
        if self.spf_at.map_or(false, |t| now >= t) {
            self.run_spf(now);
        }
    }

    fn neighbors(&self) -> Vec<NeighborSummary> {
        self.adjacencies
            .values()
            .map(|a| NeighborSummary {
                peer: a.peer(),
                protocol: Protocol::Ospf,
                state: a.state(),
                msgs_sent: a.msgs_sent(),
                msgs_received: a.msgs_received(),
                last_error: a.last_error().map(|s| s.to_string()),
            })
            .collect()
    }
}
