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

//! # BGP driver
//!
//! Per-neighbor sessions over a TCP-like transport abstraction, each with its own adjacency
//! FSM. Learned routes go through the canonical decision ladder; only the BGP-local best route
//! per prefix is handed to the merger, and re-advertised to the other established peers.

use super::{MessageSender, NeighborSummary, OutboundMessage, ProtocolDriver, Reader, RouteSender, Writer};
use crate::adjacency::{Adjacency, AdjacencyAction, AdjacencyEvent, AdjacencyState};
use crate::config::{BgpConfig, BgpNeighborConfig};
use crate::metrics::Metrics;
use crate::rib::{RouteAction, RouteUpdate};
use crate::types::{AsId, BgpOrigin, BgpPathAttrs, InterfaceId, Prefix, Protocol, Route, RouteAttrs};
use crate::Error;
use log::*;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// BGP protocol version sent in Open messages.
const BGP_VERSION: u8 = 4;

/// A BGP route as held in the driver-local tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpRoute {
    /// destination prefix
    pub prefix: Prefix,
    /// NEXT-HOP attribute
    pub next_hop: IpAddr,
    /// AS-PATH, origin AS last
    pub as_path: Vec<AsId>,
    /// ORIGIN attribute
    pub origin: BgpOrigin,
    /// LOCAL-PREF (defaulted to 100 on ingress)
    pub local_pref: u32,
    /// Multi-Exit Discriminator
    pub med: u32,
}

/// One entry of the per-neighbor Adj-RIB-In, with the bookkeeping the decision ladder needs.
#[derive(Debug, Clone, PartialEq)]
struct BgpRibEntry {
    route: BgpRoute,
    /// neighbor the route was learned from
    from: IpAddr,
    /// router id the neighbor announced in its Open
    router_id: u32,
    /// whether the session to that neighbor is eBGP
    from_ebgp: bool,
    /// IGP cost to the next hop (simulated: the configured neighbor link cost)
    igp_cost: u32,
    /// egress interface towards the neighbor
    iface: InterfaceId,
}

impl BgpRibEntry {
    /// The canonical decision ladder: highest local-pref, shortest AS-path, lowest origin,
    /// lowest MED, eBGP over iBGP, lowest IGP cost to the next hop, lowest router id as the
    /// tie-break (the neighbor address decides between parallel sessions to one router).
    /// `Greater` means `self` is preferred.
    fn compare(&self, other: &Self) -> Ordering {
        match self.route.local_pref.cmp(&other.route.local_pref) {
            Ordering::Equal => {}
            o => return o,
        }
        match self.route.as_path.len().cmp(&other.route.as_path.len()) {
            Ordering::Equal => {}
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
        }
        match self.route.origin.cmp(&other.route.origin) {
            Ordering::Equal => {}
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
        }
        match self.route.med.cmp(&other.route.med) {
            Ordering::Equal => {}
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
        }
        match (self.from_ebgp, other.from_ebgp) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }
        match self.igp_cost.cmp(&other.igp_cost) {
            Ordering::Equal => {}
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
        }
        match self.router_id.cmp(&other.router_id) {
            Ordering::Equal => {}
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
        }
        match self.from.cmp(&other.from) {
            Ordering::Equal => Ordering::Equal,
            Ordering::Greater => Ordering::Less,
            Ordering::Less => Ordering::Greater,
        }
    }
}

/// Wire messages of the simulated BGP session.
#[derive(Debug, Clone, PartialEq)]
pub enum BgpMessage {
    /// session open
    Open {
        /// protocol version (always 4)
        version: u8,
        /// AS of the sender
        as_id: AsId,
        /// router id of the sender
        router_id: u32,
        /// proposed hold time in seconds
        hold_time: u16,
    },
    /// session liveness
    Keepalive,
    /// route advertisement and withdrawal
    Update {
        /// withdrawn prefixes
        withdrawn: Vec<Prefix>,
        /// announced routes
        announced: Vec<BgpRoute>,
    },
    /// session termination with an error code (2 = cease)
    Notification {
        /// error code
        code: u8,
    },
}

impl BgpMessage {
    /// Encode the message into the compact session codec.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::Open { version, as_id, router_id, hold_time } => {
                w.u8(1).u8(*version).u32(as_id.0).u32(*router_id).u16(*hold_time);
            }
            Self::Keepalive => {
                w.u8(2);
            }
            Self::Update { withdrawn, announced } => {
                w.u8(3).u16(withdrawn.len() as u16).u16(announced.len() as u16);
                for p in withdrawn {
                    w.prefix(p);
                }
                for r in announced {
                    w.prefix(&r.prefix).addr(r.next_hop);
                    w.u8(match r.origin {
                        BgpOrigin::Igp => 0,
                        BgpOrigin::Egp => 1,
                        BgpOrigin::Incomplete => 2,
                    });
                    w.u32(r.local_pref).u32(r.med).u16(r.as_path.len() as u16);
                    for as_id in &r.as_path {
                        w.u32(as_id.0);
                    }
                }
            }
            Self::Notification { code } => {
                w.u8(4).u8(*code);
            }
        }
        w.finish()
    }

    /// Decode a message. Fails with [`Error::MalformedMessage`] on anything truncated or
    /// unknown.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let msg = match r.u8()? {
            1 => Self::Open {
                version: r.u8()?,
                as_id: AsId(r.u32()?),
                router_id: r.u32()?,
                hold_time: r.u16()?,
            },
            2 => Self::Keepalive,
            3 => {
                let n_withdrawn = r.u16()? as usize;
                let n_announced = r.u16()? as usize;
                let mut withdrawn = Vec::with_capacity(n_withdrawn);
                for _ in 0..n_withdrawn {
                    withdrawn.push(r.prefix()?);
                }
                let mut announced = Vec::with_capacity(n_announced);
                for _ in 0..n_announced {
                    let prefix = r.prefix()?;
                    let next_hop = r.addr()?;
                    let origin = match r.u8()? {
                        0 => BgpOrigin::Igp,
                        1 => BgpOrigin::Egp,
                        2 => BgpOrigin::Incomplete,
                        _ => return Err(Error::MalformedMessage("unknown origin code")),
                    };
                    let local_pref = r.u32()?;
                    let med = r.u32()?;
                    let path_len = r.u16()? as usize;
                    let mut as_path = Vec::with_capacity(path_len);
                    for _ in 0..path_len {
                        as_path.push(AsId(r.u32()?));
                    }
                    announced.push(BgpRoute { prefix, next_hop, as_path, origin, local_pref, med });
                }
                Self::Update { withdrawn, announced }
            }
            4 => Self::Notification { code: r.u8()? },
            _ => return Err(Error::MalformedMessage("unknown bgp message type")),
        };
        if !r.is_empty() {
            return Err(Error::MalformedMessage("trailing bytes after bgp message"));
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
struct NeighborCfg {
    remote_as: AsId,
    iface: InterfaceId,
    local_pref: Option<u32>,
    export_deny: HashSet<Prefix>,
    /// link cost towards the neighbor, used as the IGP cost of the decision ladder
    igp_cost: u32,
}

/// The BGP protocol driver.
pub struct BgpDriver {
    local_as: AsId,
    router_id: u32,
    local_addr: IpAddr,
    hold_time: Duration,
    neighbors: HashMap<IpAddr, NeighborCfg>,
    adjacencies: HashMap<IpAddr, Adjacency>,
    /// router ids learned from the peers' Open messages
    peer_router_ids: HashMap<IpAddr, u32>,
    rib_in: HashMap<IpAddr, HashMap<Prefix, BgpRibEntry>>,
    /// the BGP-local best route per prefix; only these reach the merger
    best: HashMap<Prefix, BgpRibEntry>,
    /// locally originated routes, advertised to all established peers
    local_routes: HashMap<Prefix, BgpRoute>,
    routes_out: RouteSender,
    messages_out: MessageSender,
    metrics: Arc<Metrics>,
    running: bool,
}

impl std::fmt::Debug for BgpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgpDriver")
            .field("local_as", &self.local_as)
            .field("neighbors", &self.neighbors.len())
            .field("best_routes", &self.best.len())
            .finish()
    }
}

impl BgpDriver {
    /// Build a driver from its configuration section. `local_addr` is the address the router
    /// writes into the NEXT-HOP of eBGP advertisements.
    pub fn new(
        config: &BgpConfig,
        local_as: u32,
        router_id: u32,
        local_addr: IpAddr,
        routes_out: RouteSender,
        messages_out: MessageSender,
        metrics: Arc<Metrics>,
        now: Instant,
    ) -> Result<Self, Error> {
        let hold_time = Duration::from_secs(config.hold_time);
        let keepalive_interval = Duration::from_secs(config.keepalive_interval);
        let mut neighbors = HashMap::new();
        let mut adjacencies = HashMap::new();
        for n in config.neighbors.iter() {
            neighbors.insert(n.peer, NeighborCfg::parse(n)?);
            adjacencies.insert(
                n.peer,
                Adjacency::new(n.peer, Protocol::Bgp, hold_time, keepalive_interval, now),
            );
        }
        Ok(Self {
            local_as: AsId(local_as),
            router_id,
            local_addr,
            hold_time,
            neighbors,
            adjacencies,
            peer_router_ids: HashMap::new(),
            rib_in: HashMap::new(),
            best: HashMap::new(),
            local_routes: HashMap::new(),
            routes_out,
            messages_out,
            metrics,
            running: false,
        })
    }

    /// Whether the session to `peer` is eBGP.
    fn is_ebgp(&self, peer: IpAddr) -> bool {
        self.neighbors.get(&peer).map_or(false, |n| n.remote_as != self.local_as)
    }

    fn send(&self, peer: IpAddr, msg: &BgpMessage) {
        let out = OutboundMessage { protocol: Protocol::Bgp, peer, bytes: msg.encode() };
        if self.messages_out.try_send(out).is_err() {
            warn!("bgp: dropping outbound message to {} (channel full)", peer);
        }
    }

    fn send_counted(&mut self, peer: IpAddr, msg: &BgpMessage) {
        self.send(peer, msg);
        if let Some(adj) = self.adjacencies.get_mut(&peer) {
            adj.count_sent();
        }
    }

    /// Run the decision process for one prefix and, if the best route changed, update the
    /// merger and re-advertise to all established peers.
    fn decide(&mut self, prefix: Prefix, now: Instant) {
        let mut new_best: Option<BgpRibEntry> = None;
        for rib in self.rib_in.values() {
            if let Some(entry) = rib.get(&prefix) {
                let better = match new_best.as_ref() {
                    Some(current) => entry.compare(current) == Ordering::Greater,
                    None => true,
                };
                if better {
                    new_best = Some(entry.clone());
                }
            }
        }

        let old_best = self.best.get(&prefix).cloned();
        if new_best == old_best {
            return;
        }

        match &new_best {
            Some(entry) => {
                self.best.insert(prefix, entry.clone());
                let mut route =
                    Route::new(prefix, entry.route.next_hop, entry.iface, entry.route.med, Protocol::Bgp);
                route.last_updated = now;
                route.attrs = RouteAttrs::Bgp(BgpPathAttrs {
                    as_path: entry.route.as_path.clone(),
                    local_pref: entry.route.local_pref,
                    med: entry.route.med,
                    origin: entry.route.origin,
                    from_ebgp: entry.from_ebgp,
                });
                let _ = self
                    .routes_out
                    .send(RouteUpdate { route, action: RouteAction::Add });
            }
            None => {
                self.best.remove(&prefix);
                let route = Route::new(
                    prefix,
                    self.local_addr,
                    InterfaceId(0),
                    0,
                    Protocol::Bgp,
                );
                let _ = self
                    .routes_out
                    .send(RouteUpdate { route, action: RouteAction::Withdraw });
            }
        }

        self.disseminate(prefix, old_best.as_ref(), new_best.as_ref());
    }

    /// Re-advertise the (possibly changed) best route for one prefix to all established peers.
    fn disseminate(
        &mut self,
        prefix: Prefix,
        old: Option<&BgpRibEntry>,
        new: Option<&BgpRibEntry>,
    ) {
        let established: Vec<IpAddr> = self
            .adjacencies
            .iter()
            .filter(|(_, a)| a.is_established())
            .map(|(peer, _)| *peer)
            .collect();
        for peer in established {
            let msg = match new {
                Some(entry) => {
                    // never reflect a route back to the neighbor it came from
                    if entry.from == peer {
                        // if that neighbor previously got a route from us, withdraw it
                        if old.map_or(false, |o| o.from != peer) {
                            Some(BgpMessage::Update { withdrawn: vec![prefix], announced: vec![] })
                        } else {
                            None
                        }
                    } else {
                        self.export_route(&entry.route, peer)
                            .map(|r| BgpMessage::Update { withdrawn: vec![], announced: vec![r] })
                    }
                }
                None if old.is_some() => {
                    Some(BgpMessage::Update { withdrawn: vec![prefix], announced: vec![] })
                }
                None => None,
            };
            if let Some(msg) = msg {
                self.send_counted(peer, &msg);
            }
        }
    }

    /// Apply the export policy towards `peer`: denied prefixes are filtered, and on eBGP
    /// sessions the local AS is prepended, the next hop rewritten to this router, and the
    /// local-pref stripped to its default.
    fn export_route(&self, route: &BgpRoute, peer: IpAddr) -> Option<BgpRoute> {
        let cfg = self.neighbors.get(&peer)?;
        if cfg.export_deny.contains(&route.prefix) {
            return None;
        }
        let mut out = route.clone();
        if cfg.remote_as != self.local_as {
            // loop prevention is on the receiver; the sender prepends
            out.as_path.insert(0, self.local_as);
            out.next_hop = self.local_addr;
            out.local_pref = 100;
        }
        Some(out)
    }

    /// Send the complete table (local routes plus best learned routes) to a peer that just
    /// reached Established.
    fn send_full_table(&mut self, peer: IpAddr) {
        let mut announced = Vec::new();
        for route in self.local_routes.values() {
            if let Some(r) = self.export_route(route, peer) {
                announced.push(r);
            }
        }
        for entry in self.best.values() {
            if entry.from == peer {
                continue;
            }
            if let Some(r) = self.export_route(&entry.route, peer) {
                announced.push(r);
            }
        }
        if !announced.is_empty() {
            self.send_counted(peer, &BgpMessage::Update { withdrawn: vec![], announced });
        }
    }

    /// Drop all routes learned from a neighbor in one batch and re-run the decision process for
    /// the affected prefixes.
    fn flush_neighbor(&mut self, peer: IpAddr, now: Instant) {
        if let Some(rib) = self.rib_in.remove(&peer) {
            let prefixes: Vec<Prefix> = rib.keys().copied().collect();
            info!("bgp: flushing {} routes learned from {}", prefixes.len(), peer);
            for prefix in prefixes {
                self.decide(prefix, now);
            }
        }
    }

    fn process_actions(&mut self, peer: IpAddr, actions: Vec<AdjacencyAction>, now: Instant) {
        for action in actions {
            match action {
                AdjacencyAction::SendOpen => {
                    let msg = BgpMessage::Open {
                        version: BGP_VERSION,
                        as_id: self.local_as,
                        router_id: self.router_id,
                        hold_time: self.hold_time.as_secs() as u16,
                    };
                    self.send_counted(peer, &msg);
                }
                AdjacencyAction::SendKeepalive => {
                    self.send_counted(peer, &BgpMessage::Keepalive);
                }
                AdjacencyAction::Up => {
                    self.metrics.neighbor_established(Protocol::Bgp, true);
                    self.send_full_table(peer);
                }
                AdjacencyAction::Down => {
                    self.metrics.neighbor_established(Protocol::Bgp, false);
                }
                AdjacencyAction::WithdrawRoutes => {
                    self.flush_neighbor(peer, now);
                }
            }
        }
    }

    fn handle_update(
        &mut self,
        peer: IpAddr,
        withdrawn: Vec<Prefix>,
        announced: Vec<BgpRoute>,
        now: Instant,
    ) {
        let cfg = match self.neighbors.get(&peer) {
            Some(c) => c.clone(),
            None => return,
        };
        let from_ebgp = self.is_ebgp(peer);
        let mut touched = Vec::new();

        for prefix in withdrawn {
            if let Some(rib) = self.rib_in.get_mut(&peer) {
                if rib.remove(&prefix).is_some() {
                    touched.push(prefix);
                }
            }
        }

        for mut route in announced {
            // loop prevention: discard routes that already carry our AS
            if route.as_path.contains(&self.local_as) {
                debug!("bgp: {} advertised {} with our AS in the path", peer, route.prefix);
                continue;
            }
            if let Some(lp) = cfg.local_pref {
                route.local_pref = lp;
            }
            if from_ebgp {
                // next hop of an eBGP route is the announcing border router
                route.next_hop = peer;
            }
            let prefix = route.prefix;
            let entry = BgpRibEntry {
                route,
                from: peer,
                router_id: self.peer_router_ids.get(&peer).copied().unwrap_or(u32::MAX),
                from_ebgp,
                igp_cost: cfg.igp_cost,
                iface: cfg.iface,
            };
            self.rib_in.entry(peer).or_insert_with(HashMap::new).insert(prefix, entry);
            touched.push(prefix);
        }

        for prefix in touched {
            self.decide(prefix, now);
        }
    }
}

impl NeighborCfg {
    fn parse(n: &BgpNeighborConfig) -> Result<Self, Error> {
        let mut export_deny = HashSet::new();
        for d in n.export_deny.iter() {
            export_deny.insert(d.parse()?);
        }
        Ok(Self {
            remote_as: AsId(n.remote_as),
            iface: InterfaceId(n.iface),
            local_pref: n.local_pref,
            export_deny,
            igp_cost: 1,
        })
    }
}

impl ProtocolDriver for BgpDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Bgp
    }

    fn start(&mut self, now: Instant) {
        self.running = true;
        info!("bgp: starting with {} configured neighbors", self.adjacencies.len());
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
            let established =
                self.adjacencies.get(&peer).map_or(false, |a| a.is_established());
            if established {
                // cease notification, then orderly teardown
                self.send_counted(peer, &BgpMessage::Notification { code: 2 });
            }
            let actions = match self.adjacencies.get_mut(&peer) {
                Some(adj) => adj.handle(AdjacencyEvent::Stop, now),
                None => continue,
            };
            self.process_actions(peer, actions, now);
        }
    }

    fn advertise(&mut self, route: Route, _now: Instant) -> Result<(), Error> {
        // locally originated: the AS path stays empty, the eBGP export prepends our AS
        let bgp_route = BgpRoute {
            prefix: route.prefix,
            next_hop: self.local_addr,
            as_path: Vec::new(),
            origin: BgpOrigin::Igp,
            local_pref: 100,
            med: route.metric,
        };
        self.local_routes.insert(route.prefix, bgp_route.clone());
        let peers: Vec<IpAddr> = self
            .adjacencies
            .iter()
            .filter(|(_, a)| a.is_established())
            .map(|(p, _)| *p)
            .collect();
        for peer in peers {
            if let Some(r) = self.export_route(&bgp_route, peer) {
                self.send_counted(
                    peer,
                    &BgpMessage::Update { withdrawn: vec![], announced: vec![r] },
                );
            }
        }
        Ok(())
    }

    fn withdraw(&mut self, prefix: Prefix, _now: Instant) -> Result<(), Error> {
        if self.local_routes.remove(&prefix).is_none() {
            return Ok(());
        }
        let peers: Vec<IpAddr> = self
            .adjacencies
            .iter()
            .filter(|(_, a)| a.is_established())
            .map(|(p, _)| *p)
            .collect();
        for peer in peers {
            self.send_counted(
                peer,
                &BgpMessage::Update { withdrawn: vec![prefix], announced: vec![] },
            );
        }
        Ok(())
    }

    fn handle_message(&mut self, from: IpAddr, bytes: &[u8], now: Instant) {
        if !self.neighbors.contains_key(&from) {
            debug!("bgp: message from unconfigured peer {}", from);
            self.metrics.message_error(Protocol::Bgp);
            return;
        }
        let msg = match BgpMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("bgp: discarding message from {}: {}", from, e);
                self.metrics.message_error(Protocol::Bgp);
                return;
            }
        };
        if let Some(adj) = self.adjacencies.get_mut(&from) {
            adj.count_received();
        }
        match msg {
            BgpMessage::Open { version, as_id, router_id, hold_time } => {
                let valid = version == BGP_VERSION
                    && self.neighbors.get(&from).map_or(false, |n| n.remote_as == as_id);
                if valid {
                    self.peer_router_ids.insert(from, router_id);
                }
                let actions = match self.adjacencies.get_mut(&from) {
                    Some(adj) => {
                        adj.set_capability("as", as_id.0.to_string());
                        adj.set_capability("router_id", router_id.to_string());
                        adj.set_capability("hold_time", hold_time.to_string());
                        adj.handle(AdjacencyEvent::OpenRecv { valid }, now)
                    }
                    None => return,
                };
                self.process_actions(from, actions, now);
            }
            BgpMessage::Keepalive => {
                let actions = match self.adjacencies.get_mut(&from) {
                    Some(adj) => adj.handle(AdjacencyEvent::KeepaliveRecv, now),
                    None => return,
                };
                self.process_actions(from, actions, now);
            }
            BgpMessage::Update { withdrawn, announced } => {
                let established =
                    self.adjacencies.get(&from).map_or(false, |a| a.is_established());
                if !established {
                    debug!("bgp: update from {} outside established, discarded", from);
                    self.metrics.message_error(Protocol::Bgp);
                    return;
                }
                // an update also proves liveness
                if let Some(adj) = self.adjacencies.get_mut(&from) {
                    adj.handle(AdjacencyEvent::KeepaliveRecv, now);
                }
                self.handle_update(from, withdrawn, announced, now);
            }
            BgpMessage::Notification { code } => {
                let actions = match self.adjacencies.get_mut(&from) {
                    Some(adj) => {
                        adj.handle(AdjacencyEvent::Error(format!("notification code {}", code)), now)
                    }
                    None => return,
                };
                self.process_actions(from, actions, now);
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        let peers: Vec<IpAddr> = self.adjacencies.keys().copied().collect();
        for peer in peers {
            // the simulated transport connects instantly
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
    }

    fn neighbors(&self) -> Vec<NeighborSummary> {
        self.adjacencies
            .values()
            .map(|a| NeighborSummary {
                peer: a.peer(),
                protocol: Protocol::Bgp,
                state: a.state(),
                msgs_sent: a.msgs_sent(),
                msgs_received: a.msgs_received(),
                last_error: a.last_error().map(|s| s.to_string()),
            })
            .collect()
    }
}
