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

//! # IS-IS driver
//!
//! Level-1 and level-2 operation with one LSP database per level and an SPF run per level.
//! Hellos carry the DIS election priority; the DIS of a LAN is the neighbor with the highest
//! priority (highest system id breaks the tie), re-evaluated whenever a hello arrives or an
//! adjacency changes. Level-1 routes are preferred over level-2 routes for the same prefix.

use super::{
    shortest_paths, MessageSender, NeighborSummary, OutboundMessage, ProtocolDriver, Reader,
    RouteSender, Writer,
};
use crate::adjacency::{Adjacency, AdjacencyAction, AdjacencyEvent, AdjacencyState};
use crate::config::IsisConfig;
use crate::metrics::Metrics;
use crate::rib::{RouteAction, RouteUpdate};
use crate::types::{InterfaceId, Prefix, Protocol, Route, RouteAttrs, SystemId};
use crate::Error;
use log::*;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ospf::SPF_HOLD;

/// An LSP older than this is purged from the database.
const MAX_LIFETIME: Duration = Duration::from_secs(1200);

/// The two routing levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// intra-area routing
    L1,
    /// inter-area routing
    L2,
}

impl Level {
    fn code(&self) -> u8 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::L1),
            2 => Ok(Self::L2),
            _ => Err(Error::MalformedMessage("unknown isis level")),
        }
    }
}

/// One link-state PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Lsp {
    /// originating system
    pub origin: SystemId,
    /// level the LSP belongs to
    pub level: Level,
    /// sequence number; higher wins
    pub seq: u32,
    /// links of the originator: (neighbor system, metric)
    pub links: Vec<(SystemId, u32)>,
    /// prefixes advertised by the originator: (prefix, metric)
    pub prefixes: Vec<(Prefix, u32)>,
}

/// Wire messages of the simulated IS-IS session.
#[derive(Debug, Clone, PartialEq)]
pub enum IsisMessage {
    /// IS-IS hello (IIH)
    Hello {
        /// originating system
        system_id: SystemId,
        /// level of the hello
        level: Level,
        /// DIS election priority of the sender
        priority: u8,
        /// systems the sender has heard from
        seen: Vec<SystemId>,
    },
    /// flooded link-state PDUs
    LspUpdate(Vec<Lsp>),
}

impl IsisMessage {
    /// Encode the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::Hello { system_id, level, priority, seen } => {
                w.u8(1).u64(system_id.0).u8(level.code()).u8(*priority).u16(seen.len() as u16);
                for s in seen {
                    w.u64(s.0);
                }
            }
            Self::LspUpdate(lsps) => {
                w.u8(2).u16(lsps.len() as u16);
                for lsp in lsps {
                    w.u64(lsp.origin.0).u8(lsp.level.code()).u32(lsp.seq);
                    w.u16(lsp.links.len() as u16);
                    for (nbr, metric) in &lsp.links {
                        w.u64(nbr.0).u32(*metric);
                    }
                    w.u16(lsp.prefixes.len() as u16);
                    for (prefix, metric) in &lsp.prefixes {
                        w.prefix(prefix).u32(*metric);
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
                let system_id = SystemId(r.u64()?);
                let level = Level::from_code(r.u8()?)?;
                let priority = r.u8()?;
                let n = r.u16()? as usize;
                let mut seen = Vec::with_capacity(n);
                for _ in 0..n {
                    seen.push(SystemId(r.u64()?));
                }
                Self::Hello { system_id, level, priority, seen }
            }
            2 => {
                let n = r.u16()? as usize;
                let mut lsps = Vec::with_capacity(n);
                for _ in 0..n {
                    let origin = SystemId(r.u64()?);
                    let level = Level::from_code(r.u8()?)?;
                    let seq = r.u32()?;
                    let n_links = r.u16()? as usize;
                    let mut links = Vec::with_capacity(n_links);
                    for _ in 0..n_links {
                        links.push((SystemId(r.u64()?), r.u32()?));
                    }
                    let n_prefixes = r.u16()? as usize;
                    let mut prefixes = Vec::with_capacity(n_prefixes);
                    for _ in 0..n_prefixes {
                        prefixes.push((r.prefix()?, r.u32()?));
                    }
                    lsps.push(Lsp { origin, level, seq, links, prefixes });
                }
                Self::LspUpdate(lsps)
            }
            _ => return Err(Error::MalformedMessage("unknown isis message type")),
        };
        if !r.is_empty() {
            return Err(Error::MalformedMessage("trailing bytes after isis message"));
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
struct NeighborCfg {
    iface: InterfaceId,
    metric: u32,
}

#[derive(Debug, Clone, Copy)]
struct PeerInfo {
    system_id: SystemId,
    priority: u8,
}

/// The IS-IS protocol driver.
pub struct IsisDriver {
    system_id: SystemId,
    levels: Vec<Level>,
    priority: u8,
    hello_interval: Duration,
    /// next periodic IIH emission; hellos flow in every non-idle state
    next_hello: Instant,
    neighbors: HashMap<IpAddr, NeighborCfg>,
    adjacencies: HashMap<IpAddr, Adjacency>,
    peers: HashMap<IpAddr, PeerInfo>,
    /// LSP database per level, with the age reference of each LSP
    lsdb: HashMap<Level, HashMap<SystemId, (Lsp, Instant)>>,
    /// elected DIS per (interface, level)
    dis: HashMap<(InterfaceId, Level), SystemId>,
    local_prefixes: HashMap<Prefix, u32>,
    seq: u32,
    spf_at: Option<Instant>,
    installed: HashMap<Prefix, Route>,
    routes_out: RouteSender,
    messages_out: MessageSender,
    metrics: Arc<Metrics>,
    running: bool,
}

impl std::fmt::Debug for IsisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsisDriver")
            .field("system_id", &self.system_id)
            .field("levels", &self.levels)
            .finish()
    }
}

impl IsisDriver {
    /// Build a driver from its configuration section. `config.level` 3 means level-1-2.
    pub fn new(
        config: &IsisConfig,
        system_id: u64,
        routes_out: RouteSender,
        messages_out: MessageSender,
        metrics: Arc<Metrics>,
        now: Instant,
    ) -> Self {
        let levels = match config.level {
            1 => vec![Level::L1],
            2 => vec![Level::L2],
            _ => vec![Level::L1, Level::L2],
        };
        let hello_interval = Duration::from_secs(config.hello_interval);
        let hold_time = Duration::from_secs(config.hold_time);
        let mut neighbors = HashMap::new();
        let mut adjacencies = HashMap::new();
        for n in config.neighbors.iter() {
            neighbors
                .insert(n.peer, NeighborCfg { iface: InterfaceId(n.iface), metric: n.cost });
            adjacencies.insert(
                n.peer,
                Adjacency::new(n.peer, Protocol::Isis, hold_time, hello_interval, now),
            );
        }
        let mut lsdb = HashMap::new();
        for level in &levels {
            lsdb.insert(*level, HashMap::new());
        }
        Self {
            system_id: SystemId(system_id),
            levels,
            priority: config.priority,
            hello_interval,
            next_hello: now,
            neighbors,
            adjacencies,
            peers: HashMap::new(),
            lsdb,
            dis: HashMap::new(),
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

    /// The elected DIS of a LAN, if any (inspection).
    pub fn dis(&self, iface: InterfaceId, level: Level) -> Option<SystemId> {
        self.dis.get(&(iface, level)).copied()
    }

    fn send(&mut self, peer: IpAddr, msg: &IsisMessage) {
        let out = OutboundMessage { protocol: Protocol::Isis, peer, bytes: msg.encode() };
        if self.messages_out.try_send(out).is_err() {
            warn!("isis: dropping outbound message to {} (channel full)", peer);
        }
        if let Some(adj) = self.adjacencies.get_mut(&peer) {
            adj.count_sent();
        }
    }

    fn hello(&self, level: Level) -> IsisMessage {
        IsisMessage::Hello {
            system_id: self.system_id,
            level,
            priority: self.priority,
            seen: self.peers.values().map(|p| p.system_id).collect(),
        }
    }

    /// Re-run the DIS election of one LAN: the highest (priority, system id) among ourselves
    /// and the established neighbors on that interface.
    fn elect_dis(&mut self, iface: InterfaceId, level: Level) {
        let mut best = (self.priority, self.system_id);
        for (peer, info) in self.peers.iter() {
            let established =
                self.adjacencies.get(peer).map_or(false, |a| a.is_established());
            let on_lan = self.neighbors.get(peer).map_or(false, |n| n.iface == iface);
            if established && on_lan && (info.priority, info.system_id) > best {
                best = (info.priority, info.system_id);
            }
        }
        let old = self.dis.insert((iface, level), best.1);
        if old != Some(best.1) {
            debug!("isis: {:?} DIS on {} is now {}", level, iface, best.1);
        }
    }

    /// Originate (or refresh) the own LSP on every level and flood it.
    fn originate_lsp(&mut self, now: Instant) {
        self.seq += 1;
        let links: Vec<(SystemId, u32)> = self
            .adjacencies
            .iter()
            .filter(|(_, a)| a.is_established())
            .filter_map(|(peer, _)| {
                let info = self.peers.get(peer)?;
                let metric = self.neighbors.get(peer)?.metric;
                Some((info.system_id, metric))
            })
            .collect();
        let prefixes: Vec<(Prefix, u32)> =
            self.local_prefixes.iter().map(|(p, c)| (*p, *c)).collect();
        let levels = self.levels.clone();
        for level in levels {
            let lsp = Lsp {
                origin: self.system_id,
                level,
                seq: self.seq,
                links: links.clone(),
                prefixes: prefixes.clone(),
            };
            if let Some(db) = self.lsdb.get_mut(&level) {
                db.insert(self.system_id, (lsp.clone(), now));
            }
            self.flood(vec![lsp], None);
        }
        self.schedule_spf(now);
    }

    /// Flood LSPs to all established neighbors except the one they came from.
    fn flood(&mut self, lsps: Vec<Lsp>, except: Option<IpAddr>) {
        let peers: Vec<IpAddr> = self
            .adjacencies
            .iter()
            .filter(|(peer, a)| a.is_established() && Some(**peer) != except)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in peers {
            self.send(peer, &IsisMessage::LspUpdate(lsps.clone()));
        }
    }

    fn schedule_spf(&mut self, now: Instant) {
        let at = now + SPF_HOLD;
        self.spf_at = Some(self.spf_at.map_or(at, |t| t.min(at)));
    }

    /// Run SPF per level and synchronize the merger. L1 routes win over L2 for the same prefix.
    fn run_spf(&mut self, now: Instant) {
        self.spf_at = None;

        let next_hops: HashMap<SystemId, (IpAddr, InterfaceId)> = self
            .peers
            .iter()
            .filter_map(|(peer, info)| {
                let cfg = self.neighbors.get(peer)?;
                Some((info.system_id, (*peer, cfg.iface)))
            })
            .collect();

        let mut new_routes: HashMap<Prefix, Route> = HashMap::new();
        let levels = self.levels.clone();
        for level in levels {
            let db = match self.lsdb.get(&level) {
                Some(db) => db,
                None => continue,
            };
            let mut links = Vec::new();
            for (lsp, _) in db.values() {
                for (nbr, metric) in &lsp.links {
                    links.push((lsp.origin, *nbr, *metric));
                }
            }
            let paths = shortest_paths(&links, self.system_id);
            for (lsp, _) in db.values() {
                if lsp.origin == self.system_id {
                    continue;
                }
                let (first_hop, cost) = match paths.get(&lsp.origin) {
                    Some(x) => *x,
                    None => continue,
                };
                let (next_hop, iface) = match next_hops.get(&first_hop) {
                    Some(x) => *x,
                    None => continue,
                };
                for (prefix, prefix_metric) in &lsp.prefixes {
                    let total = cost as u32 + prefix_metric;
                    // L1 is walked first; an L2 route never displaces an L1 route, and within
                    // one level the lower metric wins
                    let better = match new_routes.get(prefix) {
                        None => true,
                        Some(r) => match (&r.attrs, level) {
                            (RouteAttrs::Isis { level: 1 }, Level::L2) => false,
                            (RouteAttrs::Isis { level: 2 }, Level::L1) => true,
                            _ => total < r.metric,
                        },
                    };
                    if better {
                        let mut route =
                            Route::new(*prefix, next_hop, iface, total, Protocol::Isis);
                        route.last_updated = now;
                        route.attrs = RouteAttrs::Isis { level: level.code() };
                        new_routes.insert(*prefix, route);
                    }
                }
            }
        }

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

    /// Age both databases; purge LSPs past their lifetime.
    fn age_lsdb(&mut self, now: Instant) {
        let own = self.system_id;
        let mut purged = false;
        for db in self.lsdb.values_mut() {
            let before = db.len();
            db.retain(|origin, (_, born)| {
                *origin == own || now.saturating_duration_since(*born) < MAX_LIFETIME
            });
            purged |= db.len() != before;
        }
        if purged {
            debug!("isis: purged aged LSPs");
            self.schedule_spf(now);
        }
    }

    fn process_actions(&mut self, peer: IpAddr, actions: Vec<AdjacencyAction>, now: Instant) {
        for action in actions {
            match action {
                AdjacencyAction::SendOpen | AdjacencyAction::SendKeepalive => {
                    let levels = self.levels.clone();
                    for level in levels {
                        let msg = self.hello(level);
                        self.send(peer, &msg);
                    }
                }
                AdjacencyAction::Up => {
                    self.metrics.neighbor_established(Protocol::Isis, true);
                    if let Some(iface) = self.neighbors.get(&peer).map(|n| n.iface) {
                        let levels = self.levels.clone();
                        for level in levels {
                            self.elect_dis(iface, level);
                        }
                    }
                    self.originate_lsp(now);
                    let lsps: Vec<Lsp> = self
                        .lsdb
                        .values()
                        .flat_map(|db| db.values().map(|(lsp, _)| lsp.clone()))
                        .collect();
                    if !lsps.is_empty() {
                        self.send(peer, &IsisMessage::LspUpdate(lsps));
                    }
                }
                AdjacencyAction::Down => {
                    self.metrics.neighbor_established(Protocol::Isis, false);
                    if let Some(iface) = self.neighbors.get(&peer).map(|n| n.iface) {
                        let levels = self.levels.clone();
                        for level in levels {
                            self.elect_dis(iface, level);
                        }
                    }
                }
                AdjacencyAction::WithdrawRoutes => {
                    self.originate_lsp(now);
                }
            }
        }
    }

    fn handle_hello(
        &mut self,
        from: IpAddr,
        system_id: SystemId,
        level: Level,
        priority: u8,
        seen: Vec<SystemId>,
        now: Instant,
    ) {
        if !self.levels.contains(&level) {
            debug!("isis: hello from {} on unconfigured level {:?}", from, level);
            self.metrics.message_error(Protocol::Isis);
            return;
        }
        self.peers.insert(from, PeerInfo { system_id, priority });
        let two_way = seen.contains(&self.system_id);
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
        if let Some(iface) = self.neighbors.get(&from).map(|n| n.iface) {
            self.elect_dis(iface, level);
        }
    }

    fn handle_lsp_update(&mut self, from: IpAddr, lsps: Vec<Lsp>, now: Instant) {
        let mut fresh = Vec::new();
        for lsp in lsps {
            if !self.levels.contains(&lsp.level) {
                continue;
            }
            if lsp.origin == self.system_id {
                if lsp.seq >= self.seq {
                    self.seq = lsp.seq;
                    self.originate_lsp(now);
                }
                continue;
            }
            let db = match self.lsdb.get_mut(&lsp.level) {
                Some(db) => db,
                None => continue,
            };
            let newer = db.get(&lsp.origin).map_or(true, |(old, _)| lsp.seq > old.seq);
            if newer {
                db.insert(lsp.origin, (lsp.clone(), now));
                fresh.push(lsp);
            }
        }
        if !fresh.is_empty() {
            self.flood(fresh, Some(from));
            self.schedule_spf(now);
        }
    }
}

impl ProtocolDriver for IsisDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Isis
    }

    fn start(&mut self, now: Instant) {
        self.running = true;
        info!(
            "isis: starting {} as {:?} with {} configured neighbors",
            self.system_id,
            self.levels,
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
        for (_, route) in self.installed.drain() {
            let _ = self.routes_out.send(RouteUpdate { route, action: RouteAction::Withdraw });
        }
    }

    fn advertise(&mut self, route: Route, now: Instant) -> Result<(), Error> {
        self.local_prefixes.insert(route.prefix, route.metric);
        if self.running {
            self.originate_lsp(now);
        }
        Ok(())
    }

    fn withdraw(&mut self, prefix: Prefix, now: Instant) -> Result<(), Error> {
        if self.local_prefixes.remove(&prefix).is_some() && self.running {
            self.originate_lsp(now);
        }
        Ok(())
    }

    fn handle_message(&mut self, from: IpAddr, bytes: &[u8], now: Instant) {
        if !self.neighbors.contains_key(&from) {
            debug!("isis: message from unconfigured peer {}", from);
            self.metrics.message_error(Protocol::Isis);
            return;
        }
        let msg = match IsisMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("isis: discarding message from {}: {}", from, e);
                self.metrics.message_error(Protocol::Isis);
                return;
            }
        };
        if let Some(adj) = self.adjacencies.get_mut(&from) {
            adj.count_received();
        }
        match msg {
            IsisMessage::Hello { system_id, level, priority, seen } => {
                self.handle_hello(from, system_id, level, priority, seen, now)
            }
            IsisMessage::LspUpdate(lsps) => {
                if let Some(adj) = self.adjacencies.get_mut(&from) {
                    if adj.is_established() {
                        adj.handle(AdjacencyEvent::HelloRecv, now);
                    }
                }
                self.handle_lsp_update(from, lsps, now)
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
            let levels = self.levels.clone();
            for peer in peers {
                for level in levels.iter() {
                    let msg = self.hello(*level);
                    self.send(peer, &msg);
                }
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
                protocol: Protocol::Isis,
                state: a.state(),
                msgs_sent: a.msgs_sent(),
                msgs_received: a.msgs_received(),
                last_error: a.last_error().map(|s| s.to_string()),
            })
            .collect()
    }
}
