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

//! # Protocol drivers
//!
//! The three routing protocol drivers (BGP, OSPF, IS-IS) behind one small trait. A driver owns
//! its neighbors (each an [`Adjacency`](crate::adjacency::Adjacency)), its protocol-local route
//! table, and its timers. It never holds a reference to the merger or the FIB: learned routes
//! leave the driver as owned [`RouteUpdate`] messages over a channel, and wire messages to peers
//! leave as [`OutboundMessage`]s. The caller (the router control loop, or a test) pumps
//! `handle_message` and `tick`.

pub mod bgp;
pub mod isis;
pub mod ospf;

use crate::adjacency::AdjacencyState;
use crate::rib::RouteUpdate;
use crate::types::{Prefix, Protocol, Route};
use crate::Error;
use std::net::IpAddr;
use std::time::Instant;

pub use bgp::BgpDriver;
pub use isis::IsisDriver;
pub use ospf::OspfDriver;

/// A wire message leaving the router towards a protocol peer.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// the emitting protocol
    pub protocol: Protocol,
    /// address of the peer
    pub peer: IpAddr,
    /// encoded message
    pub bytes: Vec<u8>,
}

/// Channel half on which drivers emit route updates towards the merger.
pub type RouteSender = crossbeam_channel::Sender<RouteUpdate>;
/// Channel half on which drivers emit wire messages towards their peers.
pub type MessageSender = crossbeam_channel::Sender<OutboundMessage>;

/// Inspectable state of one neighbor.
#[derive(Debug, Clone)]
pub struct NeighborSummary {
    /// peer address
    pub peer: IpAddr,
    /// protocol of the adjacency
    pub protocol: Protocol,
    /// current FSM state
    pub state: AdjacencyState,
    /// messages sent to the peer
    pub msgs_sent: u64,
    /// messages received from the peer
    pub msgs_received: u64,
    /// last error recorded on the neighbor
    pub last_error: Option<String>,
}

/// Common contract of the protocol drivers.
pub trait ProtocolDriver: Send {
    /// The protocol this driver speaks.
    fn protocol(&self) -> Protocol;

    /// Start all configured neighbors.
    fn start(&mut self, now: Instant);

    /// Stop the driver: send session termination where the protocol requires it, tear down all
    /// adjacencies, and withdraw everything from the merger.
    fn stop(&mut self, now: Instant);

    /// Originate a local route into the protocol (advertised to all established peers).
    fn advertise(&mut self, route: Route, now: Instant) -> Result<(), Error>;

    /// Withdraw a previously originated local route.
    fn withdraw(&mut self, prefix: Prefix, now: Instant) -> Result<(), Error>;

    /// Handle one inbound wire message from a peer. A malformed message increments the error
    /// counter and is discarded; the session stays up.
    fn handle_message(&mut self, from: IpAddr, bytes: &[u8], now: Instant);

    /// Periodic work: hello/keepalive timers, database aging, deferred SPF runs.
    fn tick(&mut self, now: Instant);

    /// Snapshot of all neighbors.
    fn neighbors(&self) -> Vec<NeighborSummary>;
}

/// Shortest-path-first over a set of directed weighted links, rooted at `root`. Returns, for
/// every reachable node, the first hop on the shortest path and the total cost. The first hop of
/// a direct neighbor is the neighbor itself.
pub(crate) fn shortest_paths<N>(links: &[(N, N, u32)], root: N) -> std::collections::HashMap<N, (N, f32)>
where
    N: Copy + Eq + std::hash::Hash + std::fmt::Debug,
{
    use petgraph::algo::bellman_ford;
    use petgraph::prelude::*;
    use petgraph::stable_graph::StableGraph;
    use std::collections::HashMap;

    let mut graph: StableGraph<N, f32, Directed, u32> = StableGraph::default();
    let mut nodes: HashMap<N, NodeIndex<u32>> = HashMap::new();
    let mut ids: Vec<N> = Vec::new();
    let mut node = |graph: &mut StableGraph<N, f32, Directed, u32>,
                    ids: &mut Vec<N>,
                    n: N|
     -> NodeIndex<u32> {
        *nodes.entry(n).or_insert_with(|| {
            ids.push(n);
            graph.add_node(n)
        })
    };

    let root_idx = node(&mut graph, &mut ids, root);
    for (from, to, cost) in links.iter() {
        let a = node(&mut graph, &mut ids, *from);
        let b = node(&mut graph, &mut ids, *to);
        graph.add_edge(a, b, *cost as f32);
    }

    // compute shortest path to all other nodes in the graph; no negative weights, so this
    // cannot fail
    let (path_weights, predecessors) = bellman_ford(&graph, root_idx).unwrap();
    let mut paths: Vec<(NodeIndex<u32>, f32, Option<NodeIndex<u32>>)> = path_weights
        .into_iter()
        .zip(predecessors.into_iter())
        .enumerate()
        .map(|(i, (w, p))| (NodeIndex::new(i), w, p))
        .collect();
    paths.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut first_hops: HashMap<NodeIndex<u32>, (NodeIndex<u32>, f32)> = HashMap::new();
    let mut result: HashMap<N, (N, f32)> = HashMap::new();
    for (idx, cost, predecessor) in paths {
        if cost.is_infinite() || idx == root_idx {
            continue;
        }
        let first_hop = match predecessor {
            // the predecessor was already resolved, because the paths are sorted by cost
            Some(pred) if pred != root_idx => match first_hops.get(&pred) {
                Some((hop, _)) => *hop,
                None => continue,
            },
            _ => idx,
        };
        first_hops.insert(idx, (first_hop, cost));
        result.insert(ids[idx.index()], (ids[first_hop.index()], cost));
    }
    result
}

/// Minimal binary reader for the protocol codecs. Every accessor is length-checked and fails
/// with [`Error::MalformedMessage`] instead of panicking.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.buf.len() {
            return Err(Error::MalformedMessage("message truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub(crate) fn addr(&mut self) -> Result<IpAddr, Error> {
        match self.u8()? {
            4 => {
                let b = self.take(4)?;
                Ok(IpAddr::from([b[0], b[1], b[2], b[3]]))
            }
            6 => {
                let b = self.take(16)?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(b);
                Ok(IpAddr::from(raw))
            }
            _ => Err(Error::MalformedMessage("unknown address family")),
        }
    }

    pub(crate) fn prefix(&mut self) -> Result<Prefix, Error> {
        let addr = self.addr()?;
        let len = self.u8()?;
        Prefix::new(addr, len).map_err(|_| Error::MalformedMessage("invalid prefix length"))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// Binary writer matching [`Reader`].
#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub(crate) fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn addr(&mut self, addr: IpAddr) -> &mut Self {
        match addr {
            IpAddr::V4(a) => {
                self.u8(4);
                self.buf.extend_from_slice(&a.octets());
            }
            IpAddr::V6(a) => {
                self.u8(6);
                self.buf.extend_from_slice(&a.octets());
            }
        }
        self
    }

    pub(crate) fn prefix(&mut self, prefix: &Prefix) -> &mut Self {
        self.addr(prefix.network());
        self.u8(prefix.len())
    }

    pub(crate) fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
