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

//! # Forwarding Information Base
//!
//! The FIB holds the selected route per prefix in a binary radix trie (one per address family),
//! keyed by the bits of the network address truncated at the prefix length. Lookup walks from the
//! root and remembers the deepest node on the path that carries an active entry, giving
//! longest-prefix match in O(prefix length).
//!
//! The trie sits behind a read-mostly reader-writer lock: every forwarding worker reads, only the
//! RIB merger writes. A reader observes either the pre- or the post-state of each `install` or
//! `withdraw`, never a half-written node.

use crate::types::{AddressFamily, InterfaceId, Prefix};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::time::Instant;

/// A single installed forwarding entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    /// address of the next hop
    pub next_hop: IpAddr,
    /// egress interface towards the next hop
    pub iface: InterfaceId,
    /// monotonic timestamp of installation
    pub installed_at: Instant,
    /// inactive entries are kept in the trie but skipped by lookups
    pub active: bool,
}

#[derive(Debug, Default)]
struct Node {
    entry: Option<FibEntry>,
    children: [Option<Box<Node>>; 2],
}

#[derive(Debug, Default)]
struct Trie {
    root: Node,
    len: usize,
}

impl Trie {
    /// Walk to the node of `prefix`, creating missing nodes, and return it.
    fn node_mut(&mut self, prefix: &Prefix) -> &mut Node {
        let mut node = &mut self.root;
        for i in 0..prefix.len() {
            let branch = prefix.bit(i) as usize;
            node = node.children[branch].get_or_insert_with(Default::default);
        }
        node
    }

    fn install(&mut self, prefix: &Prefix, entry: FibEntry) -> Option<FibEntry> {
        let node = self.node_mut(prefix);
        let old = node.entry.replace(entry);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn withdraw(&mut self, prefix: &Prefix) -> Option<FibEntry> {
        // walk without creating nodes; pruning empty branches is not worth the bookkeeping here
        let mut node = &mut self.root;
        for i in 0..prefix.len() {
            let branch = prefix.bit(i) as usize;
            match node.children[branch].as_mut() {
                Some(child) => node = child,
                None => return None,
            }
        }
        let old = node.entry.take();
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    fn get(&self, prefix: &Prefix) -> Option<&FibEntry> {
        let mut node = &self.root;
        for i in 0..prefix.len() {
            let branch = prefix.bit(i) as usize;
            node = node.children[branch].as_ref()?;
        }
        node.entry.as_ref()
    }

    fn set_active(&mut self, prefix: &Prefix, active: bool) -> bool {
        let mut node = &mut self.root;
        for i in 0..prefix.len() {
            let branch = prefix.bit(i) as usize;
            match node.children[branch].as_mut() {
                Some(child) => node = child,
                None => return false,
            }
        }
        match node.entry.as_mut() {
            Some(e) => {
                e.active = active;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, bits: u128, width: u8) -> Option<&FibEntry> {
        let mut best = self.root.entry.as_ref().filter(|e| e.active);
        let mut node = &self.root;
        for i in 0..width {
            let branch = ((bits >> (width - 1 - i) as u32) & 1) as usize;
            match node.children[branch].as_ref() {
                Some(child) => {
                    node = child;
                    if let Some(e) = node.entry.as_ref().filter(|e| e.active) {
                        best = Some(e);
                    }
                }
                None => break,
            }
        }
        best
    }
}

/// The forwarding table. Cheap to share (`Arc<Fib>`); all methods take `&self`.
#[derive(Debug, Default)]
pub struct Fib {
    v4: RwLock<Trie>,
    v6: RwLock<Trie>,
}

impl Fib {
    /// Create an empty FIB.
    pub fn new() -> Self {
        Self::default()
    }

    fn trie(&self, family: AddressFamily) -> &RwLock<Trie> {
        match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        }
    }

    /// Longest-prefix match for a destination address. Returns the next hop and the egress
    /// interface of the most specific active entry covering `dst`, falling back to the default
    /// route (prefix length 0) if one is installed. Never fails; a miss returns `None`.
    pub fn lookup(&self, dst: IpAddr) -> Option<(IpAddr, InterfaceId)> {
        let (bits, width, trie) = match dst {
            IpAddr::V4(a) => (u32::from(a) as u128, 32, &self.v4),
            IpAddr::V6(a) => (u128::from(a), 128, &self.v6),
        };
        let guard = trie.read();
        guard.lookup(bits, width).map(|e| (e.next_hop, e.iface))
    }

    /// Install (or atomically replace) the entry for a prefix. Idempotent: re-installing the
    /// same entry only refreshes the installation timestamp.
    pub fn install(&self, prefix: Prefix, next_hop: IpAddr, iface: InterfaceId) {
        let entry = FibEntry { next_hop, iface, installed_at: Instant::now(), active: true };
        let mut guard = self.trie(prefix.family()).write();
        guard.install(&prefix, entry);
    }

    /// Remove the entry for a prefix. Idempotent: a no-op if the prefix is absent.
    pub fn withdraw(&self, prefix: &Prefix) {
        let mut guard = self.trie(prefix.family()).write();
        guard.withdraw(prefix);
    }

    /// Mark an installed entry active or inactive without removing it from the trie. Inactive
    /// entries are invisible to lookups: a longer inactive prefix does not shadow a shorter
    /// active one. Returns false if the prefix is not installed.
    pub fn set_active(&self, prefix: &Prefix, active: bool) -> bool {
        let mut guard = self.trie(prefix.family()).write();
        guard.set_active(prefix, active)
    }

    /// Exact-match read of the entry installed for a prefix.
    pub fn get(&self, prefix: &Prefix) -> Option<FibEntry> {
        let guard = self.trie(prefix.family()).read();
        guard.get(prefix).cloned()
    }

    /// Number of installed entries (both families, including inactive entries).
    pub fn len(&self) -> usize {
        self.v4.read().len + self.v6.read().len
    }

    /// True if no entry is installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
