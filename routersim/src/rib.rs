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

//! # Routing Information Base
//!
//! The protocol-agnostic merger. Every protocol driver feeds route advertisements and
//! withdrawals into the RIB; the RIB keeps all candidates per prefix, selects the best one and
//! keeps the FIB in sync. Updates to different prefixes proceed independently: the per-prefix
//! state lives in a sharded map, and each update only locks the shard of its prefix.
//! Selection-change callbacks are invoked after the shard lock is released, so a callback may
//! re-enter the RIB.

use crate::fib::Fib;
use crate::metrics::Metrics;
use crate::types::{InterfaceId, Prefix, Protocol, Route};
use itertools::Itertools;
use log::*;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// Whether a route update adds or withdraws the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// advertise or update the route
    Add,
    /// withdraw the route
    Withdraw,
}

/// One route update, as emitted by a protocol driver towards the merger.
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    /// the route (for withdrawals, prefix and protocol are authoritative)
    pub route: Route,
    /// add or withdraw
    pub action: RouteAction,
}

/// Filter for [`Rib::routes`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    /// only routes of this protocol
    pub protocol: Option<Protocol>,
    /// only routes leaving through this interface
    pub iface: Option<InterfaceId>,
    /// only the selected route per prefix
    pub selected_only: bool,
    /// only routes whose prefix contains this prefix (or equals it)
    pub prefix: Option<Prefix>,
}

impl RouteFilter {
    fn matches(&self, route: &Route) -> bool {
        self.protocol.map_or(true, |p| route.protocol == p)
            && self.iface.map_or(true, |i| route.iface == i)
            && self.prefix.map_or(true, |p| route.prefix == p)
    }
}

/// Callback invoked on every selection change: `(prefix, old_selected, new_selected)`.
pub type SelectionCallback = Box<dyn Fn(&Prefix, Option<&Route>, Option<&Route>) + Send + Sync>;

#[derive(Debug, Default)]
struct PrefixEntry {
    /// one candidate per source protocol; a re-advertisement replaces the previous candidate
    candidates: HashMap<Protocol, Route>,
    selected: Option<Route>,
}

impl PrefixEntry {
    /// Best-route selection: among active candidates, the minimum of (admin distance, metric,
    /// protocol rank, last-updated).
    fn best(&self) -> Option<&Route> {
        self.candidates
            .values()
            .filter(|r| r.active)
            .min_by(|a, b| {
                a.selection_key()
                    .cmp(&b.selection_key())
                    .then_with(|| a.last_updated.cmp(&b.last_updated))
            })
    }
}

/// Number of shards of the per-prefix map.
const NUM_SHARDS: usize = 16;

/// The routing information base of one router.
pub struct Rib {
    shards: Vec<Mutex<HashMap<Prefix, PrefixEntry>>>,
    fib: Arc<Fib>,
    callbacks: RwLock<Vec<SelectionCallback>>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Rib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rib").field("prefixes", &self.prefix_count()).finish()
    }
}

impl Rib {
    /// Create a RIB writing through to the given FIB.
    pub fn new(fib: Arc<Fib>, metrics: Arc<Metrics>) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            fib,
            callbacks: RwLock::new(Vec::new()),
            metrics,
        }
    }

    /// The FIB this RIB maintains.
    pub fn fib(&self) -> &Arc<Fib> {
        &self.fib
    }

    fn shard(&self, prefix: &Prefix) -> &Mutex<HashMap<Prefix, PrefixEntry>> {
        let mut hasher = DefaultHasher::new();
        prefix.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Register a callback invoked after every selection change.
    pub fn on_selection_change(&self, callback: SelectionCallback) {
        self.callbacks.write().push(callback);
    }

    /// Apply one route update: update the per-source candidate of the prefix, recompute the
    /// selection, mutate the FIB if the selection changed, and fire the callbacks. Infallible
    /// for well-formed routes; malformed input never reaches the merger (it is rejected at the
    /// protocol driver).
    pub fn apply_route_update(&self, update: RouteUpdate) {
        let prefix = update.route.prefix;
        let change = {
            let mut shard = self.shard(&prefix).lock();
            let entry = shard.entry(prefix).or_default();
            match update.action {
                RouteAction::Add => {
                    entry.candidates.insert(update.route.protocol, update.route);
                }
                RouteAction::Withdraw => {
                    entry.candidates.remove(&update.route.protocol);
                }
            }
            let change = self.reselect(&prefix, entry);
            if entry.candidates.is_empty() {
                shard.remove(&prefix);
            }
            change
        };
        self.fire(prefix, change);
    }

    /// Apply a batch of updates (e.g. one SPF result). Selection runs once per touched prefix.
    pub fn apply_batch(&self, updates: Vec<RouteUpdate>) {
        for update in updates {
            self.apply_route_update(update);
        }
    }

    /// Withdraw every route of one protocol in a single batch (source disconnect).
    pub fn withdraw_protocol(&self, protocol: Protocol) {
        let mut changes = Vec::new();
        for shard in self.shards.iter() {
            let mut guard = shard.lock();
            let mut empty = Vec::new();
            for (prefix, entry) in guard.iter_mut() {
                if entry.candidates.remove(&protocol).is_some() {
                    if let Some(change) = self.reselect(prefix, entry) {
                        changes.push((*prefix, Some(change)));
                    }
                    if entry.candidates.is_empty() {
                        empty.push(*prefix);
                    }
                }
            }
            for prefix in empty {
                guard.remove(&prefix);
            }
        }
        info!("withdrew all {} routes ({} selection changes)", protocol, changes.len());
        for (prefix, change) in changes {
            self.fire(prefix, change);
        }
    }

    /// Recompute the selection of one prefix; mutate the FIB and the route gauges on change.
    /// Returns the (old, new) pair if the selection changed. Called with the shard lock held.
    fn reselect(
        &self,
        prefix: &Prefix,
        entry: &mut PrefixEntry,
    ) -> Option<(Option<Route>, Option<Route>)> {
        let new = entry.best().cloned();
        if new == entry.selected {
            return None;
        }
        let old = entry.selected.take();
        entry.selected = new.clone();

        match (&old, &new) {
            (_, Some(route)) => {
                self.fib.install(*prefix, route.next_hop, route.iface);
                self.metrics.route_installed(route.protocol);
                if let Some(old_route) = &old {
                    self.metrics.route_withdrawn(old_route.protocol);
                }
                debug!("{}: selected {} via {}", prefix, route.protocol, route.next_hop);
            }
            (Some(old_route), None) => {
                self.fib.withdraw(prefix);
                self.metrics.route_withdrawn(old_route.protocol);
                debug!("{}: no route left, withdrawn from FIB", prefix);
            }
            (None, None) => {}
        }

        Some((old, new))
    }

    /// Invoke the selection-change callbacks outside the shard lock.
    fn fire(&self, prefix: Prefix, change: Option<(Option<Route>, Option<Route>)>) {
        if let Some((old, new)) = change {
            let callbacks = self.callbacks.read();
            for cb in callbacks.iter() {
                cb(&prefix, old.as_ref(), new.as_ref());
            }
        }
    }

    /// Read view over the candidate routes, snapshot-consistent per prefix.
    pub fn routes(&self, filter: &RouteFilter) -> Vec<Route> {
        let mut result = Vec::new();
        for shard in self.shards.iter() {
            let guard = shard.lock();
            for entry in guard.values() {
                if filter.selected_only {
                    if let Some(r) = entry.selected.as_ref().filter(|r| filter.matches(r)) {
                        result.push(r.clone());
                    }
                } else {
                    result.extend(entry.candidates.values().filter(|r| filter.matches(r)).cloned());
                }
            }
        }
        result.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        result
    }

    /// The selected route of one prefix, if any.
    pub fn selected(&self, prefix: &Prefix) -> Option<Route> {
        self.shard(prefix).lock().get(prefix).and_then(|e| e.selected.clone())
    }

    /// Number of prefixes with at least one candidate.
    pub fn prefix_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Number of selected routes per protocol.
    pub fn route_counts(&self) -> HashMap<Protocol, usize> {
        let mut counts = HashMap::new();
        for shard in self.shards.iter() {
            let guard = shard.lock();
            for entry in guard.values() {
                if let Some(r) = &entry.selected {
                    *counts.entry(r.protocol).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Export the selected routes to the flat text snapshot form, one route per line:
    /// `<prefix> <next_hop> <iface> <metric> <protocol> <admin_distance>`.
    pub fn export_snapshot(&self) -> String {
        let mut routes = self.routes(&RouteFilter { selected_only: true, ..Default::default() });
        routes.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        let body = routes
            .iter()
            .map(|r| {
                format!(
                    "{} {} {} {} {} {}",
                    r.prefix, r.next_hop, r.iface.0, r.metric, r.protocol, r.admin_distance
                )
            })
            .join("\n");
        if body.is_empty() {
            body
        } else {
            body + "\n"
        }
    }

    /// Parse a snapshot produced by [`Rib::export_snapshot`] back into routes. Malformed lines
    /// are skipped with a warning; the parsed routes are not applied automatically.
    pub fn parse_snapshot(snapshot: &str) -> Vec<Route> {
        let mut routes = Vec::new();
        for (lineno, line) in snapshot.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_snapshot_line(line) {
                Some(route) => routes.push(route),
                None => warn!("snapshot line {}: cannot parse {:?}", lineno + 1, line),
            }
        }
        routes
    }
}

fn parse_snapshot_line(line: &str) -> Option<Route> {
    let mut fields = line.split_whitespace();
    let prefix = Prefix::from_str(fields.next()?).ok()?;
    let next_hop = fields.next()?.parse().ok()?;
    let iface = InterfaceId(fields.next()?.parse().ok()?);
    let metric = fields.next()?.parse().ok()?;
    let protocol = Protocol::from_str(fields.next()?).ok()?;
    let admin_distance: u8 = fields.next()?.parse().ok()?;
    let mut route = Route::new(prefix, next_hop, iface, metric, protocol);
    route.admin_distance = admin_distance;
    Some(route)
}
