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

//! # Metrics surface
//!
//! Counters, gauges and histograms incremented by the pipeline and the control plane, and read
//! by external collectors. The surface is plain atomics plus labeled maps; an exporter (e.g.
//! Prometheus) is an external consumer of [`Metrics::snapshot`].

use crate::types::{InterfaceId, Protocol};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why a packet was dropped. Used as the `reason` label of `packets_dropped_total`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub enum DropReason {
    /// no FIB entry covered the destination
    NoRoute,
    /// the frame could not be decoded
    Malformed,
    /// a bounded queue was at its depth limit
    QueueFull,
    /// a loss impairment removed the packet
    Impairment,
    /// the packet arrived while shutting down
    Shutdown,
}

impl DropReason {
    /// All reasons, for iteration over the counter array.
    pub const ALL: [DropReason; 5] = [
        DropReason::NoRoute,
        DropReason::Malformed,
        DropReason::QueueFull,
        DropReason::Impairment,
        DropReason::Shutdown,
    ];

    /// The label value of the reason.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoRoute => "no-route",
            Self::Malformed => "malformed",
            Self::QueueFull => "queue-full",
            Self::Impairment => "impairment",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Histogram with fixed bucket bounds, in seconds.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

/// Bucket bounds of `forward_latency_seconds`: 10us .. 10s, roughly logarithmic.
const LATENCY_BOUNDS: [f64; 12] =
    [1e-5, 5e-5, 1e-4, 5e-4, 1e-3, 5e-3, 1e-2, 5e-2, 1e-1, 5e-1, 1.0, 10.0];

impl Histogram {
    fn new() -> Self {
        Self {
            bounds: &LATENCY_BOUNDS,
            buckets: LATENCY_BOUNDS.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        for (i, bound) in self.bounds.iter().enumerate() {
            if secs <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add(value.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean of the observations, or zero if none were recorded.
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::from_secs(0);
        }
        Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed) / count)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> Duration {
        Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed))
    }

    /// Plain-value copy for export.
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.cumulative_buckets(),
            count: self.count(),
            sum: self.sum(),
        }
    }

    /// Cumulative bucket counts paired with their upper bounds.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut acc = 0;
        self.bounds
            .iter()
            .zip(self.buckets.iter())
            .map(|(bound, bucket)| {
                acc += bucket.load(Ordering::Relaxed);
                (*bound, acc)
            })
            .collect()
    }
}

/// All metrics of one router. Shared as `Arc<Metrics>` between the pipeline workers, the RIB
/// merger and the protocol drivers.
#[derive(Debug)]
pub struct Metrics {
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    dropped: [AtomicU64; 5],
    routes_installed: [AtomicU64; 5],
    route_count: [AtomicU64; 5],
    neighbors_established: [AtomicU64; 5],
    queue_depth: Mutex<HashMap<(InterfaceId, u8), u64>>,
    token_bucket_tokens: Mutex<HashMap<InterfaceId, u64>>,
    forward_latency: Mutex<HashMap<InterfaceId, std::sync::Arc<Histogram>>>,
    message_errors: [AtomicU64; 5],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a zeroed metrics surface.
    pub fn new() -> Self {
        Self {
            packets_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
            dropped: Default::default(),
            routes_installed: Default::default(),
            route_count: Default::default(),
            neighbors_established: Default::default(),
            queue_depth: Mutex::new(HashMap::new()),
            token_bucket_tokens: Mutex::new(HashMap::new()),
            forward_latency: Mutex::new(HashMap::new()),
            message_errors: Default::default(),
        }
    }

    /// Count one received packet.
    pub fn packet_in(&self) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one transmitted packet.
    pub fn packet_out(&self) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one dropped packet with its reason.
    pub fn drop_packet(&self, reason: DropReason) {
        self.dropped[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one route installation for a protocol and adjust the per-protocol route gauge.
    pub fn route_installed(&self, protocol: Protocol) {
        self.routes_installed[protocol.rank() as usize].fetch_add(1, Ordering::Relaxed);
        self.route_count[protocol.rank() as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the per-protocol route gauge after a withdrawal.
    pub fn route_withdrawn(&self, protocol: Protocol) {
        let gauge = &self.route_count[protocol.rank() as usize];
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Adjust the gauge of established neighbors of a protocol by +1 / -1.
    pub fn neighbor_established(&self, protocol: Protocol, up: bool) {
        let gauge = &self.neighbors_established[protocol.rank() as usize];
        if up {
            gauge.fetch_add(1, Ordering::Relaxed);
        } else {
            let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        }
    }

    /// Count one discarded protocol message.
    pub fn message_error(&self, protocol: Protocol) {
        self.message_errors[protocol.rank() as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Set the queue-depth gauge of one (interface, class).
    pub fn set_queue_depth(&self, iface: InterfaceId, class: u8, depth: u64) {
        self.queue_depth.lock().insert((iface, class), depth);
    }

    /// Set the token gauge of one interface's bucket.
    pub fn set_token_bucket_tokens(&self, iface: InterfaceId, tokens: u64) {
        self.token_bucket_tokens.lock().insert(iface, tokens);
    }

    /// Record one forwarding latency observation for an interface.
    pub fn observe_forward_latency(&self, iface: InterfaceId, latency: Duration) {
        let hist = {
            let mut guard = self.forward_latency.lock();
            guard.entry(iface).or_insert_with(|| std::sync::Arc::new(Histogram::new())).clone()
        };
        hist.observe(latency);
    }

    /// Take a consistent-enough snapshot for display or export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            dropped: DropReason::ALL
                .iter()
                .map(|r| (*r, self.dropped[*r as usize].load(Ordering::Relaxed)))
                .filter(|(_, v)| *v > 0)
                .collect(),
            routes_installed: Protocol::ALL
                .iter()
                .map(|p| (*p, self.routes_installed[p.rank() as usize].load(Ordering::Relaxed)))
                .filter(|(_, v)| *v > 0)
                .collect(),
            route_count: Protocol::ALL
                .iter()
                .map(|p| (*p, self.route_count[p.rank() as usize].load(Ordering::Relaxed)))
                .filter(|(_, v)| *v > 0)
                .collect(),
            neighbors_established: Protocol::ALL
                .iter()
                .map(|p| {
                    (*p, self.neighbors_established[p.rank() as usize].load(Ordering::Relaxed))
                })
                .filter(|(_, v)| *v > 0)
                .collect(),
            message_errors: Protocol::ALL
                .iter()
                .map(|p| (*p, self.message_errors[p.rank() as usize].load(Ordering::Relaxed)))
                .filter(|(_, v)| *v > 0)
                .collect(),
            queue_depth: self.queue_depth.lock().clone(),
            token_bucket_tokens: self.token_bucket_tokens.lock().clone(),
            forward_latency: self
                .forward_latency
                .lock()
                .iter()
                .map(|(iface, h)| (*iface, h.snapshot()))
                .collect(),
        }
    }

    /// Current value of the drop counter for a reason.
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason as usize].load(Ordering::Relaxed)
    }

    /// Current value of the `packets_in` counter.
    pub fn packets_in(&self) -> u64 {
        self.packets_in.load(Ordering::Relaxed)
    }

    /// Current value of the `packets_out` counter.
    pub fn packets_out(&self) -> u64 {
        self.packets_out.load(Ordering::Relaxed)
    }
}

/// Plain-value copy of one histogram: cumulative bucket counts with their upper bounds, the
/// total observation count, and the sum of all observations.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// cumulative counts per upper bound, in bound order
    pub buckets: Vec<(f64, u64)>,
    /// number of observations (including those above the largest bound)
    pub count: u64,
    /// sum of all observations
    pub sum: Duration,
}

impl HistogramSnapshot {
    /// Mean of the observations, or zero if none were recorded.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::from_secs(0);
        }
        Duration::from_nanos((self.sum.as_nanos() / self.count as u128) as u64)
    }
}

/// Plain-value snapshot of the metrics surface.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// total received packets
    pub packets_in: u64,
    /// total transmitted packets
    pub packets_out: u64,
    /// dropped packets by reason (zero counters omitted)
    pub dropped: Vec<(DropReason, u64)>,
    /// route installations by protocol
    pub routes_installed: Vec<(Protocol, u64)>,
    /// currently selected routes by protocol
    pub route_count: Vec<(Protocol, u64)>,
    /// established neighbors by protocol
    pub neighbors_established: Vec<(Protocol, u64)>,
    /// discarded protocol messages by protocol
    pub message_errors: Vec<(Protocol, u64)>,
    /// queue depth by (interface, class)
    pub queue_depth: HashMap<(InterfaceId, u8), u64>,
    /// token gauge by interface
    pub token_bucket_tokens: HashMap<InterfaceId, u64>,
    /// forwarding latency histogram by interface
    pub forward_latency: HashMap<InterfaceId, HistogramSnapshot>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "packets_in {}", self.packets_in)?;
        writeln!(f, "packets_out {}", self.packets_out)?;
        for (reason, v) in &self.dropped {
            writeln!(f, "packets_dropped_total{{reason=\"{}\"}} {}", reason.name(), v)?;
        }
        for (proto, v) in &self.routes_installed {
            writeln!(f, "routes_installed_total{{protocol=\"{}\"}} {}", proto, v)?;
        }
        for (proto, v) in &self.route_count {
            writeln!(f, "route_count{{protocol=\"{}\"}} {}", proto, v)?;
        }
        for (proto, v) in &self.neighbors_established {
            writeln!(f, "neighbors_established{{protocol=\"{}\"}} {}", proto, v)?;
        }
        for ((iface, class), v) in &self.queue_depth {
            writeln!(f, "queue_depth{{interface=\"{}\",class=\"{}\"}} {}", iface, class, v)?;
        }
        for (iface, v) in &self.token_bucket_tokens {
            writeln!(f, "token_bucket_tokens{{interface=\"{}\"}} {}", iface, v)?;
        }
        for (iface, hist) in &self.forward_latency {
            for (bound, cumulative) in &hist.buckets {
                writeln!(
                    f,
                    "forward_latency_seconds_bucket{{interface=\"{}\",le=\"{}\"}} {}",
                    iface, bound, cumulative
                )?;
            }
            writeln!(
                f,
                "forward_latency_seconds_bucket{{interface=\"{}\",le=\"+Inf\"}} {}",
                iface, hist.count
            )?;
            writeln!(
                f,
                "forward_latency_seconds_sum{{interface=\"{}\"}} {}",
                iface,
                hist.sum.as_secs_f64()
            )?;
            writeln!(f, "forward_latency_seconds_count{{interface=\"{}\"}} {}", iface, hist.count)?;
        }
        Ok(())
    }
}
