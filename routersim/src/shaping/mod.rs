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

//! # Traffic shaping
//!
//! Three interchangeable per-interface disciplines behind one trait: a single-class token bucket
//! ([`token_bucket::TokenBucketShaper`]), weighted fair queuing with virtual-time scheduling
//! ([`wfq::WfqScheduler`]), and deficit round robin ([`drr::DrrScheduler`]).
//!
//! The shaper owns the queue; callers enqueue classified packets and the per-interface worker
//! dequeues them in discipline order. All time-dependent decisions take the current instant as an
//! argument, so tests drive the clock explicitly.

pub mod drr;
pub mod token_bucket;
pub mod wfq;

use crate::packet::Packet;
use crate::Error;
use std::time::Instant;

pub use token_bucket::{TokenBucket, TokenBucketShaper};

/// Identification of a traffic class (as assigned by the classifier).
pub type ClassId = u8;

/// Configuration of one traffic class of a multi-class discipline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficClass {
    /// class identification
    pub id: ClassId,
    /// scheduling weight, at least 1
    pub weight: u32,
    /// guaranteed bandwidth in bits per second
    pub min_bandwidth: u64,
    /// bandwidth ceiling in bits per second (`min_bandwidth <= max_bandwidth`)
    pub max_bandwidth: u64,
    /// inactive classes reject enqueues
    pub active: bool,
}

impl TrafficClass {
    /// A class with the given id and weight and no bandwidth bounds.
    pub fn new(id: ClassId, weight: u32) -> Self {
        Self { id, weight: weight.max(1), min_bandwidth: 0, max_bandwidth: u64::MAX, active: true }
    }
}

/// One queued packet, together with its scheduling state.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// the owned packet
    pub packet: Packet,
    /// class the packet was enqueued under
    pub class: ClassId,
    /// monotonic enqueue timestamp
    pub enqueued_at: Instant,
    /// virtual finish time (WFQ only; monotonically non-decreasing within a class)
    pub finish_time: f64,
}

/// Per-class statistics of a shaper, as kept by the original statistics surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapingStats {
    /// packets accepted and later dequeued
    pub packets_processed: u64,
    /// packets rejected at enqueue
    pub packets_dropped: u64,
    /// bytes accepted and later dequeued
    pub bytes_processed: u64,
    /// bytes rejected at enqueue
    pub bytes_dropped: u64,
}

/// Common contract of the three shaping disciplines.
pub trait Shaper: Send + std::fmt::Debug {
    /// Enqueue a packet under a class. Fails with [`Error::QueueFull`] if the class queue is at
    /// its depth limit, and with [`Error::InvalidConfig`] if the class does not exist or is
    /// inactive.
    fn enqueue(&mut self, class: ClassId, packet: Packet, now: Instant) -> Result<(), Error>;

    /// Dequeue the next packet in discipline order, or `None` if nothing is eligible at `now`
    /// (empty queues, or insufficient tokens for the head packet).
    fn dequeue(&mut self, now: Instant) -> Option<Packet>;

    /// Depth of one class queue, or of all queues combined.
    fn queue_depth(&self, class: Option<ClassId>) -> usize;

    /// Aggregate statistics since creation.
    fn stats(&self) -> ShapingStats;

    /// The earliest instant at which a head packet may become eligible, if the discipline is
    /// currently blocked on time (token refill). `None` means a dequeue is either possible right
    /// away or waits for new packets.
    fn next_eligible(&self) -> Option<Instant> {
        None
    }
}
