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

//! Token bucket rate limiter and the single-class shaper built on top of it.

use super::{ClassId, Shaper, ShapingStats};
use crate::packet::Packet;
use crate::Error;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Token bucket over integer bytes. Tokens refill continuously at `rate` bytes per second up to
/// `capacity` bytes. All arithmetic is integer on nanosecond timestamps; the fractional token
/// remainder of each refill is carried forward, so the long-run rate does not drift.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    rate: u64,
    tokens: u64,
    last_refill: Instant,
    carry_nanos: u128,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(capacity: u64, rate: u64, now: Instant) -> Self {
        Self { capacity, rate, tokens: capacity, last_refill: now, carry_nanos: 0 }
    }

    /// Refill tokens for the time elapsed since the last refill. Called on entry to every
    /// consume decision.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        if self.rate == 0 {
            return;
        }
        let weighted = self.rate as u128 * elapsed.as_nanos() + self.carry_nanos;
        let add = (weighted / NANOS_PER_SEC) as u64;
        self.carry_nanos = weighted % NANOS_PER_SEC;
        self.tokens = self.tokens.saturating_add(add).min(self.capacity);
        if self.tokens == self.capacity {
            self.carry_nanos = 0;
        }
    }

    /// Consume `n` bytes if the bucket holds at least that many tokens. Returns true on
    /// success; on failure the bucket is left unchanged apart from the refill.
    pub fn try_consume(&mut self, n: u64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Consume `n` bytes unconditionally and return the instant at which the consumption is
    /// covered. If the tokens are already there, that is `now`; otherwise the bucket is drained
    /// and its refill clock advanced past `now`, which prices the deficit into future refills.
    /// Used by the rate impairment stage, which defers instead of dropping.
    pub fn reserve(&mut self, n: u64, now: Instant) -> Instant {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            return now;
        }
        if self.rate == 0 {
            // nothing will ever refill; admit immediately rather than deferring forever
            return now;
        }
        let deficit = n - self.tokens;
        self.tokens = 0;
        let wait_nanos =
            (deficit as u128 * NANOS_PER_SEC).saturating_sub(self.carry_nanos) / self.rate as u128;
        self.carry_nanos = 0;
        let ready = now + Duration::from_nanos(wait_nanos as u64);
        self.last_refill = ready;
        ready
    }

    /// The instant at which the bucket will hold `n` tokens, without consuming anything.
    pub fn eligible_at(&self, n: u64, now: Instant) -> Option<Instant> {
        let mut probe = self.clone();
        probe.refill(now);
        if probe.tokens >= n {
            return Some(now);
        }
        if probe.rate == 0 {
            return None;
        }
        let deficit = n - probe.tokens;
        let wait_nanos =
            (deficit as u128 * NANOS_PER_SEC).saturating_sub(probe.carry_nanos) / probe.rate as u128;
        Some(now + Duration::from_nanos(wait_nanos as u64 + 1))
    }

    /// Current token count, refreshed to `now`.
    pub fn tokens(&mut self, now: Instant) -> u64 {
        self.refill(now);
        self.tokens
    }

    /// The configured capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The configured refill rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.rate
    }
}

/// Single-class shaper: a FIFO in front of a token bucket. A packet leaves the queue once the
/// bucket covers its size; the bucket itself never queues. Enqueues beyond the depth limit are
/// tail-dropped with [`Error::QueueFull`].
#[derive(Debug)]
pub struct TokenBucketShaper {
    bucket: TokenBucket,
    queue: VecDeque<Packet>,
    depth_limit: usize,
    stats: ShapingStats,
}

impl TokenBucketShaper {
    /// Create a shaper with the given bucket parameters and queue depth.
    pub fn new(capacity: u64, rate: u64, depth_limit: usize, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(capacity, rate, now),
            queue: VecDeque::new(),
            depth_limit,
            stats: ShapingStats::default(),
        }
    }

    /// Current token count of the underlying bucket.
    pub fn tokens(&mut self, now: Instant) -> u64 {
        self.bucket.tokens(now)
    }
}

impl Shaper for TokenBucketShaper {
    fn enqueue(&mut self, _class: ClassId, packet: Packet, _now: Instant) -> Result<(), Error> {
        if self.queue.len() >= self.depth_limit {
            self.stats.packets_dropped += 1;
            self.stats.bytes_dropped += packet.len() as u64;
            return Err(Error::QueueFull(self.depth_limit));
        }
        self.queue.push_back(packet);
        Ok(())
    }

    fn dequeue(&mut self, now: Instant) -> Option<Packet> {
        let head_len = self.queue.front()?.len() as u64;
        if self.bucket.try_consume(head_len, now) {
            let packet = self.queue.pop_front().unwrap();
            self.stats.packets_processed += 1;
            self.stats.bytes_processed += head_len;
            Some(packet)
        } else {
            None
        }
    }

    fn queue_depth(&self, _class: Option<ClassId>) -> usize {
        self.queue.len()
    }

    fn stats(&self) -> ShapingStats {
        self.stats
    }

    fn next_eligible(&self) -> Option<Instant> {
        let head_len = self.queue.front()?.len() as u64;
        self.bucket.eligible_at(head_len, self.bucket.last_refill)
    }
}
