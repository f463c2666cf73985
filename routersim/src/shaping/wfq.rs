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

//! Weighted fair queuing with virtual-time scheduling.

use super::{ClassId, QueueItem, Shaper, ShapingStats, TrafficClass};
use crate::packet::Packet;
use crate::Error;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

#[derive(Debug)]
struct WfqClass {
    config: TrafficClass,
    queue: VecDeque<QueueItem>,
    /// finish time of the most recently enqueued item; never decreases within the class
    last_finish: f64,
}

/// Weighted fair queuing over N classes.
///
/// Each enqueued packet is stamped with a virtual finish time `max(V, F_c) + len * 8 / w_c`,
/// where `V` is the global virtual time, `F_c` the last finish time of its class, and `w_c` the
/// class weight. Dequeue always serves the head item with the smallest finish time across all
/// non-empty classes (ties go to the lower class id), and advances `V` to that finish time. Over
/// long horizons, the service share of a class converges to `w_c / sum(w)`.
#[derive(Debug)]
pub struct WfqScheduler {
    /// BTreeMap so that iteration is in class-id order, which makes the tie-break implicit
    classes: BTreeMap<ClassId, WfqClass>,
    virtual_time: f64,
    depth_limit: usize,
    stats: ShapingStats,
}

impl WfqScheduler {
    /// Create a scheduler with the given classes and per-class depth limit.
    pub fn new(classes: Vec<TrafficClass>, depth_limit: usize) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|c| {
                    (c.id, WfqClass { config: c, queue: VecDeque::new(), last_finish: 0.0 })
                })
                .collect(),
            virtual_time: 0.0,
            depth_limit,
            stats: ShapingStats::default(),
        }
    }

    /// The current global virtual time.
    pub fn virtual_time(&self) -> f64 {
        self.virtual_time
    }

    /// The id of the class whose head has the smallest finish time.
    fn next_class(&self) -> Option<ClassId> {
        let mut best: Option<(f64, ClassId)> = None;
        for (id, class) in self.classes.iter() {
            if let Some(item) = class.queue.front() {
                // strict less-than keeps the lowest class id on ties
                if best.map_or(true, |(f, _)| item.finish_time < f) {
                    best = Some((item.finish_time, *id));
                }
            }
        }
        best.map(|(_, id)| id)
    }
}

impl Shaper for WfqScheduler {
    fn enqueue(&mut self, class: ClassId, packet: Packet, now: Instant) -> Result<(), Error> {
        let virtual_time = self.virtual_time;
        let c = match self.classes.get_mut(&class) {
            Some(c) if c.config.active => c,
            _ => {
                self.stats.packets_dropped += 1;
                self.stats.bytes_dropped += packet.len() as u64;
                return Err(Error::InvalidConfig {
                    field: "class".to_string(),
                    reason: format!("traffic class {} is not configured", class),
                });
            }
        };
        if c.queue.len() >= self.depth_limit {
            self.stats.packets_dropped += 1;
            self.stats.bytes_dropped += packet.len() as u64;
            return Err(Error::QueueFull(self.depth_limit));
        }
        let finish = virtual_time.max(c.last_finish)
            + packet.len() as f64 * 8.0 / c.config.weight.max(1) as f64;
        c.last_finish = finish;
        c.queue.push_back(QueueItem { packet, class, enqueued_at: now, finish_time: finish });
        Ok(())
    }

    fn dequeue(&mut self, _now: Instant) -> Option<Packet> {
        let class = self.next_class()?;
        let c = self.classes.get_mut(&class).unwrap();
        let item = c.queue.pop_front().unwrap();
        if item.finish_time > self.virtual_time {
            self.virtual_time = item.finish_time;
        }
        self.stats.packets_processed += 1;
        self.stats.bytes_processed += item.packet.len() as u64;
        Some(item.packet)
    }

    fn queue_depth(&self, class: Option<ClassId>) -> usize {
        match class {
            Some(id) => self.classes.get(&id).map(|c| c.queue.len()).unwrap_or(0),
            None => self.classes.values().map(|c| c.queue.len()).sum(),
        }
    }

    fn stats(&self) -> ShapingStats {
        self.stats
    }
}
