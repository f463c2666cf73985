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

//! Deficit round robin scheduling.

use super::{ClassId, QueueItem, Shaper, ShapingStats, TrafficClass};
use crate::packet::Packet;
use crate::Error;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

#[derive(Debug)]
struct DrrClass {
    config: TrafficClass,
    quantum: u64,
    deficit: u64,
    queue: VecDeque<QueueItem>,
    in_active_list: bool,
}

/// Deficit round robin over N classes.
///
/// Each class holds a quantum of `base_quantum * weight` bytes. The active list is walked round
/// robin: the class at the front keeps sending while its deficit covers its head packet; when the
/// head is too large, the quantum is added to the deficit and the class moves to the back. A
/// class that runs empty has its deficit reset to zero and leaves the active list; newly active
/// classes are appended. Amortized O(1) per packet.
#[derive(Debug)]
pub struct DrrScheduler {
    classes: HashMap<ClassId, DrrClass>,
    active: VecDeque<ClassId>,
    depth_limit: usize,
    stats: ShapingStats,
}

impl DrrScheduler {
    /// Create a scheduler. Each class's quantum is `base_quantum * weight` bytes.
    pub fn new(classes: Vec<TrafficClass>, base_quantum: u64, depth_limit: usize) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|c| {
                    let quantum = base_quantum.max(1) * c.weight.max(1) as u64;
                    (
                        c.id,
                        DrrClass {
                            config: c,
                            quantum,
                            deficit: 0,
                            queue: VecDeque::new(),
                            in_active_list: false,
                        },
                    )
                })
                .collect(),
            active: VecDeque::new(),
            depth_limit,
            stats: ShapingStats::default(),
        }
    }

    /// The remaining deficit of a class (testing and inspection).
    pub fn deficit(&self, class: ClassId) -> Option<u64> {
        self.classes.get(&class).map(|c| c.deficit)
    }
}

impl Shaper for DrrScheduler {
    fn enqueue(&mut self, class: ClassId, packet: Packet, now: Instant) -> Result<(), Error> {
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
        c.queue.push_back(QueueItem { packet, class, enqueued_at: now, finish_time: 0.0 });
        if !c.in_active_list {
            c.in_active_list = true;
            self.active.push_back(class);
        }
        Ok(())
    }

    fn dequeue(&mut self, _now: Instant) -> Option<Packet> {
        if self.active.is_empty() {
            return None;
        }
        loop {
            let class = *self.active.front().unwrap();
            let c = self.classes.get_mut(&class).unwrap();
            let head_len = c.queue.front().unwrap().packet.len() as u64;
            if c.deficit >= head_len {
                let item = c.queue.pop_front().unwrap();
                c.deficit -= head_len;
                if c.queue.is_empty() {
                    c.deficit = 0;
                    c.in_active_list = false;
                    self.active.pop_front();
                }
                self.stats.packets_processed += 1;
                self.stats.bytes_processed += head_len;
                return Some(item.packet);
            }
            // head too large: replenish and move on to the next class in the round
            c.deficit += c.quantum;
            let id = self.active.pop_front().unwrap();
            self.active.push_back(id);
        }
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
