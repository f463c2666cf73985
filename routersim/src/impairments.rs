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

//! # Impairment pipeline
//!
//! In-process emulation of link impairments, applied per interface to packets in flight: delay
//! with configurable jitter distributions, loss (random, correlated, Gilbert-Elliott),
//! duplication, bit corruption, reordering and rate limiting. The stages of an interface execute
//! in declared order; a loss decision removes the packet and short-circuits the remaining
//! stages, a duplicate decision forks a copy that re-enters the remaining stages independently.
//!
//! The random number generator is owned by the pipeline, one per interface and direction. Seeds
//! are recorded and reproducible for tests; the default runtime seed is entropy-based.

use crate::packet::Packet;
use crate::shaping::TokenBucket;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Pareto};
use std::time::{Duration, Instant};

/// Jitter distribution of a delay stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayDistribution {
    /// uniform in `mean +- jitter`
    Uniform,
    /// normal with standard deviation `jitter`
    Normal,
    /// heavy-tailed pareto, shifted to mean `mean` and scaled by `jitter`
    Pareto,
    /// mix of one quarter normal and three quarters pareto
    ParetoNormal,
}

/// Loss model of a loss stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossModel {
    /// independent Bernoulli loss with probability `p`
    Random {
        /// loss probability
        p: f64,
    },
    /// first-order Markov chain: `P(loss | loss) = p + rho * (1 - p)`,
    /// `P(loss | ok) = p * (1 - rho)`
    Correlated {
        /// base loss probability
        p: f64,
        /// correlation with the previous decision
        rho: f64,
    },
    /// two-state Gilbert-Elliott chain. `p` is the good-to-bad and `r` the bad-to-good
    /// transition probability; `k` and `h` are the delivery probabilities in the good and the
    /// bad state.
    GilbertElliott {
        /// good to bad transition probability
        p: f64,
        /// bad to good transition probability
        r: f64,
        /// delivery probability in the bad state
        h: f64,
        /// delivery probability in the good state
        k: f64,
    },
}

/// One impairment stage, as declared in the per-interface configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ImpairmentStage {
    /// delay every packet by a draw from the distribution, clamped to >= 0
    Delay {
        /// mean delay
        mean: Duration,
        /// jitter scale
        jitter: Duration,
        /// distribution of the draw
        distribution: DelayDistribution,
    },
    /// drop packets according to the model
    Loss(LossModel),
    /// with probability `p`, emit a second copy that re-enters the remaining stages
    Duplicate {
        /// duplication probability
        p: f64,
    },
    /// with probability `p`, flip one random bit of the frame (copy-on-write)
    Corrupt {
        /// corruption probability
        p: f64,
    },
    /// with probability `p`, hold the packet back by `gap` positions in the output order
    Reorder {
        /// reorder probability
        p: f64,
        /// number of positions to push the packet back
        gap: u64,
    },
    /// rate limit through an internal token bucket; insufficient tokens defer the emission
    Rate {
        /// sustained rate in bits per second
        bps: u64,
        /// burst allowance in bytes
        burst: u64,
    },
}

/// Outcome of running one packet through a pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// deliver the packet at the given time (`emit_time >= now`)
    Deliver(Packet, Instant),
    /// the packet was lost
    Drop,
    /// the packet was duplicated; all emissions with their emit times, original first
    Duplicate(Vec<(Packet, Instant)>),
    /// the rate stage pushed the emission into the future
    Defer(Packet, Instant),
}

/// Internal per-stage state (configured parameters plus the mutable model state).
#[derive(Debug)]
enum StageState {
    Delay {
        mean_s: f64,
        jitter_s: f64,
        normal: Option<Normal<f64>>,
        pareto: Option<Pareto<f64>>,
        distribution: DelayDistribution,
    },
    Loss {
        model: LossModel,
        last_lost: bool,
        in_bad_state: bool,
    },
    Duplicate {
        p: f64,
    },
    Corrupt {
        p: f64,
    },
    Reorder {
        p: f64,
        gap: u64,
    },
    Rate {
        bucket: TokenBucket,
    },
}

/// Mean of a Pareto(1, 3) draw, used to center the shifted pareto jitter on the configured mean.
const PARETO_SHAPE: f64 = 3.0;
const PARETO_MEAN: f64 = PARETO_SHAPE / (PARETO_SHAPE - 1.0);

struct Emission {
    packet: Packet,
    emit_time: Instant,
    deferred: bool,
}

/// An ordered impairment pipeline of one interface and direction.
#[derive(Debug)]
pub struct ImpairmentPipeline {
    stages: Vec<StageState>,
    rng: StdRng,
    seed: u64,
    next_dup_id: u64,
}

impl ImpairmentPipeline {
    /// Create a pipeline with an entropy-based seed.
    pub fn new(stages: Vec<ImpairmentStage>, now: Instant) -> Self {
        Self::with_seed(stages, rand::random(), now)
    }

    /// Create a pipeline with a fixed seed (reproducible runs and tests).
    pub fn with_seed(stages: Vec<ImpairmentStage>, seed: u64, now: Instant) -> Self {
        let stages = stages
            .into_iter()
            .map(|s| match s {
                ImpairmentStage::Delay { mean, jitter, distribution } => {
                    let mean_s = mean.as_secs_f64();
                    let jitter_s = jitter.as_secs_f64();
                    StageState::Delay {
                        mean_s,
                        jitter_s,
                        normal: Normal::new(mean_s, jitter_s).ok(),
                        pareto: Pareto::new(1.0, PARETO_SHAPE).ok(),
                        distribution,
                    }
                }
                ImpairmentStage::Loss(model) => {
                    StageState::Loss { model, last_lost: false, in_bad_state: false }
                }
                ImpairmentStage::Duplicate { p } => StageState::Duplicate { p },
                ImpairmentStage::Corrupt { p } => StageState::Corrupt { p },
                ImpairmentStage::Reorder { p, gap } => StageState::Reorder { p, gap },
                ImpairmentStage::Rate { bps, burst } => StageState::Rate {
                    bucket: TokenBucket::new(burst, (bps / 8).max(1), now),
                },
            })
            .collect();
        Self { stages, rng: StdRng::seed_from_u64(seed), seed, next_dup_id: 1 << 63 }
    }

    /// The recorded seed of the pipeline's random number generator.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run one packet through all stages in declared order.
    pub fn apply(&mut self, packet: Packet, now: Instant) -> PipelineOutcome {
        let mut emissions = Vec::with_capacity(1);
        self.run(packet, now, now, 0, &mut emissions);
        match emissions.len() {
            0 => PipelineOutcome::Drop,
            1 => {
                let e = emissions.pop().unwrap();
                if e.deferred {
                    PipelineOutcome::Defer(e.packet, e.emit_time)
                } else {
                    PipelineOutcome::Deliver(e.packet, e.emit_time)
                }
            }
            _ => PipelineOutcome::Duplicate(
                emissions.into_iter().map(|e| (e.packet, e.emit_time)).collect(),
            ),
        }
    }

    /// Run `packet` through the stages starting at `first`, collecting all emissions. Lost
    /// packets produce no emission. A duplicate forks here and re-enters the remaining stages.
    fn run(
        &mut self,
        mut packet: Packet,
        mut emit_time: Instant,
        now: Instant,
        first: usize,
        out: &mut Vec<Emission>,
    ) {
        let mut deferred = false;
        let mut alive = true;
        let mut forks: Vec<(Packet, Instant, usize)> = Vec::new();
        let mut i = first;
        while alive && i < self.stages.len() {
            let mut fork: Option<Packet> = None;
            let rng = &mut self.rng;
            let next_dup_id = &mut self.next_dup_id;
            match &mut self.stages[i] {
                StageState::Delay { mean_s, jitter_s, normal, pareto, distribution } => {
                    let d = match distribution {
                        DelayDistribution::Uniform => {
                            *mean_s + rng.gen_range(-1.0..=1.0) * *jitter_s
                        }
                        DelayDistribution::Normal => {
                            normal.map(|n| n.sample(rng)).unwrap_or(*mean_s)
                        }
                        DelayDistribution::Pareto => {
                            let x = pareto.map(|p| p.sample(rng)).unwrap_or(PARETO_MEAN);
                            *mean_s + (x - PARETO_MEAN) * *jitter_s
                        }
                        DelayDistribution::ParetoNormal => {
                            let n = normal.map(|n| n.sample(&mut *rng)).unwrap_or(*mean_s);
                            let x = pareto.map(|p| p.sample(&mut *rng)).unwrap_or(PARETO_MEAN);
                            0.25 * n + 0.75 * (*mean_s + (x - PARETO_MEAN) * *jitter_s)
                        }
                    };
                    emit_time += Duration::from_secs_f64(d.max(0.0));
                }
                StageState::Loss { model, last_lost, in_bad_state } => {
                    let draw: f64 = rng.gen();
                    let lost = match model {
                        LossModel::Random { p } => draw < *p,
                        LossModel::Correlated { p, rho } => {
                            let p_loss = if *last_lost {
                                *p + *rho * (1.0 - *p)
                            } else {
                                *p * (1.0 - *rho)
                            };
                            draw < p_loss
                        }
                        LossModel::GilbertElliott { p, r, h, k } => {
                            // advance the chain on the first draw, decide in the new state
                            if *in_bad_state {
                                if draw < *r {
                                    *in_bad_state = false;
                                }
                            } else if draw < *p {
                                *in_bad_state = true;
                            }
                            let deliver_p = if *in_bad_state { *h } else { *k };
                            rng.gen::<f64>() >= deliver_p
                        }
                    };
                    *last_lost = lost;
                    if lost {
                        alive = false;
                    }
                }
                StageState::Duplicate { p } => {
                    if rng.gen::<f64>() < *p {
                        *next_dup_id += 1;
                        fork = Some(packet.fork(*next_dup_id));
                    }
                }
                StageState::Corrupt { p } => {
                    if rng.gen::<f64>() < *p {
                        let bit = rng.gen::<usize>();
                        packet.corrupt_bit(bit);
                    }
                }
                StageState::Reorder { p, gap } => {
                    if rng.gen::<f64>() < *p {
                        packet.push_back_order(*gap);
                    }
                }
                StageState::Rate { bucket } => {
                    let ready = bucket.reserve(packet.len() as u64, emit_time.max(now));
                    if ready > emit_time {
                        emit_time = ready;
                        deferred = true;
                    }
                }
            }
            if let Some(copy) = fork {
                forks.push((copy, emit_time, i + 1));
            }
            i += 1;
        }
        if alive {
            out.push(Emission { packet, emit_time, deferred });
        }
        // copies forked along the way re-enter the remaining stages independently, even when
        // the original was lost afterwards
        for (copy, copy_emit, next_stage) in forks {
            self.run(copy, copy_emit, now, next_stage, out);
        }
    }
}

/// Prepared impairment scenarios, mirroring the canned profiles of the original netem manager.
pub mod scenarios {
    use super::*;

    /// Satellite-like path: large delay with moderate normal jitter.
    pub fn high_latency() -> Vec<ImpairmentStage> {
        vec![ImpairmentStage::Delay {
            mean: Duration::from_millis(500),
            jitter: Duration::from_millis(50),
            distribution: DelayDistribution::Normal,
        }]
    }

    /// Plain random loss.
    pub fn lossy() -> Vec<ImpairmentStage> {
        vec![ImpairmentStage::Loss(LossModel::Random { p: 0.05 })]
    }

    /// Bursty loss with duplication and corruption.
    pub fn unreliable() -> Vec<ImpairmentStage> {
        vec![
            ImpairmentStage::Loss(LossModel::GilbertElliott { p: 0.02, r: 0.3, h: 0.3, k: 0.99 }),
            ImpairmentStage::Duplicate { p: 0.01 },
            ImpairmentStage::Corrupt { p: 0.005 },
        ]
    }

    /// Congested bottleneck: queuing delay, reordering, and a tight rate limit.
    pub fn congested() -> Vec<ImpairmentStage> {
        vec![
            ImpairmentStage::Delay {
                mean: Duration::from_millis(80),
                jitter: Duration::from_millis(40),
                distribution: DelayDistribution::ParetoNormal,
            },
            ImpairmentStage::Reorder { p: 0.02, gap: 4 },
            ImpairmentStage::Rate { bps: 2_000_000, burst: 32_000 },
        ]
    }
}
