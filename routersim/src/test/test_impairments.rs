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

use super::util::packet;
use crate::impairments::{
    scenarios, DelayDistribution, ImpairmentPipeline, ImpairmentStage, LossModel, PipelineOutcome,
};
use std::time::{Duration, Instant};

fn pipeline(stages: Vec<ImpairmentStage>, seed: u64) -> ImpairmentPipeline {
    ImpairmentPipeline::with_seed(stages, seed, Instant::now())
}

/// Run `n` packets through the pipeline and count the surviving emissions.
fn survivors(pipe: &mut ImpairmentPipeline, n: u64) -> Vec<u64> {
    let now = Instant::now();
    let mut out = Vec::new();
    for i in 0..n {
        match pipe.apply(packet(i, 64), now) {
            PipelineOutcome::Deliver(p, _) | PipelineOutcome::Defer(p, _) => out.push(p.id()),
            PipelineOutcome::Duplicate(list) => out.extend(list.iter().map(|(p, _)| p.id())),
            PipelineOutcome::Drop => {}
        }
    }
    out
}

#[test]
fn random_loss_converges_to_p() {
    let mut pipe = pipeline(vec![ImpairmentStage::Loss(LossModel::Random { p: 0.1 })], 42);
    let delivered = survivors(&mut pipe, 10_000).len();
    let loss = 1.0 - delivered as f64 / 10_000.0;
    assert!((0.085..=0.115).contains(&loss), "observed loss {}", loss);
}

#[test]
fn random_loss_preserves_the_order_of_survivors() {
    let mut pipe = pipeline(vec![ImpairmentStage::Loss(LossModel::Random { p: 0.3 })], 7);
    let ids = survivors(&mut pipe, 1_000);
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn correlated_loss_has_the_stationary_rate_p() {
    // the chain's stationary loss probability equals p independent of the correlation
    let mut pipe = pipeline(
        vec![ImpairmentStage::Loss(LossModel::Correlated { p: 0.2, rho: 0.6 })],
        1234,
    );
    let delivered = survivors(&mut pipe, 20_000).len();
    let loss = 1.0 - delivered as f64 / 20_000.0;
    assert!((0.17..=0.23).contains(&loss), "observed loss {}", loss);
}

#[test]
fn gilbert_elliott_loss_matches_the_two_state_model() {
    // stationary bad-state probability p/(p+r) = 1/6; loss = 1/6 * (1-h) + 5/6 * (1-k)
    let mut pipe = pipeline(
        vec![ImpairmentStage::Loss(LossModel::GilbertElliott {
            p: 0.1,
            r: 0.5,
            h: 0.2,
            k: 1.0,
        })],
        99,
    );
    let delivered = survivors(&mut pipe, 30_000).len();
    let loss = 1.0 - delivered as f64 / 30_000.0;
    assert!((0.10..=0.17).contains(&loss), "observed loss {}", loss);
}

#[test]
fn delay_without_jitter_is_exact() {
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Delay {
            mean: Duration::from_millis(50),
            jitter: Duration::from_millis(0),
            distribution: DelayDistribution::Uniform,
        }],
        1,
        now,
    );
    match pipe.apply(packet(1, 64), now) {
        PipelineOutcome::Deliver(_, emit) => {
            assert_eq!(emit, now + Duration::from_millis(50));
        }
        other => panic!("expected a delivery, got {:?}", other),
    }
}

#[test]
fn delay_draws_are_clamped_to_zero() {
    // jitter far larger than the mean: negative draws must clamp, never panic
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Delay {
            mean: Duration::from_millis(1),
            jitter: Duration::from_millis(500),
            distribution: DelayDistribution::Normal,
        }],
        3,
        now,
    );
    for i in 0..500 {
        match pipe.apply(packet(i, 64), now) {
            PipelineOutcome::Deliver(_, emit) => assert!(emit >= now),
            other => panic!("expected a delivery, got {:?}", other),
        }
    }
}

#[test]
fn pareto_delays_are_heavy_tailed_but_nonnegative() {
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Delay {
            mean: Duration::from_millis(30),
            jitter: Duration::from_millis(10),
            distribution: DelayDistribution::Pareto,
        }],
        11,
        now,
    );
    let mut total = Duration::from_secs(0);
    for i in 0..2_000 {
        match pipe.apply(packet(i, 64), now) {
            PipelineOutcome::Deliver(_, emit) => total += emit - now,
            other => panic!("expected a delivery, got {:?}", other),
        }
    }
    let mean = total / 2_000;
    // centered on the configured mean within a few milliseconds
    assert!(mean > Duration::from_millis(25) && mean < Duration::from_millis(35));
}

#[test]
fn duplicate_forks_an_independent_copy() {
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Duplicate { p: 1.0 }],
        5,
        now,
    );
    match pipe.apply(packet(1, 64), now) {
        PipelineOutcome::Duplicate(list) => {
            assert_eq!(list.len(), 2);
            assert_eq!(list[0].0.id(), 1);
            assert_ne!(list[1].0.id(), 1);
            assert_eq!(list[0].0.wire(), list[1].0.wire());
        }
        other => panic!("expected a duplication, got {:?}", other),
    }
}

#[test]
fn duplicates_reenter_the_remaining_stages() {
    // duplicate, then corrupt with certainty: both copies must differ from the original
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Duplicate { p: 1.0 }, ImpairmentStage::Corrupt { p: 1.0 }],
        6,
        now,
    );
    let original = packet(1, 64);
    let wire = original.wire().to_vec();
    match pipe.apply(original, now) {
        PipelineOutcome::Duplicate(list) => {
            assert_eq!(list.len(), 2);
            for (p, _) in &list {
                assert_ne!(p.wire(), &wire[..]);
            }
        }
        other => panic!("expected a duplication, got {:?}", other),
    }
}

#[test]
fn loss_short_circuits_later_stages() {
    // a lost packet never reaches the duplicate stage
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![
            ImpairmentStage::Loss(LossModel::Random { p: 1.0 }),
            ImpairmentStage::Duplicate { p: 1.0 },
        ],
        8,
        now,
    );
    assert!(matches!(pipe.apply(packet(1, 64), now), PipelineOutcome::Drop));
}

#[test]
fn reorder_pushes_packets_back_by_the_gap() {
    let now = Instant::now();
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Reorder { p: 1.0, gap: 4 }],
        9,
        now,
    );
    match pipe.apply(packet(10, 64), now) {
        PipelineOutcome::Deliver(p, _) => assert_eq!(p.order(), 14),
        other => panic!("expected a delivery, got {:?}", other),
    }
}

#[test]
fn rate_stage_defers_beyond_the_burst() {
    let now = Instant::now();
    let size = packet(0, 958).len() as u64;
    assert_eq!(size, 1000);
    let mut pipe = ImpairmentPipeline::with_seed(
        vec![ImpairmentStage::Rate { bps: 8_000, burst: 1_000 }],
        10,
        now,
    );
    // the first kilobyte fits the burst
    match pipe.apply(packet(1, 958), now) {
        PipelineOutcome::Deliver(_, emit) => assert_eq!(emit, now),
        other => panic!("expected a delivery, got {:?}", other),
    }
    // the second is deferred by a full second (1000 bytes at 1000 bytes/s)
    match pipe.apply(packet(2, 958), now) {
        PipelineOutcome::Defer(_, emit) => {
            assert_eq!(emit, now + Duration::from_secs(1));
        }
        other => panic!("expected a deferral, got {:?}", other),
    }
}

#[test]
fn same_seed_same_decisions() {
    let stages = vec![
        ImpairmentStage::Loss(LossModel::Random { p: 0.5 }),
        ImpairmentStage::Duplicate { p: 0.2 },
    ];
    let mut a = pipeline(stages.clone(), 77);
    let mut b = pipeline(stages, 77);
    assert_eq!(survivors(&mut a, 500), survivors(&mut b, 500));
    assert_eq!(a.seed(), 77);
}

#[test]
fn scenario_presets_produce_sensible_stage_lists() {
    assert_eq!(scenarios::high_latency().len(), 1);
    assert_eq!(scenarios::lossy().len(), 1);
    assert_eq!(scenarios::unreliable().len(), 3);
    assert!(matches!(
        scenarios::congested().last(),
        Some(ImpairmentStage::Rate { .. })
    ));
}
