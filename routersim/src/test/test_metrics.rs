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

use crate::metrics::{DropReason, Metrics};
use crate::types::{InterfaceId, Protocol};
use std::time::Duration;

#[test]
fn forward_latency_histogram_is_recorded_and_exported() {
    let metrics = Metrics::new();
    let iface = InterfaceId(0);
    metrics.observe_forward_latency(iface, Duration::from_micros(200));
    metrics.observe_forward_latency(iface, Duration::from_millis(3));
    metrics.observe_forward_latency(iface, Duration::from_millis(3));
    // above the largest bucket bound: counted, but in no bucket
    metrics.observe_forward_latency(iface, Duration::from_secs(20));

    let snapshot = metrics.snapshot();
    let hist = snapshot.forward_latency.get(&iface).unwrap();
    assert_eq!(hist.count, 4);
    assert_eq!(
        hist.sum,
        Duration::from_micros(200) + Duration::from_millis(6) + Duration::from_secs(20)
    );
    assert_eq!(hist.mean(), Duration::from_nanos(5_001_550_000));

    // cumulative counts never decrease, and the last bucket excludes the 20 s outlier
    let mut last = 0;
    for (_, cumulative) in &hist.buckets {
        assert!(*cumulative >= last);
        last = *cumulative;
    }
    assert_eq!(last, 3);
    // 200 us falls within the 500 us bound
    let (bound, below_half_ms) = hist.buckets[3];
    assert_eq!(bound, 5e-4);
    assert_eq!(below_half_ms, 1);
}

#[test]
fn display_renders_the_latency_histogram() {
    let metrics = Metrics::new();
    metrics.observe_forward_latency(InterfaceId(0), Duration::from_millis(2));
    metrics.observe_forward_latency(InterfaceId(0), Duration::from_millis(40));

    let rendered = metrics.snapshot().to_string();
    assert!(rendered.contains("forward_latency_seconds_bucket{interface=\"if0\",le=\"0.005\"} 1"));
    assert!(rendered.contains("forward_latency_seconds_bucket{interface=\"if0\",le=\"+Inf\"} 2"));
    assert!(rendered.contains("forward_latency_seconds_count{interface=\"if0\"} 2"));
    assert!(rendered.contains("forward_latency_seconds_sum{interface=\"if0\"} 0.042"));
}

#[test]
fn counters_and_gauges_render_with_their_labels() {
    let metrics = Metrics::new();
    metrics.packet_in();
    metrics.drop_packet(DropReason::NoRoute);
    metrics.route_installed(Protocol::Ospf);
    metrics.set_queue_depth(InterfaceId(1), 3, 7);

    let rendered = metrics.snapshot().to_string();
    assert!(rendered.contains("packets_in 1"));
    assert!(rendered.contains("packets_dropped_total{reason=\"no-route\"} 1"));
    assert!(rendered.contains("routes_installed_total{protocol=\"ospf\"} 1"));
    assert!(rendered.contains("queue_depth{interface=\"if1\",class=\"3\"} 7"));
}
