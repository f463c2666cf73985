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

use crate::config::{RouterConfig, ShapingAlgorithm};
use crate::impairments::{DelayDistribution, ImpairmentStage, LossModel};
use crate::Error;
use lazy_static::lazy_static;
use std::time::Duration;

const FULL: &str = r#"
router:
  router_id: 167837697
  hostname: r1
  as_number: 65001
  area_id: 0
  system_id: 4369
interfaces:
  - name: eth0
    ip_address: 192.168.1.1
    subnet_mask: 24
    mtu: 1500
    bandwidth_mbps: 1000
    enabled: true
  - name: eth1
    ip_address: 10.0.0.1
    subnet_mask: 30
protocols:
  bgp:
    enabled: true
    hold_time: 90
    keepalive_interval: 30
    neighbors:
      - peer: 10.0.0.2
        remote_as: 65002
        iface: 1
        local_pref: 200
        export_deny: ["192.168.1.0/24"]
  ospf:
    enabled: true
    area: 0
    hello_interval: 10
    dead_interval: 40
    neighbors:
      - peer: 10.0.0.2
        iface: 1
        cost: 10
  isis:
    enabled: true
    level: 3
    priority: 64
    neighbors:
      - peer: 10.0.0.2
        iface: 1
        cost: 10
shaping:
  eth0:
    algorithm: wfq
    queue_depth: 512
    classes:
      - id: 1
        weight: 4
      - id: 2
        weight: 1
  eth1:
    algorithm: token_bucket
    rate_bytes_per_sec: 125000
    burst_bytes: 32000
impairments:
  eth1:
    seed: 42
    stages:
      - type: delay
        mean_ms: 20
        jitter_ms: 5
        distribution: normal
      - type: loss
        p: 0.01
      - type: gilbert_elliott
        p: 0.05
        r: 0.4
        h: 0.3
        k: 0.99
      - type: duplicate
        p: 0.001
      - type: reorder
        p: 0.02
        gap: 3
      - type: rate
        bps: 1000000
        burst: 16000
"#;

lazy_static! {
    static ref PARSED: RouterConfig = RouterConfig::from_yaml(FULL).unwrap();
}

#[test]
fn full_configuration_parses_and_validates() {
    let config = &*PARSED;
    assert_eq!(config.router.hostname, "r1");
    assert_eq!(config.interfaces.len(), 2);
    assert_eq!(config.interfaces[1].mtu, 1500);
    assert_eq!(config.iface_index("eth1"), Some(1));
    assert_eq!(config.iface_index("eth9"), None);

    let bgp = config.protocols.bgp.as_ref().unwrap();
    assert_eq!(bgp.neighbors[0].local_pref, Some(200));

    let shaping = config.shaping.get("eth0").unwrap();
    assert_eq!(shaping.algorithm, ShapingAlgorithm::Wfq);
    assert_eq!(shaping.classes.len(), 2);

    let impairments = config.impairments.get("eth1").unwrap();
    assert_eq!(impairments.seed, Some(42));
    let stages: Vec<ImpairmentStage> =
        impairments.stages.iter().map(|s| s.to_stage()).collect();
    assert_eq!(
        stages[0],
        ImpairmentStage::Delay {
            mean: Duration::from_millis(20),
            jitter: Duration::from_millis(5),
            distribution: DelayDistribution::Normal,
        }
    );
    assert_eq!(stages[1], ImpairmentStage::Loss(LossModel::Random { p: 0.01 }));
    assert!(matches!(stages[2], ImpairmentStage::Loss(LossModel::GilbertElliott { .. })));
    assert_eq!(stages[4], ImpairmentStage::Reorder { p: 0.02, gap: 3 });
}

fn expect_invalid(yaml: &str, field_fragment: &str) {
    match RouterConfig::from_yaml(yaml) {
        Err(Error::InvalidConfig { field, .. }) => {
            assert!(
                field.contains(field_fragment),
                "error names field {:?}, expected it to contain {:?}",
                field,
                field_fragment
            );
        }
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}

#[test]
fn zero_router_id_is_rejected() {
    expect_invalid("router:\n  router_id: 0\n", "router.router_id");
}

#[test]
fn duplicate_interface_names_are_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
interfaces:
  - { name: eth0, ip_address: 10.0.0.1, subnet_mask: 24 }
  - { name: eth0, ip_address: 10.0.1.1, subnet_mask: 24 }
"#,
        "interfaces[1].name",
    );
}

#[test]
fn overlong_subnet_mask_is_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
interfaces:
  - { name: eth0, ip_address: 10.0.0.1, subnet_mask: 33 }
"#,
        "subnet_mask",
    );
}

#[test]
fn bgp_without_as_number_is_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
protocols:
  bgp:
    neighbors: []
"#,
        "router.as_number",
    );
}

#[test]
fn bgp_hold_time_must_cover_three_keepalives() {
    expect_invalid(
        r#"
router: { router_id: 1, as_number: 65001 }
protocols:
  bgp:
    hold_time: 30
    keepalive_interval: 30
"#,
        "keepalive_interval",
    );
}

#[test]
fn wfq_without_classes_is_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
interfaces:
  - { name: eth0, ip_address: 10.0.0.1, subnet_mask: 24 }
shaping:
  eth0:
    algorithm: wfq
"#,
        "shaping.eth0.classes",
    );
}

#[test]
fn shaping_for_unknown_interfaces_is_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
shaping:
  eth7:
    algorithm: drr
    classes:
      - { id: 1, weight: 1 }
"#,
        "shaping.eth7",
    );
}

#[test]
fn out_of_range_probabilities_are_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
interfaces:
  - { name: eth0, ip_address: 10.0.0.1, subnet_mask: 24 }
impairments:
  eth0:
    stages:
      - { type: loss, p: 1.5 }
"#,
        "impairments.eth0.stages[0]",
    );
}

#[test]
fn isis_without_system_id_is_rejected() {
    expect_invalid(
        r#"
router: { router_id: 1 }
protocols:
  isis: {}
"#,
        "router.system_id",
    );
}

#[test]
fn unparsable_yaml_is_an_invalid_config() {
    expect_invalid("router: [not a mapping", "yaml");
}

#[test]
fn export_deny_prefixes_must_parse() {
    expect_invalid(
        r#"
router: { router_id: 1, as_number: 65001 }
protocols:
  bgp:
    neighbors:
      - { peer: 10.0.0.2, remote_as: 65002, iface: 0, export_deny: ["not-a-prefix"] }
"#,
        "export_deny",
    );
}
