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

use super::util::frame;
use crate::config::RouterConfig;
use crate::link::{Link, MemLink};
use crate::metrics::DropReason;
use crate::orchestrator::{default_classifier, Router};
use crate::packet::Packet;
use crate::types::{InterfaceId, Prefix, Protocol};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn two_port_config() -> RouterConfig {
    RouterConfig::from_yaml(
        r#"
router:
  router_id: 1
  hostname: r1
interfaces:
  - { name: eth0, ip_address: 192.168.1.1, subnet_mask: 24 }
  - { name: eth1, ip_address: 192.168.2.1, subnet_mask: 24 }
"#,
    )
    .unwrap()
}

/// Poll a condition for up to two seconds.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn static_route_install_and_withdraw() {
    let router = Router::new(two_port_config()).unwrap();
    let p = Prefix::v4(10, 0, 0, 0, 24).unwrap();
    router.add_static_route(p, ip("192.168.1.2"), InterfaceId(0), 0);
    assert_eq!(
        router.fib().lookup(ip("10.0.0.5")),
        Some((ip("192.168.1.2"), InterfaceId(0)))
    );
    assert_eq!(
        router.resolve(ip("10.0.0.5")).unwrap(),
        (ip("192.168.1.2"), InterfaceId(0))
    );
    router.remove_static_route(p);
    assert_eq!(router.fib().lookup(ip("10.0.0.5")), None);
    assert!(matches!(
        router.resolve(ip("10.0.0.5")),
        Err(crate::Error::NoRoute(_))
    ));
}

#[test]
fn connected_routes_are_installed_at_construction() {
    let router = Router::new(two_port_config()).unwrap();
    assert_eq!(
        router.fib().lookup(ip("192.168.1.77")),
        Some((ip("192.168.1.1"), InterfaceId(0)))
    );
    assert_eq!(
        router.rib().route_counts().get(&Protocol::Connected),
        Some(&2)
    );
}

#[test]
fn packets_are_forwarded_to_the_egress_link() {
    let mut router = Router::new(two_port_config()).unwrap();
    let (near, far) = MemLink::pair(64);
    router.attach_link(InterfaceId(1), Arc::new(near));
    router.add_static_route(
        Prefix::v4(10, 9, 0, 0, 16).unwrap(),
        ip("192.168.2.2"),
        InterfaceId(1),
        0,
    );
    router.start();

    let bytes = frame([192, 168, 1, 50], [10, 9, 0, 5], 200);
    router.ingress(InterfaceId(0), bytes.clone());

    let received = far.recv(Duration::from_secs(2)).expect("no frame on the egress link");
    assert_eq!(received.1, bytes);
    assert!(eventually(|| router.metrics().packets_out() == 1));
    assert_eq!(router.metrics().packets_in(), 1);
    router.stop();
}

#[test]
fn lookup_misses_are_counted_as_no_route_drops() {
    let mut router = Router::new(two_port_config()).unwrap();
    router.start();
    router.ingress(InterfaceId(0), frame([192, 168, 1, 50], [203, 0, 113, 9], 100));
    assert!(eventually(|| router.metrics().dropped(DropReason::NoRoute) == 1));
    router.stop();
}

#[test]
fn undecodable_frames_are_counted_as_malformed_drops() {
    let mut router = Router::new(two_port_config()).unwrap();
    router.start();
    router.ingress(InterfaceId(0), vec![0u8; 7]);
    assert!(eventually(|| router.metrics().dropped(DropReason::Malformed) == 1));
    router.stop();
}

#[test]
fn frames_arriving_on_the_link_are_forwarded() {
    let mut router = Router::new(two_port_config()).unwrap();
    let (near0, far0) = MemLink::pair(64);
    let (near1, far1) = MemLink::pair(64);
    router.attach_link(InterfaceId(0), Arc::new(near0));
    router.attach_link(InterfaceId(1), Arc::new(near1));
    router.add_static_route(
        Prefix::v4(10, 9, 0, 0, 16).unwrap(),
        ip("192.168.2.2"),
        InterfaceId(1),
        0,
    );
    router.start();

    far0.send(frame([192, 168, 1, 50], [10, 9, 0, 5], 64)).unwrap();
    assert!(far1.recv(Duration::from_secs(2)).is_some());
    router.stop();
}

#[test]
fn delay_impairment_holds_packets_in_the_delay_queue() {
    let mut config = two_port_config();
    let yaml = r#"
seed: 1
stages:
  - { type: delay, mean_ms: 150, jitter_ms: 0 }
"#;
    config
        .impairments
        .insert("eth0".to_string(), serde_yaml::from_str(yaml).unwrap());
    let mut router = Router::new(config).unwrap();
    let (near, far) = MemLink::pair(64);
    router.attach_link(InterfaceId(1), Arc::new(near));
    router.add_static_route(
        Prefix::v4(10, 9, 0, 0, 16).unwrap(),
        ip("192.168.2.2"),
        InterfaceId(1),
        0,
    );
    router.start();

    let sent_at = Instant::now();
    router.ingress(InterfaceId(0), frame([192, 168, 1, 50], [10, 9, 0, 5], 64));
    let received = far.recv(Duration::from_secs(2));
    let elapsed = sent_at.elapsed();
    assert!(received.is_some());
    assert!(elapsed >= Duration::from_millis(140), "arrived after {:?}", elapsed);
    router.stop();
}

#[test]
fn shutdown_rejects_new_traffic() {
    let mut router = Router::new(two_port_config()).unwrap();
    router.start();
    router.stop();
    router.ingress(InterfaceId(0), frame([192, 168, 1, 50], [203, 0, 113, 9], 64));
    assert_eq!(router.metrics().dropped(DropReason::Shutdown), 1);
}

#[test]
fn default_classifier_uses_the_dscp_bands() {
    let view = |dscp: u8| {
        let bytes = super::util::frame_with_dscp([1, 1, 1, 1], [2, 2, 2, 2], 16, dscp);
        Packet::decode(1, InterfaceId(0), Instant::now(), bytes).unwrap().view().clone()
    };
    assert_eq!(default_classifier(&view(48)), 1);
    assert_eq!(default_classifier(&view(56)), 1);
    assert_eq!(default_classifier(&view(32)), 2);
    assert_eq!(default_classifier(&view(46)), 2);
    assert_eq!(default_classifier(&view(0)), 3);
}

#[test]
fn route_feed_accepts_external_updates() {
    use crate::rib::{RouteAction, RouteUpdate};
    use crate::types::Route;

    let mut router = Router::new(two_port_config()).unwrap();
    router.start();
    let feed = router.route_feed();
    let p = Prefix::v4(198, 18, 0, 0, 15).unwrap();
    feed.send(RouteUpdate {
        route: Route::new(p, ip("192.168.1.9"), InterfaceId(0), 7, Protocol::Bgp),
        action: RouteAction::Add,
    })
    .unwrap();
    assert!(eventually(|| router.fib().lookup(ip("198.18.5.5")).is_some()));
    router.stop();
}
