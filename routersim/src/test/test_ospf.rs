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

use crate::adjacency::AdjacencyState;
use crate::config::{IgpNeighborConfig, OspfConfig};
use crate::metrics::Metrics;
use crate::protocols::ospf::{Lsa, OspfDriver, OspfMessage};
use crate::protocols::{OutboundMessage, ProtocolDriver};
use crate::rib::{RouteAction, RouteUpdate};
use crate::types::{InterfaceId, Prefix, Protocol, Route, RouterId};
use crate::Error;
use crossbeam_channel::{unbounded, Receiver};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ADDR_A: &str = "10.0.0.1";
const ADDR_B: &str = "10.0.0.2";

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

struct Node {
    addr: IpAddr,
    driver: OspfDriver,
    routes: Receiver<RouteUpdate>,
    messages: Receiver<OutboundMessage>,
}

fn node(router_id: u32, addr: &str, peer: &str, cost: u32, now: Instant) -> Node {
    let config = OspfConfig {
        enabled: true,
        area: 0,
        hello_interval: 1,
        dead_interval: 4,
        neighbors: vec![IgpNeighborConfig { peer: ip(peer), iface: 0, cost }],
    };
    let (route_tx, routes) = unbounded();
    let (msg_tx, messages) = unbounded();
    let driver =
        OspfDriver::new(&config, router_id, route_tx, msg_tx, Arc::new(Metrics::new()), now);
    Node { addr: ip(addr), driver, routes, messages }
}

/// Deliver everything both drivers have emitted, until the exchange settles.
fn pump(a: &mut Node, b: &mut Node, now: Instant) {
    for _ in 0..10 {
        let mut quiet = true;
        while let Ok(msg) = a.messages.try_recv() {
            quiet = false;
            b.driver.handle_message(a.addr, &msg.bytes, now);
        }
        while let Ok(msg) = b.messages.try_recv() {
            quiet = false;
            a.driver.handle_message(b.addr, &msg.bytes, now);
        }
        if quiet {
            break;
        }
    }
}

fn converge(a: &mut Node, b: &mut Node, mut now: Instant) -> Instant {
    for _ in 0..8 {
        a.driver.tick(now);
        b.driver.tick(now);
        pump(a, b, now);
        now += Duration::from_secs(1);
    }
    now
}

fn state_of(node: &Node, peer: IpAddr) -> AdjacencyState {
    node.driver.neighbors().into_iter().find(|n| n.peer == peer).unwrap().state
}

#[test]
fn message_codec_roundtrip() {
    let messages = vec![
        OspfMessage::Hello {
            router_id: RouterId(1),
            area: 0,
            seen: vec![RouterId(2), RouterId(3)],
        },
        OspfMessage::LsUpdate(vec![Lsa {
            origin: RouterId(1),
            seq: 4,
            links: vec![(RouterId(2), 10)],
            prefixes: vec![(Prefix::v4(10, 9, 0, 0, 16).unwrap(), 5)],
        }]),
    ];
    for msg in messages {
        assert_eq!(OspfMessage::decode(&msg.encode()).unwrap(), msg);
    }
    assert_eq!(
        OspfMessage::decode(&[7]),
        Err(Error::MalformedMessage("unknown ospf message type"))
    );
}

#[test]
fn hello_exchange_brings_the_adjacency_up() {
    let t0 = Instant::now();
    let mut a = node(1, ADDR_A, ADDR_B, 10, t0);
    let mut b = node(2, ADDR_B, ADDR_A, 10, t0);
    a.driver.start(t0);
    b.driver.start(t0);

    converge(&mut a, &mut b, t0);

    assert_eq!(state_of(&a, ip(ADDR_B)), AdjacencyState::Established);
    assert_eq!(state_of(&b, ip(ADDR_A)), AdjacencyState::Established);
}

#[test]
fn advertised_prefixes_travel_via_spf_to_the_merger() {
    let t0 = Instant::now();
    let mut a = node(1, ADDR_A, ADDR_B, 10, t0);
    let mut b = node(2, ADDR_B, ADDR_A, 10, t0);
    a.driver.start(t0);
    b.driver.start(t0);
    let now = converge(&mut a, &mut b, t0);

    // B advertises a prefix with cost 5; A must compute 10 (link) + 5 = 15
    let p = Prefix::v4(172, 16, 0, 0, 16).unwrap();
    b.driver
        .advertise(Route::new(p, ip(ADDR_B), InterfaceId(0), 5, Protocol::Ospf), now)
        .unwrap();
    converge(&mut a, &mut b, now);

    let updates: Vec<_> = a.routes.try_iter().collect();
    let add = updates
        .iter()
        .find(|u| u.action == RouteAction::Add && u.route.prefix == p)
        .expect("no route update for the advertised prefix");
    assert_eq!(add.route.protocol, Protocol::Ospf);
    assert_eq!(add.route.metric, 15);
    assert_eq!(add.route.next_hop, ip(ADDR_B));
    assert_eq!(add.route.iface, InterfaceId(0));
    assert_eq!(add.route.admin_distance, 110);
}

#[test]
fn withdrawn_prefixes_disappear_after_the_next_spf() {
    let t0 = Instant::now();
    let mut a = node(1, ADDR_A, ADDR_B, 10, t0);
    let mut b = node(2, ADDR_B, ADDR_A, 10, t0);
    a.driver.start(t0);
    b.driver.start(t0);
    let now = converge(&mut a, &mut b, t0);

    let p = Prefix::v4(172, 16, 0, 0, 16).unwrap();
    b.driver
        .advertise(Route::new(p, ip(ADDR_B), InterfaceId(0), 5, Protocol::Ospf), now)
        .unwrap();
    let now = converge(&mut a, &mut b, now);
    let _: Vec<_> = a.routes.try_iter().collect();

    b.driver.withdraw(p, now).unwrap();
    converge(&mut a, &mut b, now);

    let updates: Vec<_> = a.routes.try_iter().collect();
    assert!(updates
        .iter()
        .any(|u| u.action == RouteAction::Withdraw && u.route.prefix == p));
}

#[test]
fn dead_interval_fails_the_adjacency() {
    let t0 = Instant::now();
    let mut a = node(1, ADDR_A, ADDR_B, 10, t0);
    let mut b = node(2, ADDR_B, ADDR_A, 10, t0);
    a.driver.start(t0);
    b.driver.start(t0);
    let now = converge(&mut a, &mut b, t0);

    // B goes silent; after the dead interval A declares the neighbor down (it may already be
    // in a reconnect attempt by the time we look)
    let mut later = now;
    for _ in 0..8 {
        later += Duration::from_secs(1);
        a.driver.tick(later);
        let _: Vec<_> = a.messages.try_iter().collect();
    }
    assert_ne!(state_of(&a, ip(ADDR_B)), AdjacencyState::Established);
    let summary =
        a.driver.neighbors().into_iter().find(|n| n.peer == ip(ADDR_B)).unwrap();
    assert!(summary.last_error.unwrap().contains("hold timer expired"));
}

#[test]
fn foreign_area_hellos_are_rejected() {
    let t0 = Instant::now();
    let metrics = Arc::new(Metrics::new());
    let (route_tx, _routes) = unbounded();
    let (msg_tx, _messages) = unbounded();
    let config = OspfConfig {
        enabled: true,
        area: 0,
        hello_interval: 1,
        dead_interval: 4,
        neighbors: vec![IgpNeighborConfig { peer: ip(ADDR_B), iface: 0, cost: 10 }],
    };
    let mut driver = OspfDriver::new(&config, 1, route_tx, msg_tx, metrics.clone(), t0);
    driver.start(t0);
    driver.tick(t0);

    let hello = OspfMessage::Hello { router_id: RouterId(2), area: 7, seen: vec![] };
    driver.handle_message(ip(ADDR_B), &hello.encode(), t0);
    assert_eq!(metrics.snapshot().message_errors, vec![(Protocol::Ospf, 1)]);
}
