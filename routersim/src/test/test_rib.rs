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

use crate::fib::Fib;
use crate::metrics::Metrics;
use crate::rib::{Rib, RouteAction, RouteFilter, RouteUpdate};
use crate::types::{InterfaceId, Prefix, Protocol, Route};
use maplit::hashmap;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn rib() -> Rib {
    Rib::new(Arc::new(Fib::new()), Arc::new(Metrics::new()))
}

fn route(prefix: Prefix, next_hop: &str, metric: u32, protocol: Protocol) -> Route {
    Route::new(prefix, ip(next_hop), InterfaceId(0), metric, protocol)
}

fn add(rib: &Rib, route: Route) {
    rib.apply_route_update(RouteUpdate { route, action: RouteAction::Add });
}

fn withdraw(rib: &Rib, route: Route) {
    rib.apply_route_update(RouteUpdate { route, action: RouteAction::Withdraw });
}

#[test]
fn advertise_then_withdraw_restores_the_initial_state() {
    let rib = rib();
    let p = Prefix::v4(10, 0, 0, 0, 24).unwrap();
    let r = route(p, "192.168.1.2", 5, Protocol::Static);

    add(&rib, r.clone());
    assert_eq!(rib.selected(&p).unwrap().next_hop, ip("192.168.1.2"));
    assert_eq!(rib.fib().lookup(ip("10.0.0.5")), Some((ip("192.168.1.2"), InterfaceId(0))));

    withdraw(&rib, r);
    assert_eq!(rib.selected(&p), None);
    assert_eq!(rib.fib().lookup(ip("10.0.0.5")), None);
    assert_eq!(rib.prefix_count(), 0);
}

#[test]
fn admin_distance_beats_metric() {
    // OSPF with the worse metric must win over BGP: 110 < 200
    let rib = rib();
    let p = Prefix::v4(10, 1, 0, 0, 16).unwrap();
    add(&rib, route(p, "2.2.2.2", 5, Protocol::Bgp));
    assert_eq!(rib.selected(&p).unwrap().protocol, Protocol::Bgp);

    add(&rib, route(p, "1.1.1.1", 10, Protocol::Ospf));
    let selected = rib.selected(&p).unwrap();
    assert_eq!(selected.protocol, Protocol::Ospf);
    assert_eq!(selected.next_hop, ip("1.1.1.1"));
    assert_eq!(rib.fib().lookup(ip("10.1.2.3")).unwrap().0, ip("1.1.1.1"));

    // removing the OSPF route falls back to BGP
    withdraw(&rib, route(p, "1.1.1.1", 10, Protocol::Ospf));
    assert_eq!(rib.selected(&p).unwrap().protocol, Protocol::Bgp);
}

#[test]
fn metric_breaks_ties_within_one_admin_distance() {
    let rib = rib();
    let p = Prefix::v4(10, 1, 0, 0, 16).unwrap();
    let mut worse = route(p, "1.1.1.1", 20, Protocol::Ospf);
    let mut better = route(p, "2.2.2.2", 10, Protocol::Isis);
    // level the administrative distances so only the metric differs
    worse.admin_distance = 100;
    better.admin_distance = 100;

    add(&rib, worse);
    add(&rib, better);
    assert_eq!(rib.selected(&p).unwrap().next_hop, ip("2.2.2.2"));
}

#[test]
fn protocol_rank_breaks_full_ties() {
    let rib = rib();
    let p = Prefix::v4(10, 1, 0, 0, 16).unwrap();
    let mut isis = route(p, "2.2.2.2", 10, Protocol::Isis);
    let mut ospf = route(p, "1.1.1.1", 10, Protocol::Ospf);
    isis.admin_distance = 100;
    ospf.admin_distance = 100;

    add(&rib, isis);
    add(&rib, ospf);
    // OSPF < IS-IS in the default ordering
    assert_eq!(rib.selected(&p).unwrap().protocol, Protocol::Ospf);
}

#[test]
fn inactive_routes_are_never_selected() {
    let rib = rib();
    let p = Prefix::v4(10, 1, 0, 0, 16).unwrap();
    let mut r = route(p, "1.1.1.1", 10, Protocol::Static);
    r.active = false;
    add(&rib, r);
    assert_eq!(rib.selected(&p), None);
    assert_eq!(rib.routes(&RouteFilter::default()).len(), 1);
}

#[test]
fn selection_change_callbacks_fire_with_old_and_new() {
    let rib = rib();
    let observed: Arc<Mutex<Vec<(Option<IpAddr>, Option<IpAddr>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let log = observed.clone();
    rib.on_selection_change(Box::new(move |_, old, new| {
        log.lock().push((old.map(|r| r.next_hop), new.map(|r| r.next_hop)));
    }));

    let p = Prefix::v4(10, 0, 0, 0, 24).unwrap();
    add(&rib, route(p, "1.1.1.1", 10, Protocol::Bgp));
    add(&rib, route(p, "2.2.2.2", 10, Protocol::Ospf));
    withdraw(&rib, route(p, "2.2.2.2", 10, Protocol::Ospf));
    withdraw(&rib, route(p, "1.1.1.1", 10, Protocol::Bgp));

    let events = observed.lock().clone();
    assert_eq!(
        events,
        vec![
            (None, Some(ip("1.1.1.1"))),
            (Some(ip("1.1.1.1")), Some(ip("2.2.2.2"))),
            (Some(ip("2.2.2.2")), Some(ip("1.1.1.1"))),
            (Some(ip("1.1.1.1")), None),
        ]
    );
}

#[test]
fn readvertisement_without_change_is_silent() {
    let rib = rib();
    let counter = Arc::new(Mutex::new(0usize));
    let n = counter.clone();
    rib.on_selection_change(Box::new(move |_, _, _| *n.lock() += 1));

    let p = Prefix::v4(10, 0, 0, 0, 24).unwrap();
    let r = route(p, "1.1.1.1", 10, Protocol::Bgp);
    add(&rib, r.clone());
    add(&rib, r);
    assert_eq!(*counter.lock(), 1);
}

#[test]
fn source_disconnect_withdraws_in_one_batch() {
    let rib = rib();
    for i in 0..10u8 {
        let p = Prefix::v4(10, i, 0, 0, 16).unwrap();
        add(&rib, route(p, "1.1.1.1", 10, Protocol::Bgp));
    }
    add(
        &rib,
        route(Prefix::v4(10, 0, 0, 0, 16).unwrap(), "2.2.2.2", 10, Protocol::Ospf),
    );
    assert_eq!(rib.route_counts().get(&Protocol::Bgp), Some(&9));

    rib.withdraw_protocol(Protocol::Bgp);
    assert_eq!(rib.route_counts(), hashmap! { Protocol::Ospf => 1 });
    // the prefix also covered by OSPF fails over instead of disappearing
    assert_eq!(
        rib.selected(&Prefix::v4(10, 0, 0, 0, 16).unwrap()).unwrap().protocol,
        Protocol::Ospf
    );
    assert_eq!(rib.prefix_count(), 1);
}

#[test]
fn routes_filter_by_protocol() {
    let rib = rib();
    add(&rib, route(Prefix::v4(10, 0, 0, 0, 16).unwrap(), "1.1.1.1", 1, Protocol::Bgp));
    add(&rib, route(Prefix::v4(10, 1, 0, 0, 16).unwrap(), "1.1.1.1", 1, Protocol::Bgp));
    add(&rib, route(Prefix::v4(10, 2, 0, 0, 16).unwrap(), "2.2.2.2", 1, Protocol::Ospf));

    let bgp_only =
        rib.routes(&RouteFilter { protocol: Some(Protocol::Bgp), ..Default::default() });
    assert_eq!(bgp_only.len(), 2);
    assert!(bgp_only.iter().all(|r| r.protocol == Protocol::Bgp));
}

#[test]
fn snapshot_export_and_parse_roundtrip() {
    let rib = rib();
    add(&rib, route(Prefix::v4(10, 0, 0, 0, 24).unwrap(), "192.168.1.2", 5, Protocol::Static));
    add(&rib, route(Prefix::v4(10, 1, 0, 0, 16).unwrap(), "192.168.1.3", 20, Protocol::Ospf));

    let snapshot = rib.export_snapshot();
    assert!(snapshot.contains("10.0.0.0/24 192.168.1.2 0 5 static 1"));
    assert!(snapshot.contains("10.1.0.0/16 192.168.1.3 0 20 ospf 110"));

    let parsed = Rib::parse_snapshot(&snapshot);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].prefix, Prefix::v4(10, 0, 0, 0, 24).unwrap());
    assert_eq!(parsed[0].protocol, Protocol::Static);
    assert_eq!(parsed[0].admin_distance, 1);

    // malformed lines are skipped, not fatal
    let parsed = Rib::parse_snapshot("not a route\n10.0.0.0/24 192.168.1.2 0 5 static 1\n");
    assert_eq!(parsed.len(), 1);
}
