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

//! # Packet orchestrator
//!
//! The top-level [`Router`] owns everything: the FIB, the RIB merger, the metrics surface, the
//! per-interface shapers and impairment pipelines, and the protocol drivers. All component
//! lifetimes are children of the router's lifetime; there is no global state.
//!
//! The data plane runs on plain threads: one ingress and one egress worker per interface, one
//! delay-queue worker, and one control-plane worker pumping the protocol drivers and the route
//! merger. Every queue is bounded; overflow surfaces as a drop with a reason. All blocking
//! waits carry a timeout and observe the shutdown signal.

use crate::config::{RouterConfig, ShapingAlgorithm, ShapingConfig};
use crate::fib::Fib;
use crate::impairments::{ImpairmentPipeline, PipelineOutcome};
use crate::link::Link;
use crate::metrics::{DropReason, Metrics};
use crate::packet::{Packet, PacketView};
use crate::protocols::{
    BgpDriver, IsisDriver, NeighborSummary, OspfDriver, OutboundMessage, ProtocolDriver,
};
use crate::rib::{Rib, RouteAction, RouteUpdate};
use crate::shaping::{
    drr::DrrScheduler, wfq::WfqScheduler, ClassId, Shaper, TokenBucketShaper, TrafficClass,
};
use crate::types::{InterfaceId, Prefix, Protocol, Route};
use crate::{Error, Stopper};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::*;
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll granularity of the worker loops.
const POLL: Duration = Duration::from_millis(10);
/// Tick interval of the control-plane worker.
const CONTROL_TICK: Duration = Duration::from_millis(50);
/// Depth of the wake channels (only a doorbell; the shaper owns the real queue).
const WAKE_DEPTH: usize = 64;
/// Depth of the channel carrying outbound protocol messages.
const MSG_DEPTH: usize = 4096;

/// Classifier assigning a traffic class to a decoded packet.
pub type Classifier = dyn Fn(&PacketView) -> ClassId + Send + Sync;

/// The default classifier: DSCP >= 48 goes to class 1, >= 32 to class 2, the rest to class 3.
pub fn default_classifier(view: &PacketView) -> ClassId {
    if view.dscp >= 48 {
        1
    } else if view.dscp >= 32 {
        2
    } else {
        3
    }
}

/// Runtime state of one interface.
pub struct InterfaceRuntime {
    id: InterfaceId,
    name: String,
    enabled: bool,
    ingress_shaper: Mutex<Box<dyn Shaper>>,
    egress_shaper: Mutex<Box<dyn Shaper>>,
    impairments: Mutex<ImpairmentPipeline>,
    ingress_wake: (Sender<()>, Receiver<()>),
    egress_wake: (Sender<()>, Receiver<()>),
    link: Mutex<Option<Arc<dyn Link + Sync>>>,
}

impl std::fmt::Debug for InterfaceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceRuntime")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl InterfaceRuntime {
    /// The interface name from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn wake_ingress(&self) {
        let _ = self.ingress_wake.0.try_send(());
    }

    fn wake_egress(&self) {
        let _ = self.egress_wake.0.try_send(());
    }
}

/// One packet waiting in the time-ordered delay queue. Ordered by `(emit_time, order, seq)`;
/// the heap is a max-heap, so `Ord` is reversed.
struct DelayedPacket {
    emit_time: Instant,
    order: u64,
    seq: u64,
    packet: Packet,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.emit_time, other.order, other.seq).cmp(&(self.emit_time, self.order, self.seq))
    }
}

/// Time-ordered queue of future-dated packets, woken either by a new earliest deadline or by
/// shutdown.
#[derive(Default)]
struct DelayQueue {
    heap: Mutex<BinaryHeap<DelayedPacket>>,
    condvar: Condvar,
    seq: AtomicU64,
}

impl DelayQueue {
    fn push(&self, packet: Packet, emit_time: Instant) {
        let mut heap = self.heap.lock();
        heap.push(DelayedPacket {
            emit_time,
            order: packet.order(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            packet,
        });
        self.condvar.notify_one();
    }

    /// Pop everything due at `now`, or block until the earliest deadline (bounded by `POLL`).
    fn pop_due(&self, now: Instant) -> Vec<Packet> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        loop {
            match heap.peek() {
                Some(head) if head.emit_time <= now => {
                    due.push(heap.pop().unwrap().packet);
                }
                Some(head) if due.is_empty() => {
                    let deadline = head.emit_time.min(now + POLL);
                    self.condvar.wait_until(&mut heap, deadline);
                    break;
                }
                Some(_) => break,
                None if due.is_empty() => {
                    self.condvar.wait_until(&mut heap, now + POLL);
                    break;
                }
                None => break,
            }
        }
        due
    }

    fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

/// Shared state of the forwarding pipeline, one per router, shared by all workers.
struct Pipeline {
    fib: Arc<Fib>,
    metrics: Arc<Metrics>,
    interfaces: HashMap<InterfaceId, Arc<InterfaceRuntime>>,
    delay: DelayQueue,
    classifier: Box<Classifier>,
    packet_ids: AtomicU64,
    stopper: Stopper,
}

impl Pipeline {
    /// Accept a raw frame on an interface: decode, classify, and hand it to the ingress shaper.
    /// Every failure is a counted drop, never an error to the caller.
    fn ingress(&self, iface: InterfaceId, at: Instant, bytes: Vec<u8>) {
        let runtime = match self.interfaces.get(&iface) {
            Some(rt) if rt.enabled => rt,
            _ => {
                self.metrics.drop_packet(DropReason::Malformed);
                return;
            }
        };
        if self.stopper.is_stopped() {
            self.metrics.drop_packet(DropReason::Shutdown);
            return;
        }
        self.metrics.packet_in();
        let id = self.packet_ids.fetch_add(1, Ordering::Relaxed);
        let packet = match Packet::decode(id, iface, at, bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("{}: {}", runtime.name, e);
                self.metrics.drop_packet(DropReason::Malformed);
                return;
            }
        };
        let class = (self.classifier)(packet.view());
        let result = runtime.ingress_shaper.lock().enqueue(class, packet, at);
        match result {
            Ok(()) => runtime.wake_ingress(),
            Err(_) => self.metrics.drop_packet(DropReason::QueueFull),
        }
        let depth = runtime.ingress_shaper.lock().queue_depth(Some(class));
        self.metrics.set_queue_depth(iface, class, depth as u64);
    }

    /// Apply the interface's impairments to one packet fresh out of the ingress shaper.
    fn impair(&self, runtime: &InterfaceRuntime, packet: Packet, now: Instant) {
        let outcome = runtime.impairments.lock().apply(packet, now);
        match outcome {
            PipelineOutcome::Drop => {
                self.metrics.drop_packet(DropReason::Impairment);
            }
            PipelineOutcome::Deliver(packet, emit_time)
            | PipelineOutcome::Defer(packet, emit_time) => {
                self.emit(packet, emit_time, now);
            }
            PipelineOutcome::Duplicate(emissions) => {
                for (packet, emit_time) in emissions {
                    self.emit(packet, emit_time, now);
                }
            }
        }
    }

    fn emit(&self, packet: Packet, emit_time: Instant, now: Instant) {
        if emit_time > now {
            self.delay.push(packet, emit_time);
        } else {
            self.forward(packet, now);
        }
    }

    /// FIB lookup and hand-over to the egress shaper.
    fn forward(&self, packet: Packet, now: Instant) {
        let dst = packet.view().dst_ip;
        let (next_hop, egress) = match self.fib.lookup(dst) {
            Some(entry) => entry,
            None => {
                trace!("no route to {}", dst);
                self.metrics.drop_packet(DropReason::NoRoute);
                return;
            }
        };
        let runtime = match self.interfaces.get(&egress) {
            Some(rt) if rt.enabled => rt,
            _ => {
                self.metrics.drop_packet(DropReason::NoRoute);
                return;
            }
        };
        trace!("{} -> {} via {} on {}", packet.view().src_ip, dst, next_hop, runtime.name);
        let class = (self.classifier)(packet.view());
        let result = runtime.egress_shaper.lock().enqueue(class, packet, now);
        match result {
            Ok(()) => runtime.wake_egress(),
            Err(_) => self.metrics.drop_packet(DropReason::QueueFull),
        }
    }

    /// Transmit everything the egress shaper releases.
    fn drain_egress(&self, runtime: &InterfaceRuntime, now: Instant) {
        loop {
            let packet = match runtime.egress_shaper.lock().dequeue(now) {
                Some(packet) => packet,
                None => break,
            };
            let latency = now.saturating_duration_since(packet.ingress_time());
            self.metrics.observe_forward_latency(runtime.id, latency);
            let link = runtime.link.lock().clone();
            match link {
                Some(link) => match link.send(packet.wire().to_vec()) {
                    Ok(()) => self.metrics.packet_out(),
                    Err(_) => self.metrics.drop_packet(DropReason::QueueFull),
                },
                None => {
                    // no attachment: the frame leaves the simulation
                    self.metrics.packet_out();
                }
            }
        }
    }
}

/// The simulated router.
pub struct Router {
    config: RouterConfig,
    pipeline: Arc<Pipeline>,
    rib: Arc<Rib>,
    drivers: Arc<Mutex<Vec<Box<dyn ProtocolDriver>>>>,
    route_rx: Receiver<RouteUpdate>,
    route_tx: Sender<RouteUpdate>,
    msg_rx: Receiver<OutboundMessage>,
    workers: Vec<thread::JoinHandle<()>>,
    running: bool,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("hostname", &self.config.router.hostname)
            .field("interfaces", &self.pipeline.interfaces.len())
            .field("running", &self.running)
            .finish()
    }
}

impl Router {
    /// Build a router from a validated configuration.
    pub fn new(config: RouterConfig) -> Result<Self, Error> {
        config.validate()?;
        let now = Instant::now();
        let metrics = Arc::new(Metrics::new());
        let fib = Arc::new(Fib::new());
        let rib = Arc::new(Rib::new(fib.clone(), metrics.clone()));

        let mut interfaces = HashMap::new();
        for (index, iface_cfg) in config.interfaces.iter().enumerate() {
            let id = InterfaceId(index as u32);
            let shaping = config.shaping.get(&iface_cfg.name);
            let impairment_cfg = config.impairments.get(&iface_cfg.name);
            let stages = impairment_cfg
                .map(|c| c.stages.iter().map(|s| s.to_stage()).collect())
                .unwrap_or_default();
            let pipeline = match impairment_cfg.and_then(|c| c.seed) {
                Some(seed) => ImpairmentPipeline::with_seed(stages, seed, now),
                None => ImpairmentPipeline::new(stages, now),
            };
            debug!(
                "interface {} ({}): impairment seed {}",
                iface_cfg.name,
                id,
                pipeline.seed()
            );
            interfaces.insert(
                id,
                Arc::new(InterfaceRuntime {
                    id,
                    name: iface_cfg.name.clone(),
                    enabled: iface_cfg.enabled,
                    ingress_shaper: Mutex::new(build_shaper(shaping, iface_cfg.bandwidth_mbps, now)),
                    egress_shaper: Mutex::new(build_shaper(shaping, iface_cfg.bandwidth_mbps, now)),
                    impairments: Mutex::new(pipeline),
                    ingress_wake: bounded(WAKE_DEPTH),
                    egress_wake: bounded(WAKE_DEPTH),
                    link: Mutex::new(None),
                }),
            );
        }

        let pipeline = Arc::new(Pipeline {
            fib,
            metrics: metrics.clone(),
            interfaces,
            delay: DelayQueue::default(),
            classifier: Box::new(default_classifier),
            packet_ids: AtomicU64::new(1),
            stopper: Stopper::new(),
        });

        let (route_tx, route_rx) = bounded(MSG_DEPTH);
        let (msg_tx, msg_rx) = bounded(MSG_DEPTH);

        let mut drivers: Vec<Box<dyn ProtocolDriver>> = Vec::new();
        let local_addr = config
            .interfaces
            .first()
            .map(|i| i.ip_address)
            .unwrap_or_else(|| IpAddr::from([0u8, 0, 0, 0]));
        if let Some(bgp) = config.protocols.bgp.as_ref().filter(|c| c.enabled) {
            drivers.push(Box::new(BgpDriver::new(
                bgp,
                config.router.as_number,
                config.router.router_id,
                local_addr,
                route_tx.clone(),
                msg_tx.clone(),
                metrics.clone(),
                now,
            )?));
        }
        if let Some(ospf) = config.protocols.ospf.as_ref().filter(|c| c.enabled) {
            drivers.push(Box::new(OspfDriver::new(
                ospf,
                config.router.router_id,
                route_tx.clone(),
                msg_tx.clone(),
                metrics.clone(),
                now,
            )));
        }
        if let Some(isis) = config.protocols.isis.as_ref().filter(|c| c.enabled) {
            drivers.push(Box::new(IsisDriver::new(
                isis,
                config.router.system_id,
                route_tx.clone(),
                msg_tx.clone(),
                metrics.clone(),
                now,
            )));
        }

        let router = Self {
            config,
            pipeline,
            rib,
            drivers: Arc::new(Mutex::new(drivers)),
            route_rx,
            route_tx,
            msg_rx,
            workers: Vec::new(),
            running: false,
        };
        router.install_connected_routes();
        Ok(router)
    }

    /// Install a Connected route for every enabled interface's subnet.
    fn install_connected_routes(&self) {
        for (index, iface) in self.config.interfaces.iter().enumerate() {
            if !iface.enabled {
                continue;
            }
            let prefix = match Prefix::new(iface.ip_address, iface.subnet_mask) {
                Ok(p) => p,
                Err(e) => {
                    warn!("interface {}: {}", iface.name, e);
                    continue;
                }
            };
            let route = Route::new(
                prefix,
                iface.ip_address,
                InterfaceId(index as u32),
                0,
                Protocol::Connected,
            );
            self.rib.apply_route_update(RouteUpdate { route, action: RouteAction::Add });
        }
    }

    /// Attach a link to an interface (before `start`).
    pub fn attach_link(&self, iface: InterfaceId, link: Arc<dyn Link + Sync>) {
        if let Some(rt) = self.pipeline.interfaces.get(&iface) {
            *rt.link.lock() = Some(link);
        }
    }

    /// Start the data-plane workers and the protocol drivers.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(
            "router {} starting: {} interfaces, {} cores available",
            self.config.router.hostname,
            self.pipeline.interfaces.len(),
            num_cpus::get()
        );

        let now = Instant::now();
        for driver in self.drivers.lock().iter_mut() {
            driver.start(now);
        }

        // one worker per interface per direction
        for runtime in self.pipeline.interfaces.values() {
            if !runtime.enabled {
                continue;
            }
            let pipeline = self.pipeline.clone();
            let rt = runtime.clone();
            self.workers.push(
                thread::Builder::new()
                    .name(format!("{}-in", rt.name))
                    .spawn(move || ingress_worker(pipeline, rt))
                    .expect("failed to spawn ingress worker"),
            );
            let pipeline = self.pipeline.clone();
            let rt = runtime.clone();
            self.workers.push(
                thread::Builder::new()
                    .name(format!("{}-out", rt.name))
                    .spawn(move || egress_worker(pipeline, rt))
                    .expect("failed to spawn egress worker"),
            );
            // receive from the link, if one is attached
            if runtime.link.lock().is_some() {
                let pipeline = self.pipeline.clone();
                let rt = runtime.clone();
                self.workers.push(
                    thread::Builder::new()
                        .name(format!("{}-rx", rt.name))
                        .spawn(move || link_rx_worker(pipeline, rt))
                        .expect("failed to spawn link worker"),
                );
            }
        }

        // delay-queue worker
        let pipeline = self.pipeline.clone();
        self.workers.push(
            thread::Builder::new()
                .name("delay-queue".to_string())
                .spawn(move || delay_worker(pipeline))
                .expect("failed to spawn delay worker"),
        );

        // control-plane worker
        let drivers = self.drivers.clone();
        let rib = self.rib.clone();
        let route_rx = self.route_rx.clone();
        let stopper = self.pipeline.stopper.clone();
        self.workers.push(
            thread::Builder::new()
                .name("control".to_string())
                .spawn(move || control_worker(drivers, rib, route_rx, stopper))
                .expect("failed to spawn control worker"),
        );
    }

    /// Stop everything: drivers terminate their sessions, workers drain and exit.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        let now = Instant::now();
        for driver in self.drivers.lock().iter_mut() {
            driver.stop(now);
        }
        self.pipeline.stopper.stop();
        for runtime in self.pipeline.interfaces.values() {
            runtime.wake_ingress();
            runtime.wake_egress();
        }
        self.pipeline.delay.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("router {} stopped", self.config.router.hostname);
    }

    /// Accept one raw frame on an interface. The only effect is zero or more egress emissions;
    /// every failure along the pipeline is a counted drop.
    pub fn ingress(&self, iface: InterfaceId, bytes: Vec<u8>) {
        self.pipeline.ingress(iface, Instant::now(), bytes);
    }

    /// Deliver one protocol message from a peer (the control-plane side of ingress).
    pub fn deliver_protocol_message(&self, protocol: Protocol, from: IpAddr, bytes: &[u8]) {
        let now = Instant::now();
        for driver in self.drivers.lock().iter_mut() {
            if driver.protocol() == protocol {
                driver.handle_message(from, bytes, now);
            }
        }
    }

    /// The channel on which the drivers emit wire messages towards their peers.
    pub fn outbound_messages(&self) -> &Receiver<OutboundMessage> {
        &self.msg_rx
    }

    /// Add a static route.
    pub fn add_static_route(
        &self,
        prefix: Prefix,
        next_hop: IpAddr,
        iface: InterfaceId,
        metric: u32,
    ) {
        let route = Route::new(prefix, next_hop, iface, metric, Protocol::Static);
        self.rib.apply_route_update(RouteUpdate { route, action: RouteAction::Add });
    }

    /// Remove a static route.
    pub fn remove_static_route(&self, prefix: Prefix) {
        let route = Route::new(
            prefix,
            IpAddr::from([0u8, 0, 0, 0]),
            InterfaceId(0),
            0,
            Protocol::Static,
        );
        self.rib.apply_route_update(RouteUpdate { route, action: RouteAction::Withdraw });
    }

    /// Originate a local route into one protocol.
    pub fn advertise(&self, protocol: Protocol, route: Route) -> Result<(), Error> {
        let now = Instant::now();
        for driver in self.drivers.lock().iter_mut() {
            if driver.protocol() == protocol {
                return driver.advertise(route, now);
            }
        }
        Err(Error::InvalidConfig {
            field: format!("protocols.{}", protocol),
            reason: "protocol is not enabled".to_string(),
        })
    }

    /// Resolve a destination through the FIB, as a fallible operation.
    pub fn resolve(&self, dst: IpAddr) -> Result<(IpAddr, InterfaceId), Error> {
        self.pipeline.fib.lookup(dst).ok_or(Error::NoRoute(dst))
    }

    /// The forwarding table.
    pub fn fib(&self) -> &Arc<Fib> {
        self.rib.fib()
    }

    /// The routing information base.
    pub fn rib(&self) -> &Arc<Rib> {
        &self.rib
    }

    /// The metrics surface.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.pipeline.metrics
    }

    /// Neighbor state across all protocol drivers.
    pub fn neighbors(&self) -> Vec<NeighborSummary> {
        self.drivers.lock().iter().flat_map(|d| d.neighbors()).collect()
    }

    /// Number of future-dated packets waiting in the delay queue.
    pub fn delayed_packets(&self) -> usize {
        self.pipeline.delay.len()
    }

    /// The channel half handed to external route feeders (e.g. an external routing daemon
    /// bridge acting as an alternative RIB source).
    pub fn route_feed(&self) -> Sender<RouteUpdate> {
        self.route_tx.clone()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the shaper of one interface direction from its configuration. Without a `shaping:`
/// entry, the interface rate-limits at its nominal bandwidth with a two-MTU burst.
fn build_shaper(
    config: Option<&ShapingConfig>,
    bandwidth_mbps: u64,
    now: Instant,
) -> Box<dyn Shaper> {
    match config {
        None => {
            let rate = bandwidth_mbps * 125_000;
            Box::new(TokenBucketShaper::new(rate.max(3_000), rate, 1024, now))
        }
        Some(cfg) => {
            let classes: Vec<TrafficClass> = cfg
                .classes
                .iter()
                .map(|c| TrafficClass {
                    id: c.id,
                    weight: c.weight.max(1),
                    min_bandwidth: c.min_bandwidth,
                    max_bandwidth: c.max_bandwidth,
                    active: true,
                })
                .collect();
            match cfg.algorithm {
                ShapingAlgorithm::TokenBucket => Box::new(TokenBucketShaper::new(
                    cfg.burst_bytes,
                    cfg.rate_bytes_per_sec,
                    cfg.queue_depth,
                    now,
                )),
                ShapingAlgorithm::Wfq => Box::new(WfqScheduler::new(classes, cfg.queue_depth)),
                ShapingAlgorithm::Drr => {
                    Box::new(DrrScheduler::new(classes, cfg.base_quantum, cfg.queue_depth))
                }
            }
        }
    }
}

fn ingress_worker(pipeline: Arc<Pipeline>, runtime: Arc<InterfaceRuntime>) {
    while !pipeline.stopper.is_stopped() {
        let _ = runtime.ingress_wake.1.recv_timeout(POLL);
        loop {
            let now = Instant::now();
            let packet = match runtime.ingress_shaper.lock().dequeue(now) {
                Some(packet) => packet,
                None => break,
            };
            pipeline.impair(&runtime, packet, now);
        }
    }
    trace!("{}-in: exiting", runtime.name);
}

fn egress_worker(pipeline: Arc<Pipeline>, runtime: Arc<InterfaceRuntime>) {
    while !pipeline.stopper.is_stopped() {
        let _ = runtime.egress_wake.1.recv_timeout(POLL);
        pipeline.drain_egress(&runtime, Instant::now());
    }
    // drain once more so that nothing sits in the queue after shutdown
    pipeline.drain_egress(&runtime, Instant::now());
    trace!("{}-out: exiting", runtime.name);
}

fn link_rx_worker(pipeline: Arc<Pipeline>, runtime: Arc<InterfaceRuntime>) {
    while !pipeline.stopper.is_stopped() {
        let link = runtime.link.lock().clone();
        let frame = match link {
            Some(link) => link.recv(POLL),
            None => break,
        };
        if let Some((at, bytes)) = frame {
            pipeline.ingress(runtime.id, at, bytes);
        }
    }
    trace!("{}-rx: exiting", runtime.name);
}

fn delay_worker(pipeline: Arc<Pipeline>) {
    while !pipeline.stopper.is_stopped() {
        let now = Instant::now();
        for packet in pipeline.delay.pop_due(now) {
            pipeline.forward(packet, now);
        }
    }
    trace!("delay-queue: exiting");
}

fn control_worker(
    drivers: Arc<Mutex<Vec<Box<dyn ProtocolDriver>>>>,
    rib: Arc<Rib>,
    route_rx: Receiver<RouteUpdate>,
    stopper: Stopper,
) {
    while !stopper.is_stopped() {
        let deadline = Instant::now() + CONTROL_TICK;
        while let Ok(update) = route_rx.recv_deadline(deadline) {
            rib.apply_route_update(update);
        }
        let now = Instant::now();
        for driver in drivers.lock().iter_mut() {
            driver.tick(now);
        }
    }
    // drain the last route updates so that driver stop() withdrawals reach the merger
    while let Ok(update) = route_rx.try_recv() {
        rib.apply_route_update(update);
    }
    trace!("control: exiting");
}
