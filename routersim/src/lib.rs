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

#![deny(missing_docs)]

//! # RouterSim: Simulating Multi-Protocol Routing and Forwarding
//!
//! A single-node, multi-protocol router simulator. It models the control plane (BGP, OSPF and
//! IS-IS adjacencies, route exchange and best-path selection) and the data plane (per-interface
//! queueing, shaping and programmable impairments) closely enough to reproduce realistic routing
//! convergence and forwarding behavior against captured traffic.
//!
//! ## Structure
//!
//! - **[`Router`](orchestrator::Router)**: the top-level value owning every component; see the
//!   [`orchestrator`] module for the ingress -> classify -> shape -> impair -> lookup -> egress
//!   pipeline.
//! - **[`Fib`](fib::Fib)**: longest-prefix-match forwarding table (radix trie per family).
//! - **[`Rib`](rib::Rib)**: the protocol-agnostic merger selecting one best route per prefix.
//! - **[`protocols`]**: the BGP, OSPF and IS-IS drivers behind the common
//!   [`ProtocolDriver`](protocols::ProtocolDriver) trait, each built on the shared
//!   [`Adjacency`](adjacency::Adjacency) state machine.
//! - **[`shaping`]**: token bucket, WFQ and DRR disciplines behind the
//!   [`Shaper`](shaping::Shaper) trait.
//! - **[`impairments`]**: the per-interface delay / loss / duplication / corruption / reorder /
//!   rate pipeline.
//!
//! ## Example
//!
//! ```
//! use routersim::config::RouterConfig;
//! use routersim::orchestrator::Router;
//! use routersim::types::{InterfaceId, Prefix};
//!
//! fn main() -> Result<(), routersim::Error> {
//!     let config = RouterConfig::from_yaml(
//!         r#"
//! router:
//!   router_id: 1
//!   hostname: r1
//! interfaces:
//!   - name: eth0
//!     ip_address: 192.168.1.1
//!     subnet_mask: 24
//! "#,
//!     )?;
//!     let router = Router::new(config)?;
//!     router.add_static_route(
//!         Prefix::v4(10, 0, 0, 0, 24)?,
//!         "192.168.1.2".parse().unwrap(),
//!         InterfaceId(0),
//!         0,
//!     );
//!     assert!(router.fib().lookup("10.0.0.5".parse().unwrap()).is_some());
//!     Ok(())
//! }
//! ```

pub mod adjacency;
pub mod config;
mod error;
pub mod fib;
pub mod impairments;
pub mod link;
pub mod metrics;
pub mod orchestrator;
pub mod packet;
pub mod protocols;
pub mod rib;
pub mod shaping;
pub mod types;

// test modules
mod test;

pub use error::Error;
pub use orchestrator::Router;

use parking_lot::RwLock;
use std::sync::Arc;

/// Stopper, to check when to stop, or to send the stop command. Cloned into every worker; all
/// blocking loops observe it.
#[derive(Clone, Debug)]
pub struct Stopper {
    b: Arc<RwLock<bool>>,
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopper {
    /// Create a new stopper.
    pub fn new() -> Self {
        Self { b: Arc::new(RwLock::new(false)) }
    }

    /// Send the stop command to all clones.
    pub fn stop(&self) {
        *self.b.write() = true;
    }

    /// Check if the stop command was sent.
    pub fn is_stopped(&self) -> bool {
        *self.b.read()
    }
}
