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

//! Module containing all error kinds of the simulator.

use thiserror::Error;

/// Main error of the simulator. Local errors inside a pipeline stage are counted and logged, and
/// surface as packet drops with a reason or as neighbor failures; they never tear down the
/// process. `InvalidConfig` at startup is fatal. `ShutdownRequested` is not an error in the usual
/// sense, but short-circuits all worker loops.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// The prefix length exceeds the width of the address family.
    #[error("Invalid prefix: /{len} exceeds the {family_bits}-bit address family")]
    InvalidPrefix {
        /// requested prefix length
        len: u8,
        /// width of the address family in bits
        family_bits: u8,
    },
    /// The configuration is invalid. The field tells which key is at fault.
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// the offending configuration field
        field: String,
        /// why the value is rejected
        reason: String,
    },
    /// A bounded queue is at its configured depth.
    #[error("Queue is full (depth {0})")]
    QueueFull(usize),
    /// No FIB entry covers the destination.
    #[error("No route to {0}")]
    NoRoute(std::net::IpAddr),
    /// The packet could not be decoded.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
    /// A protocol message could not be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),
    /// The adjacency to a neighbor was lost.
    #[error("Adjacency lost to neighbor {0}")]
    AdjacencyLost(std::net::IpAddr),
    /// Shutdown was requested while the operation was in flight.
    #[error("Shutdown requested")]
    ShutdownRequested,
    /// A resource limit was hit (e.g. too many pending duplicates).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),
}
