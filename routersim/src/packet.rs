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

//! # Packet record
//!
//! The canonical, immutable packet value that travels through the forwarding pipeline. The wire
//! bytes are kept unmodified next to a parsed view of the L2/L3/L4 headers. Pipeline stages never
//! mutate a packet in place; the two impairments that need to (payload corruption, reorder
//! position) go through copy-on-write accessors.

use crate::types::InterfaceId;
use crate::Error;
use etherparse::{IpHeader, PacketHeaders, TransportHeader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Instant;

/// Parsed view of the packet headers. All fields are extracted once at ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketView {
    /// source IP address
    pub src_ip: IpAddr,
    /// destination IP address
    pub dst_ip: IpAddr,
    /// source port (0 if the transport has none)
    pub src_port: u16,
    /// destination port (0 if the transport has none)
    pub dst_port: u16,
    /// IP protocol number (6 tcp, 17 udp, 89 ospf, ...)
    pub ip_protocol: u8,
    /// Differentiated Services Code Point
    pub dscp: u8,
    /// total frame length in bytes
    pub length: usize,
    /// priority derived from the DSCP precedence bits
    pub priority: u8,
}

/// An immutable packet value. Cloning is cheap: the wire bytes are shared until an impairment
/// needs to modify them.
#[derive(Debug, Clone)]
pub struct Packet {
    id: u64,
    ingress: Instant,
    ingress_iface: InterfaceId,
    order: u64,
    wire: Arc<Vec<u8>>,
    view: PacketView,
}

impl Packet {
    /// Decode a frame received on `iface` into a packet record. The frame must start with an
    /// Ethernet II header followed by an IPv4 or IPv6 header; anything else is rejected as
    /// [`Error::MalformedPacket`].
    pub fn decode(
        id: u64,
        iface: InterfaceId,
        ingress: Instant,
        bytes: Vec<u8>,
    ) -> Result<Self, Error> {
        let headers = PacketHeaders::from_ethernet_slice(&bytes)
            .map_err(|e| Error::MalformedPacket(format!("{:?}", e)))?;

        let (src_ip, dst_ip, ip_protocol, dscp) = match headers.ip {
            Some(IpHeader::Version4(h)) => (
                IpAddr::V4(Ipv4Addr::from(h.source)),
                IpAddr::V4(Ipv4Addr::from(h.destination)),
                h.protocol,
                h.differentiated_services_code_point,
            ),
            Some(IpHeader::Version6(h)) => (
                IpAddr::V6(Ipv6Addr::from(h.source)),
                IpAddr::V6(Ipv6Addr::from(h.destination)),
                h.next_header,
                h.traffic_class >> 2,
            ),
            None => {
                return Err(Error::MalformedPacket("frame carries no IP header".to_string()));
            }
        };

        let (src_port, dst_port) = match headers.transport {
            Some(TransportHeader::Udp(h)) => (h.source_port, h.destination_port),
            Some(TransportHeader::Tcp(h)) => (h.source_port, h.destination_port),
            None => (0, 0),
        };

        let view = PacketView {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            ip_protocol,
            dscp,
            length: bytes.len(),
            priority: dscp >> 3,
        };

        Ok(Self { id, ingress, ingress_iface: iface, order: id, wire: Arc::new(bytes), view })
    }

    /// Monotonically increasing packet id, assigned at ingress.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The monotonic ingress timestamp.
    pub fn ingress_time(&self) -> Instant {
        self.ingress
    }

    /// The interface the packet was received on.
    pub fn ingress_iface(&self) -> InterfaceId {
        self.ingress_iface
    }

    /// Position key within the output ordering. Initially equal to the packet id; a `Reorder`
    /// impairment pushes it back by its configured gap.
    pub fn order(&self) -> u64 {
        self.order
    }

    /// The parsed header view.
    pub fn view(&self) -> &PacketView {
        &self.view
    }

    /// The unmodified wire bytes. Re-encoding a packet is the identity on these bytes.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.view.length
    }

    /// True if the frame is empty (never the case for decoded packets).
    pub fn is_empty(&self) -> bool {
        self.view.length == 0
    }

    /// Push the packet back by `gap` positions in the output order (copy-on-modify of the
    /// reorder position; the wire bytes stay shared).
    pub(crate) fn push_back_order(&mut self, gap: u64) {
        self.order = self.order.saturating_add(gap);
    }

    /// Flip a single bit of the payload. The wire bytes are copied on first write; other clones
    /// of the packet keep the original bytes.
    pub(crate) fn corrupt_bit(&mut self, bit_index: usize) {
        let bytes = Arc::make_mut(&mut self.wire);
        if bytes.is_empty() {
            return;
        }
        let bit = bit_index % (bytes.len() * 8);
        bytes[bit / 8] ^= 1 << (bit % 8);
    }

    /// Create an independent copy for a `Duplicate` impairment. The copy shares the wire bytes
    /// until one of the two is modified, and keeps the original ingress timestamp.
    pub(crate) fn fork(&self, new_id: u64) -> Self {
        let mut copy = self.clone();
        copy.id = new_id;
        copy.order = new_id;
        copy
    }
}
