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

//! Shared helpers for the test modules.

use crate::packet::Packet;
use crate::types::InterfaceId;
use etherparse::PacketBuilder;
use std::time::Instant;

/// Build a decodable UDP-in-IPv4-in-Ethernet frame with the given payload length.
pub fn frame(src: [u8; 4], dst: [u8; 4], payload_len: usize) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
        .ipv4(src, dst, 64)
        .udp(12345, 443);
    let payload = vec![0u8; payload_len];
    let mut bytes = Vec::new();
    builder.write(&mut bytes, &payload).unwrap();
    bytes
}

/// Build a frame and patch the DSCP field of the IPv4 header.
pub fn frame_with_dscp(src: [u8; 4], dst: [u8; 4], payload_len: usize, dscp: u8) -> Vec<u8> {
    let mut bytes = frame(src, dst, payload_len);
    // ToS byte: 14 bytes of Ethernet header, then the second byte of the IPv4 header
    bytes[15] = dscp << 2;
    bytes
}

/// Decode a test packet with the given id.
pub fn packet(id: u64, payload_len: usize) -> Packet {
    Packet::decode(id, InterfaceId(0), Instant::now(), frame([10, 0, 0, 1], [10, 0, 0, 2], payload_len))
        .unwrap()
}
