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

//! Module containing all type definitions shared between the RIB, the FIB and the protocol
//! drivers.

use crate::Error;
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Instant;

/// Interface identification (index into the interface table of the router)
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

impl From<u32> for InterfaceId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

/// Router identification, as used by the link-state protocols and by BGP.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct RouterId(pub u32);

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0.to_be_bytes();
        write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])
    }
}

impl From<u32> for RouterId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

impl From<Ipv4Addr> for RouterId {
    fn from(x: Ipv4Addr) -> Self {
        Self(u32::from(x))
    }
}

/// AS Number
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct AsId(pub u32);

impl fmt::Display for AsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

/// IS-IS system identification (6 octets, stored in the low 48 bits)
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct SystemId(pub u64);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(f, "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}", b[2], b[3], b[4], b[5], b[6], b[7])
    }
}

/// Address family of a [`Prefix`].
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub enum AddressFamily {
    /// IPv4 (32 bit addresses)
    Ipv4,
    /// IPv6 (128 bit addresses)
    Ipv6,
}

impl AddressFamily {
    /// Width of an address in bits.
    pub fn bits(&self) -> u8 {
        match self {
            Self::Ipv4 => 32,
            Self::Ipv6 => 128,
        }
    }
}

/// IP prefix: address family, network address and prefix length. The network address is always
/// masked, such that two prefixes are equal iff family, network and length match. The ordering
/// sorts by prefix length (descending) first, and by network address (ascending) second, which is
/// the iteration order used during longest-prefix match.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    /// Create a new prefix from an address and a length. The address is masked down to the
    /// network address. Fails with [`Error::InvalidPrefix`] if the length exceeds the width of
    /// the address family.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, Error> {
        let family_bits = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len > family_bits {
            return Err(Error::InvalidPrefix { len, family_bits });
        }
        Ok(Self { addr: mask_addr(addr, len), len })
    }

    /// Convenience constructor for IPv4 prefixes.
    pub fn v4(a: u8, b: u8, c: u8, d: u8, len: u8) -> Result<Self, Error> {
        Self::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), len)
    }

    /// The (masked) network address.
    pub fn network(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Returns true only for the zero-length default route of either family.
    pub fn is_default(&self) -> bool {
        self.len == 0
    }

    /// The address family of the prefix.
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Returns the `i`-th bit of the network address (0 is the most significant bit).
    pub(crate) fn bit(&self, i: u8) -> bool {
        addr_bit(self.addr, i)
    }

    /// Check whether an address falls within this prefix. Addresses of a different family never
    /// match.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.addr, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask_addr(addr, self.len) == self.addr
            }
            _ => false,
        }
    }
}

impl PartialOrd for Prefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prefix {
    fn cmp(&self, other: &Self) -> Ordering {
        other.len.cmp(&self.len).then_with(|| self.addr.cmp(&other.addr))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '/');
        let addr = parts
            .next()
            .and_then(|a| a.parse::<IpAddr>().ok())
            .ok_or_else(|| Error::InvalidConfig {
                field: "prefix".to_string(),
                reason: format!("cannot parse network address in {:?}", s),
            })?;
        let len = parts
            .next()
            .and_then(|l| l.parse::<u8>().ok())
            .ok_or_else(|| Error::InvalidConfig {
                field: "prefix".to_string(),
                reason: format!("cannot parse prefix length in {:?}", s),
            })?;
        Self::new(addr, len)
    }
}

fn mask_addr(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(a) => {
            let raw = u32::from(a);
            let masked = if len == 0 { 0 } else { raw & (u32::MAX << (32 - len as u32)) };
            IpAddr::V4(Ipv4Addr::from(masked))
        }
        IpAddr::V6(a) => {
            let raw = u128::from(a);
            let masked = if len == 0 { 0 } else { raw & (u128::MAX << (128 - len as u32)) };
            IpAddr::V6(Ipv6Addr::from(masked))
        }
    }
}

fn addr_bit(addr: IpAddr, i: u8) -> bool {
    match addr {
        IpAddr::V4(a) => (u32::from(a) >> (31 - i as u32)) & 1 == 1,
        IpAddr::V6(a) => (u128::from(a) >> (127 - i as u32)) & 1 == 1,
    }
}

/// The protocol a route was learned from.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub enum Protocol {
    /// Directly connected network
    Connected,
    /// Statically configured route
    Static,
    /// Open Shortest Path First
    Ospf,
    /// Intermediate System to Intermediate System
    Isis,
    /// Border Gateway Protocol
    Bgp,
}

impl Protocol {
    /// All protocols, in tie-break rank order.
    pub const ALL: [Protocol; 5] =
        [Protocol::Connected, Protocol::Static, Protocol::Ospf, Protocol::Isis, Protocol::Bgp];

    /// Default administrative distance of the protocol.
    pub fn default_admin_distance(&self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Static => 1,
            Self::Ospf => 110,
            Self::Isis => 115,
            Self::Bgp => 200,
        }
    }

    /// Rank used as tie-break in best-route selection (Connected < Static < OSPF < IS-IS < BGP).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Static => 1,
            Self::Ospf => 2,
            Self::Isis => 3,
            Self::Bgp => 4,
        }
    }

    /// Short lowercase name, as used in metrics labels and the route snapshot format.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Static => "static",
            Self::Ospf => "ospf",
            Self::Isis => "isis",
            Self::Bgp => "bgp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "static" => Ok(Self::Static),
            "ospf" => Ok(Self::Ospf),
            "isis" => Ok(Self::Isis),
            "bgp" => Ok(Self::Bgp),
            _ => Err(Error::InvalidConfig {
                field: "protocol".to_string(),
                reason: format!("unknown protocol {:?}", s),
            }),
        }
    }
}

/// Origin attribute of a BGP route. The ordering is the preference order of the decision ladder
/// (IGP is preferred over EGP, which is preferred over Incomplete).
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub enum BgpOrigin {
    /// Route originated by an interior protocol
    Igp,
    /// Route originated by EGP
    Egp,
    /// Origin unknown (e.g. redistributed)
    Incomplete,
}

/// BGP path attributes carried in the opaque attribute bag of a [`Route`].
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct BgpPathAttrs {
    /// AS path, origin AS last
    pub as_path: Vec<AsId>,
    /// LOCAL-PREF (default 100)
    pub local_pref: u32,
    /// Multi-Exit Discriminator (default 0)
    pub med: u32,
    /// ORIGIN attribute
    pub origin: BgpOrigin,
    /// whether the route was learned over an eBGP session
    pub from_ebgp: bool,
}

/// Protocol-specific route attributes, carried opaquely by the RIB and the FIB.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RouteAttrs {
    /// No protocol-specific attributes (Connected / Static)
    None,
    /// BGP path attributes
    Bgp(BgpPathAttrs),
    /// OSPF area the route was computed in
    Ospf {
        /// area identification
        area: u32,
    },
    /// IS-IS level the route was computed in
    Isis {
        /// 1 or 2
        level: u8,
    },
}

/// A single route as handed from a protocol driver to the RIB merger.
#[derive(Debug, Clone)]
pub struct Route {
    /// destination prefix
    pub prefix: Prefix,
    /// address of the next hop
    pub next_hop: IpAddr,
    /// egress interface towards the next hop
    pub iface: InterfaceId,
    /// protocol metric (IGP cost, BGP MED, configured metric for static routes)
    pub metric: u32,
    /// administrative distance
    pub admin_distance: u8,
    /// protocol the route was learned from
    pub protocol: Protocol,
    /// inactive routes are kept in the RIB but never selected
    pub active: bool,
    /// monotonic timestamp of the last update to this route
    pub last_updated: Instant,
    /// protocol-specific attributes
    pub attrs: RouteAttrs,
}

impl Route {
    /// Create an active route with the protocol's default administrative distance and no
    /// protocol-specific attributes.
    pub fn new(
        prefix: Prefix,
        next_hop: IpAddr,
        iface: InterfaceId,
        metric: u32,
        protocol: Protocol,
    ) -> Self {
        Self {
            prefix,
            next_hop,
            iface,
            metric,
            admin_distance: protocol.default_admin_distance(),
            protocol,
            active: true,
            last_updated: Instant::now(),
            attrs: RouteAttrs::None,
        }
    }

    /// The sort key of best-route selection: administrative distance, then metric, then protocol
    /// rank. The caller breaks remaining ties on `last_updated`.
    pub(crate) fn selection_key(&self) -> (u8, u32, u8) {
        (self.admin_distance, self.metric, self.protocol.rank())
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
            && self.next_hop == other.next_hop
            && self.iface == other.iface
            && self.metric == other.metric
            && self.admin_distance == other.admin_distance
            && self.protocol == other.protocol
            && self.active == other.active
            && self.attrs == other.attrs
    }
}

impl Eq for Route {}
