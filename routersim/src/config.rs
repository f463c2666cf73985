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

//! # Configuration
//!
//! The recognized configuration surface, deserialized from YAML. Validation identifies the
//! offending field; an invalid configuration at startup is fatal ([`Error::InvalidConfig`]).

use crate::impairments::{DelayDistribution, ImpairmentStage, LossModel};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// Complete configuration of one simulated router.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    /// router identity
    pub router: RouterSection,
    /// interface table
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    /// protocol parameters
    #[serde(default)]
    pub protocols: ProtocolsConfig,
    /// shaping discipline per interface name
    #[serde(default)]
    pub shaping: HashMap<String, ShapingConfig>,
    /// impairment stages per interface name
    #[serde(default)]
    pub impairments: HashMap<String, ImpairmentsConfig>,
}

/// The `router:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterSection {
    /// router identification (dotted quad or plain integer)
    pub router_id: u32,
    /// hostname used in logs
    #[serde(default)]
    pub hostname: String,
    /// local AS number (BGP)
    #[serde(default)]
    pub as_number: u32,
    /// area identification (OSPF)
    #[serde(default)]
    pub area_id: u32,
    /// system identification (IS-IS)
    #[serde(default)]
    pub system_id: u64,
}

/// One entry of the `interfaces:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// interface name, unique within the router
    pub name: String,
    /// interface address
    pub ip_address: IpAddr,
    /// subnet mask length (bits)
    pub subnet_mask: u8,
    /// maximum transmission unit
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// nominal bandwidth in Mbit/s
    #[serde(default = "default_bandwidth")]
    pub bandwidth_mbps: u64,
    /// disabled interfaces accept no traffic
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_mtu() -> u32 {
    1500
}

fn default_bandwidth() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// The `protocols:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProtocolsConfig {
    /// BGP parameters
    #[serde(default)]
    pub bgp: Option<BgpConfig>,
    /// OSPF parameters
    #[serde(default)]
    pub ospf: Option<OspfConfig>,
    /// IS-IS parameters
    #[serde(default)]
    pub isis: Option<IsisConfig>,
}

/// BGP section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpConfig {
    /// master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// hold time in seconds
    #[serde(default = "default_hold_time")]
    pub hold_time: u64,
    /// keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_interval: u64,
    /// configured neighbors
    #[serde(default)]
    pub neighbors: Vec<BgpNeighborConfig>,
}

fn default_hold_time() -> u64 {
    90
}

fn default_keepalive() -> u64 {
    30
}

/// One BGP neighbor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpNeighborConfig {
    /// peer address
    pub peer: IpAddr,
    /// expected remote AS number
    pub remote_as: u32,
    /// interface index towards the peer
    pub iface: u32,
    /// LOCAL-PREF applied to routes learned from this neighbor
    #[serde(default)]
    pub local_pref: Option<u32>,
    /// prefixes never exported to this neighbor
    #[serde(default)]
    pub export_deny: Vec<String>,
}

/// OSPF section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OspfConfig {
    /// master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// area of this router
    #[serde(default)]
    pub area: u32,
    /// hello interval in seconds
    #[serde(default = "default_hello")]
    pub hello_interval: u64,
    /// dead interval (hold time) in seconds
    #[serde(default = "default_dead")]
    pub dead_interval: u64,
    /// configured neighbors
    #[serde(default)]
    pub neighbors: Vec<IgpNeighborConfig>,
}

fn default_hello() -> u64 {
    10
}

fn default_dead() -> u64 {
    40
}

/// IS-IS section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsisConfig {
    /// master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 1, 2, or 3 for level-1-2 operation
    #[serde(default = "default_isis_level")]
    pub level: u8,
    /// DIS election priority of this router
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// hello interval in seconds
    #[serde(default = "default_hello")]
    pub hello_interval: u64,
    /// hold time in seconds
    #[serde(default = "default_dead")]
    pub hold_time: u64,
    /// configured neighbors
    #[serde(default)]
    pub neighbors: Vec<IgpNeighborConfig>,
}

fn default_isis_level() -> u8 {
    3
}

fn default_priority() -> u8 {
    64
}

/// One link-state protocol neighbor (OSPF or IS-IS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgpNeighborConfig {
    /// peer address
    pub peer: IpAddr,
    /// interface index towards the peer
    pub iface: u32,
    /// link cost
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_cost() -> u32 {
    10
}

/// Selected shaping discipline of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapingAlgorithm {
    /// single-class token bucket
    TokenBucket,
    /// weighted fair queuing
    Wfq,
    /// deficit round robin
    Drr,
}

/// The `shaping.<interface>:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapingConfig {
    /// discipline to instantiate
    pub algorithm: ShapingAlgorithm,
    /// token bucket: sustained rate in bytes per second
    #[serde(default = "default_rate")]
    pub rate_bytes_per_sec: u64,
    /// token bucket: capacity (burst) in bytes
    #[serde(default = "default_burst")]
    pub burst_bytes: u64,
    /// DRR: base quantum in bytes (quantum = base * weight)
    #[serde(default = "default_quantum")]
    pub base_quantum: u64,
    /// per-class queue depth limit
    #[serde(default = "default_depth")]
    pub queue_depth: usize,
    /// traffic classes (WFQ and DRR)
    #[serde(default)]
    pub classes: Vec<TrafficClassConfig>,
}

fn default_rate() -> u64 {
    125_000
}

fn default_burst() -> u64 {
    64_000
}

fn default_quantum() -> u64 {
    1500
}

fn default_depth() -> usize {
    1024
}

/// One traffic class of a WFQ or DRR discipline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficClassConfig {
    /// class identification
    pub id: u8,
    /// scheduling weight, at least 1
    pub weight: u32,
    /// guaranteed bandwidth in bits per second
    #[serde(default)]
    pub min_bandwidth: u64,
    /// bandwidth ceiling in bits per second
    #[serde(default = "default_max_bandwidth")]
    pub max_bandwidth: u64,
}

fn default_max_bandwidth() -> u64 {
    u64::MAX
}

/// The `impairments.<interface>:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpairmentsConfig {
    /// fixed RNG seed; omitted means entropy-based
    #[serde(default)]
    pub seed: Option<u64>,
    /// ordered stages
    #[serde(default)]
    pub stages: Vec<ImpairmentStageConfig>,
}

/// One impairment stage, as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImpairmentStageConfig {
    /// delay with jitter
    Delay {
        /// mean delay in milliseconds
        mean_ms: u64,
        /// jitter scale in milliseconds
        #[serde(default)]
        jitter_ms: u64,
        /// jitter distribution
        #[serde(default = "default_distribution")]
        distribution: DistributionConfig,
    },
    /// independent random loss
    Loss {
        /// loss probability
        p: f64,
    },
    /// correlated loss
    CorrelatedLoss {
        /// base loss probability
        p: f64,
        /// correlation with the previous decision
        correlation: f64,
    },
    /// two-state Gilbert-Elliott loss
    GilbertElliott {
        /// good to bad transition probability
        p: f64,
        /// bad to good transition probability
        r: f64,
        /// delivery probability in the bad state
        h: f64,
        /// delivery probability in the good state
        k: f64,
    },
    /// duplication
    Duplicate {
        /// duplication probability
        p: f64,
    },
    /// single-bit corruption
    Corrupt {
        /// corruption probability
        p: f64,
    },
    /// reordering
    Reorder {
        /// reorder probability
        p: f64,
        /// positions to push the packet back
        gap: u64,
    },
    /// rate limiting
    Rate {
        /// sustained rate in bits per second
        bps: u64,
        /// burst allowance in bytes
        burst: u64,
    },
}

/// Jitter distribution names of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionConfig {
    /// uniform in mean +- jitter
    Uniform,
    /// normal with standard deviation jitter
    Normal,
    /// shifted pareto
    Pareto,
    /// pareto-normal mix
    Paretonormal,
}

fn default_distribution() -> DistributionConfig {
    DistributionConfig::Uniform
}

impl From<DistributionConfig> for DelayDistribution {
    fn from(d: DistributionConfig) -> Self {
        match d {
            DistributionConfig::Uniform => DelayDistribution::Uniform,
            DistributionConfig::Normal => DelayDistribution::Normal,
            DistributionConfig::Pareto => DelayDistribution::Pareto,
            DistributionConfig::Paretonormal => DelayDistribution::ParetoNormal,
        }
    }
}

impl ImpairmentStageConfig {
    /// Translate the configured stage into its runtime form.
    pub fn to_stage(&self) -> ImpairmentStage {
        match self {
            Self::Delay { mean_ms, jitter_ms, distribution } => ImpairmentStage::Delay {
                mean: Duration::from_millis(*mean_ms),
                jitter: Duration::from_millis(*jitter_ms),
                distribution: (*distribution).into(),
            },
            Self::Loss { p } => ImpairmentStage::Loss(LossModel::Random { p: *p }),
            Self::CorrelatedLoss { p, correlation } => {
                ImpairmentStage::Loss(LossModel::Correlated { p: *p, rho: *correlation })
            }
            Self::GilbertElliott { p, r, h, k } => {
                ImpairmentStage::Loss(LossModel::GilbertElliott { p: *p, r: *r, h: *h, k: *k })
            }
            Self::Duplicate { p } => ImpairmentStage::Duplicate { p: *p },
            Self::Corrupt { p } => ImpairmentStage::Corrupt { p: *p },
            Self::Reorder { p, gap } => ImpairmentStage::Reorder { p: *p, gap: *gap },
            Self::Rate { bps, burst } => ImpairmentStage::Rate { bps: *bps, burst: *burst },
        }
    }

    fn probability(&self) -> Option<f64> {
        match self {
            Self::Loss { p }
            | Self::CorrelatedLoss { p, .. }
            | Self::Duplicate { p }
            | Self::Corrupt { p }
            | Self::Reorder { p, .. } => Some(*p),
            _ => None,
        }
    }
}

impl RouterConfig {
    /// Deserialize a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::InvalidConfig {
            field: "yaml".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration. The returned error names the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Error {
            Error::InvalidConfig { field: field.into(), reason: reason.into() }
        }

        if self.router.router_id == 0 {
            return Err(invalid("router.router_id", "must not be zero"));
        }

        let mut names = std::collections::HashSet::new();
        for (i, iface) in self.interfaces.iter().enumerate() {
            let field = format!("interfaces[{}]", i);
            if iface.name.is_empty() {
                return Err(invalid(format!("{}.name", field), "must not be empty"));
            }
            if !names.insert(iface.name.clone()) {
                return Err(invalid(format!("{}.name", field), "duplicate interface name"));
            }
            let mask_bits = match iface.ip_address {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if iface.subnet_mask > mask_bits {
                return Err(invalid(
                    format!("{}.subnet_mask", field),
                    format!("/{} exceeds the address family width", iface.subnet_mask),
                ));
            }
            if iface.mtu < 68 {
                return Err(invalid(format!("{}.mtu", field), "below the IPv4 minimum of 68"));
            }
        }

        if let Some(bgp) = &self.protocols.bgp {
            if bgp.enabled {
                if self.router.as_number == 0 {
                    return Err(invalid("router.as_number", "required when BGP is enabled"));
                }
                if bgp.keepalive_interval * 3 > bgp.hold_time {
                    return Err(invalid(
                        "protocols.bgp.keepalive_interval",
                        "hold_time must be at least three keepalive intervals",
                    ));
                }
                for (i, n) in bgp.neighbors.iter().enumerate() {
                    if n.remote_as == 0 {
                        return Err(invalid(
                            format!("protocols.bgp.neighbors[{}].remote_as", i),
                            "must not be zero",
                        ));
                    }
                    for (j, d) in n.export_deny.iter().enumerate() {
                        if d.parse::<crate::types::Prefix>().is_err() {
                            return Err(invalid(
                                format!("protocols.bgp.neighbors[{}].export_deny[{}]", i, j),
                                format!("cannot parse prefix {:?}", d),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(isis) = &self.protocols.isis {
            if isis.enabled {
                if self.router.system_id == 0 {
                    return Err(invalid("router.system_id", "required when IS-IS is enabled"));
                }
                if !(1..=3).contains(&isis.level) {
                    return Err(invalid("protocols.isis.level", "must be 1, 2 or 3"));
                }
            }
        }

        for (name, shaping) in self.shaping.iter() {
            if !names.contains(name) {
                return Err(invalid(
                    format!("shaping.{}", name),
                    "refers to an unknown interface",
                ));
            }
            for (i, class) in shaping.classes.iter().enumerate() {
                let field = format!("shaping.{}.classes[{}]", name, i);
                if class.weight == 0 {
                    return Err(invalid(format!("{}.weight", field), "must be at least 1"));
                }
                if class.min_bandwidth > class.max_bandwidth {
                    return Err(invalid(
                        format!("{}.min_bandwidth", field),
                        "exceeds max_bandwidth",
                    ));
                }
            }
            match shaping.algorithm {
                ShapingAlgorithm::Wfq | ShapingAlgorithm::Drr if shaping.classes.is_empty() => {
                    return Err(invalid(
                        format!("shaping.{}.classes", name),
                        "at least one traffic class is required",
                    ));
                }
                _ => {}
            }
        }

        for (name, impairments) in self.impairments.iter() {
            if !names.contains(name) {
                return Err(invalid(
                    format!("impairments.{}", name),
                    "refers to an unknown interface",
                ));
            }
            for (i, stage) in impairments.stages.iter().enumerate() {
                if let Some(p) = stage.probability() {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(invalid(
                            format!("impairments.{}.stages[{}].p", name, i),
                            "probability must be within [0, 1]",
                        ));
                    }
                }
                if let ImpairmentStageConfig::GilbertElliott { p, r, h, k } = stage {
                    for (key, v) in [("p", p), ("r", r), ("h", h), ("k", k)].iter() {
                        if !(0.0..=1.0).contains(*v) {
                            return Err(invalid(
                                format!("impairments.{}.stages[{}].{}", name, i, key),
                                "probability must be within [0, 1]",
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Interface index by name, as used by the shaping and impairment sections.
    pub fn iface_index(&self, name: &str) -> Option<u32> {
        self.interfaces.iter().position(|i| i.name == name).map(|i| i as u32)
    }
}
