//! Resource accountant types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use swagent_state::StateError;
use swagent_types::SwitchId;
use thiserror::Error;

/// Default percentage of the hardware limit a whole transition may reach.
pub const DEFAULT_ECMP_RESOURCE_PERCENTAGE: u8 = 75;

/// Default maximum total weight of one weighted next-hop group.
pub const DEFAULT_UCMP_WIDTH: u64 = 64;

/// Hardware member entries used per next hop of a weighted group on ASICs
/// that scale native weighted members.
pub const SCALED_WEIGHTED_MEMBER_FACTOR: u32 = 4;

/// Switching ASIC family, as far as capacity accounting cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsicFamily {
    Trident2,
    Tomahawk,
    Tomahawk3,
    Tomahawk4,
    Jericho2,
    Jericho3,
    #[default]
    Fake,
}

/// How an ASIC spends member entries on a weighted next-hop group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightedMemberModel {
    /// No native weights: each next hop is replicated `weight` times.
    Replicated,
    /// Native weights, each next hop costs a fixed number of entries.
    Scaled { factor: u32 },
    /// Native weights, one entry per next hop.
    Native,
}

impl AsicFamily {
    pub const fn weighted_member_model(&self) -> WeightedMemberModel {
        match self {
            AsicFamily::Tomahawk3 | AsicFamily::Tomahawk4 => WeightedMemberModel::Scaled {
                factor: SCALED_WEIGHTED_MEMBER_FACTOR,
            },
            AsicFamily::Jericho2 | AsicFamily::Jericho3 => WeightedMemberModel::Native,
            AsicFamily::Trident2 | AsicFamily::Tomahawk | AsicFamily::Fake => {
                WeightedMemberModel::Replicated
            }
        }
    }
}

/// Capacity limits reported by one switch. A missing limit is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwCapacity {
    #[serde(default)]
    pub asic: AsicFamily,
    #[serde(default)]
    pub max_ecmp_groups: Option<u32>,
    #[serde(default)]
    pub max_ecmp_members: Option<u32>,
    #[serde(default)]
    pub max_routes: Option<u32>,
    #[serde(default)]
    pub max_arp_entries: Option<u32>,
    #[serde(default)]
    pub max_ndp_entries: Option<u32>,
    /// Shared cap across both families, checked when unified neighbor
    /// accounting is enabled.
    #[serde(default)]
    pub max_unified_neighbor_entries: Option<u32>,
    #[serde(default)]
    pub max_ars_groups: Option<u32>,
}

impl HwCapacity {
    pub fn new(asic: AsicFamily) -> Self {
        Self {
            asic,
            ..Self::default()
        }
    }
}

pub type HwCapacityTable = BTreeMap<SwitchId, HwCapacity>;

/// Accounting knobs supplied at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountantConfig {
    /// Percentage of ECMP and ARS limits a whole transition may reach.
    #[serde(default = "default_ecmp_resource_percentage")]
    pub ecmp_resource_percentage: u8,

    #[serde(default = "default_ucmp_width")]
    pub ucmp_width: u64,

    /// Account advanced load-balancing groups.
    #[serde(default)]
    pub ars_enabled: bool,

    /// Check neighbor usage against the unified per-switch cap too.
    #[serde(default)]
    pub unified_neighbor_table: bool,

    /// Flat global limit on learned MAC entries.
    #[serde(default)]
    pub max_l2_entries: Option<u32>,
}

fn default_ecmp_resource_percentage() -> u8 {
    DEFAULT_ECMP_RESOURCE_PERCENTAGE
}

fn default_ucmp_width() -> u64 {
    DEFAULT_UCMP_WIDTH
}

impl Default for AccountantConfig {
    fn default() -> Self {
        Self {
            ecmp_resource_percentage: default_ecmp_resource_percentage(),
            ucmp_width: default_ucmp_width(),
            ars_enabled: false,
            unified_neighbor_table: false,
            max_l2_entries: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    EcmpGroups,
    EcmpMembers,
    ArsGroups,
    Routes,
    ArpEntries,
    NdpEntries,
    UnifiedNeighborEntries,
    L2Entries,
}

impl ResourceKind {
    pub const fn name(&self) -> &'static str {
        match self {
            ResourceKind::EcmpGroups => "ecmp_groups",
            ResourceKind::EcmpMembers => "ecmp_members",
            ResourceKind::ArsGroups => "ars_groups",
            ResourceKind::Routes => "routes",
            ResourceKind::ArpEntries => "arp_entries",
            ResourceKind::NdpEntries => "ndp_entries",
            ResourceKind::UnifiedNeighborEntries => "unified_neighbor_entries",
            ResourceKind::L2Entries => "l2_entries",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point in a transition at which a limit was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckStage {
    /// After one route mutation, against the full hardware limit.
    Intermediate,
    /// After the whole transition, against the configured soft limit.
    Final,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStage::Intermediate => f.write_str("intermediate"),
            CheckStage::Final => f.write_str("final"),
        }
    }
}

/// One resource that went over budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceViolation {
    pub kind: ResourceKind,
    /// `None` for resources tracked globally (L2 entries).
    pub switch_id: Option<SwitchId>,
    pub stage: CheckStage,
    /// Effective limit at this stage.
    pub limit: u64,
    pub usage: u64,
}

impl fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.switch_id {
            Some(switch_id) => write!(
                f,
                "{} on {} ({} check): usage {} exceeds limit {}",
                self.kind, switch_id, self.stage, self.usage, self.limit
            ),
            None => write!(
                f,
                "{} ({} check): usage {} exceeds limit {}",
                self.kind, self.stage, self.usage, self.limit
            ),
        }
    }
}

/// A transition was rejected because it would exceed hardware capacity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("resources exhausted: {}", summarize(.violations))]
pub struct ResourceExhausted {
    pub violations: Vec<ResourceViolation>,
}

fn summarize(violations: &[ResourceViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResourceExhausted {
    pub fn has(&self, kind: ResourceKind, stage: CheckStage) -> bool {
        self.violations
            .iter()
            .any(|v| v.kind == kind && v.stage == stage)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountingError {
    #[error(transparent)]
    Exhausted(#[from] ResourceExhausted),

    /// Neighbor accounting could not resolve an interface to its switch.
    /// The ledger is no longer trustworthy after this.
    #[error("neighbor accounting lookup failed: {0}")]
    Lookup(#[from] StateError),
}
