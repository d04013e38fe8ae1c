//! Port entity and lookup classes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use swagent_types::{AdminState, PortId, VlanId};

use crate::error::{Result, StateError};
use crate::node_map::Node;

/// Classification stamped on neighbor and MAC entries.
///
/// The per-host queue classes are the ones a port may balance its
/// neighbors across; the remaining classes are reserved for local
/// destinations and are never balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupClass {
    QueuePerHost0,
    QueuePerHost1,
    QueuePerHost2,
    QueuePerHost3,
    QueuePerHost4,
    QueuePerHost5,
    QueuePerHost6,
    QueuePerHost7,
    QueuePerHost8,
    QueuePerHost9,
    LocalIp4,
    LocalIp6,
}

impl LookupClass {
    pub const fn is_queue_per_host(&self) -> bool {
        !matches!(self, LookupClass::LocalIp4 | LookupClass::LocalIp6)
    }
}

impl fmt::Display for LookupClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub vlans: BTreeSet<VlanId>,
    /// Ordered classes to balance neighbors across; empty disables balancing.
    #[serde(default)]
    pub lookup_classes: Vec<LookupClass>,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            admin_state: AdminState::default(),
            vlans: BTreeSet::new(),
            lookup_classes: Vec::new(),
        }
    }

    pub fn with_vlan(mut self, vlan: VlanId) -> Self {
        self.vlans.insert(vlan);
        self
    }

    /// Sets the balanced class list after validating it.
    ///
    /// # Errors
    ///
    /// Fails if a class is not a per-host queue class or appears twice.
    pub fn with_lookup_classes(mut self, classes: Vec<LookupClass>) -> Result<Self> {
        validate_lookup_classes(self.id, &classes)?;
        self.lookup_classes = classes;
        Ok(self)
    }
}

impl Node for Port {
    type Key = PortId;

    fn key(&self) -> PortId {
        self.id
    }
}

pub fn validate_lookup_classes(port: PortId, classes: &[LookupClass]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for class in classes {
        if !class.is_queue_per_host() {
            return Err(StateError::InvalidLookupClasses {
                port,
                reason: format!("{} cannot be balanced across", class),
            });
        }
        if !seen.insert(*class) {
            return Err(StateError::InvalidLookupClasses {
                port,
                reason: format!("{} listed more than once", class),
            });
        }
    }
    Ok(())
}
