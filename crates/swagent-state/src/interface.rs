//! Router interface entity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swagent_types::{InterfaceId, IpPrefix, SwitchId, VlanId};

use crate::node_map::Node;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    #[serde(default)]
    pub vlan_id: Option<VlanId>,
    /// Topology scope: the switch this interface is programmed on.
    pub switch_id: SwitchId,
    #[serde(default)]
    pub addresses: BTreeSet<IpPrefix>,
}

impl Interface {
    pub fn new(id: InterfaceId, name: impl Into<String>, switch_id: SwitchId) -> Self {
        Self {
            id,
            name: name.into(),
            vlan_id: None,
            switch_id,
            addresses: BTreeSet::new(),
        }
    }

    pub fn with_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan_id = Some(vlan);
        self
    }

    pub fn with_address(mut self, prefix: IpPrefix) -> Self {
        self.addresses.insert(prefix);
        self
    }
}

impl Node for Interface {
    type Key = InterfaceId;

    fn key(&self) -> InterfaceId {
        self.id
    }
}
