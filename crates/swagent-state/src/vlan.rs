//! VLAN entity with its embedded neighbor and MAC tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use swagent_types::{AddressFamily, InterfaceId, PortId, VlanId};

use crate::delta::CoarseIdentity;
use crate::neighbor::{MacTable, NeighborTable};
use crate::node_map::Node;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    pub name: String,
    /// Router interface bound to this VLAN.
    #[serde(default)]
    pub interface_id: Option<InterfaceId>,
    /// Member ports and whether each is tagged.
    #[serde(default)]
    pub members: BTreeMap<PortId, bool>,
    #[serde(default)]
    pub arp_table: NeighborTable,
    #[serde(default)]
    pub ndp_table: NeighborTable,
    #[serde(default)]
    pub mac_table: MacTable,
}

impl Vlan {
    pub fn new(id: VlanId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            interface_id: None,
            members: BTreeMap::new(),
            arp_table: NeighborTable::new(),
            ndp_table: NeighborTable::new(),
            mac_table: MacTable::new(),
        }
    }

    pub fn with_interface(mut self, interface_id: InterfaceId) -> Self {
        self.interface_id = Some(interface_id);
        self
    }

    pub fn with_member(mut self, port: PortId, tagged: bool) -> Self {
        self.members.insert(port, tagged);
        self
    }

    pub fn neighbor_table(&self, family: AddressFamily) -> &NeighborTable {
        match family {
            AddressFamily::V4 => &self.arp_table,
            AddressFamily::V6 => &self.ndp_table,
        }
    }

    pub fn neighbor_table_mut(&mut self, family: AddressFamily) -> &mut NeighborTable {
        match family {
            AddressFamily::V4 => &mut self.arp_table,
            AddressFamily::V6 => &mut self.ndp_table,
        }
    }
}

impl Node for Vlan {
    type Key = VlanId;

    fn key(&self) -> VlanId {
        self.id
    }
}

// Rebinding a VLAN to another router interface re-scopes every neighbor in
// it, so the neighbor tables are not diffed entry by entry.
impl CoarseIdentity for Vlan {
    fn coarse_differs(&self, other: &Self) -> bool {
        self.interface_id != other.interface_id
    }
}
