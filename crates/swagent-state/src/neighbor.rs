//! Neighbor (ARP/NDP) and learned MAC entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use swagent_types::{AggregatePortId, InterfaceId, IpAddress, MacAddress, PortId};

use crate::node_map::{Node, NodeMap};
use crate::port::LookupClass;

/// Where a neighbor or MAC entry resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborPort {
    Physical(PortId),
    Aggregate(AggregatePortId),
}

impl NeighborPort {
    pub const fn physical(&self) -> Option<PortId> {
        match self {
            NeighborPort::Physical(port) => Some(*port),
            NeighborPort::Aggregate(_) => None,
        }
    }
}

impl fmt::Display for NeighborPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeighborPort::Physical(port) => port.fmt(f),
            NeighborPort::Aggregate(agg) => agg.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborState {
    Reachable,
    /// Resolution requested, no reply yet.
    #[default]
    Pending,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub ip: IpAddress,
    pub mac: MacAddress,
    pub port: NeighborPort,
    pub interface_id: InterfaceId,
    #[serde(default)]
    pub state: NeighborState,
    #[serde(default)]
    pub class_id: Option<LookupClass>,
}

impl NeighborEntry {
    pub fn reachable(
        ip: IpAddress,
        mac: MacAddress,
        port: NeighborPort,
        interface_id: InterfaceId,
    ) -> Self {
        Self {
            ip,
            mac,
            port,
            interface_id,
            state: NeighborState::Reachable,
            class_id: None,
        }
    }

    /// Placeholder created while resolution is outstanding.
    ///
    /// Pending entries carry no usable MAC or port yet.
    pub fn pending(ip: IpAddress, interface_id: InterfaceId) -> Self {
        Self {
            ip,
            mac: MacAddress::BROADCAST,
            port: NeighborPort::Physical(PortId::new(0)),
            interface_id,
            state: NeighborState::Pending,
            class_id: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state == NeighborState::Reachable
    }
}

impl Node for NeighborEntry {
    type Key = IpAddress;

    fn key(&self) -> IpAddress {
        self.ip
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacEntry {
    pub mac: MacAddress,
    pub port: NeighborPort,
    #[serde(default)]
    pub class_id: Option<LookupClass>,
}

impl MacEntry {
    pub fn new(mac: MacAddress, port: NeighborPort) -> Self {
        Self {
            mac,
            port,
            class_id: None,
        }
    }
}

impl Node for MacEntry {
    type Key = MacAddress;

    fn key(&self) -> MacAddress {
        self.mac
    }
}

pub type NeighborTable = NodeMap<NeighborEntry>;
pub type MacTable = NodeMap<MacEntry>;
