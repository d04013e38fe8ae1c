//! Root of the state tree.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swagent_types::{
    AddressFamily, InterfaceId, IpAddress, IpPrefix, MacAddress, PortId, SwitchId, VlanId,
};

use crate::error::{Result, StateError};
use crate::flow::{FlowEntry, Mirror};
use crate::interface::Interface;
use crate::neighbor::{MacEntry, NeighborEntry};
use crate::node_map::NodeMap;
use crate::port::Port;
use crate::route::Route;
use crate::vlan::Vlan;

/// One immutable version of the switch state.
///
/// A transition clones the current root (every collection clone is a
/// reference-count bump), edits the clone and publishes it as the next
/// version. Collections the transition did not touch stay shared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchState {
    #[serde(default)]
    pub ports: NodeMap<Port>,
    #[serde(default)]
    pub vlans: NodeMap<Vlan>,
    #[serde(default)]
    pub interfaces: NodeMap<Interface>,
    #[serde(default)]
    pub routes: NodeMap<Route>,
    #[serde(default)]
    pub flow_entries: NodeMap<FlowEntry>,
    #[serde(default)]
    pub mirrors: NodeMap<Mirror>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> Arc<SwitchState> {
        Arc::new(self)
    }

    /// Owning switch of an interface.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownInterface`] if the interface does not
    /// exist in this version.
    pub fn switch_id_for_interface(&self, interface_id: InterfaceId) -> Result<SwitchId> {
        self.interfaces
            .get(&interface_id)
            .map(|intf| intf.switch_id)
            .ok_or(StateError::UnknownInterface(interface_id))
    }

    /// Most specific route covering `addr`.
    ///
    /// Probes one prefix length at a time from host length down to the
    /// default route, so the cost is bounded by the address width rather
    /// than the table size.
    pub fn longest_prefix_match(&self, addr: &IpAddress) -> Option<&Arc<Route>> {
        let max_len = addr.family().max_prefix_len();
        (0..=max_len)
            .rev()
            .find_map(|len| self.routes.get(&IpPrefix::covering(*addr, len)))
    }

    /// VLAN whose router interface is `interface_id`.
    pub fn vlan_for_interface(&self, interface_id: InterfaceId) -> Option<VlanId> {
        self.interfaces.get(&interface_id).and_then(|intf| intf.vlan_id)
    }

    /// Neighbor entries of one family that resolve through `port`, with the
    /// VLAN holding each.
    pub fn neighbors_on_port(
        &self,
        family: AddressFamily,
        port: PortId,
    ) -> impl Iterator<Item = (VlanId, &Arc<NeighborEntry>)> {
        self.vlans.values().flat_map(move |vlan| {
            vlan.neighbor_table(family)
                .values()
                .filter(move |entry| entry.port.physical() == Some(port))
                .map(move |entry| (vlan.id, entry))
        })
    }

    /// MAC entries that resolve through `port`, with the VLAN holding each.
    pub fn macs_on_port(&self, port: PortId) -> impl Iterator<Item = (VlanId, &Arc<MacEntry>)> {
        self.vlans.values().flat_map(move |vlan| {
            vlan.mac_table
                .values()
                .filter(move |entry| entry.port.physical() == Some(port))
                .map(move |entry| (vlan.id, entry))
        })
    }

    /// Edits one neighbor entry in place in this (unpublished) version.
    ///
    /// Returns `false` if the VLAN or the entry does not exist.
    pub fn modify_neighbor<F>(&mut self, vlan: VlanId, ip: IpAddress, edit: F) -> bool
    where
        F: FnOnce(&mut NeighborEntry),
    {
        let mut found = false;
        self.vlans.modify(&vlan, |v| {
            found = v.neighbor_table_mut(ip.family()).modify(&ip, edit);
        });
        found
    }

    /// Edits one MAC entry in this (unpublished) version.
    pub fn modify_mac<F>(&mut self, vlan: VlanId, mac: MacAddress, edit: F) -> bool
    where
        F: FnOnce(&mut MacEntry),
    {
        let mut found = false;
        self.vlans.modify(&vlan, |v| {
            found = v.mac_table.modify(&mac, edit);
        });
        found
    }
}
