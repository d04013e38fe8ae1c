//! Difference between two versions of the whole state tree.

use std::ops::ControlFlow;
use std::sync::Arc;
use swagent_types::{AddressFamily, VlanId};

use crate::delta::{DeltaValue, MapDelta, NestedDelta};
use crate::flow::{FlowEntry, Mirror};
use crate::interface::Interface;
use crate::neighbor::{MacEntry, NeighborEntry};
use crate::node_map::{Node, NodeMap};
use crate::port::Port;
use crate::route::Route;
use crate::switch_state::SwitchState;
use crate::vlan::Vlan;

/// Lazy pairing of an old and a new state version.
///
/// Nothing is diffed until a per-collection delta is walked, and cloning a
/// `StateDelta` only clones the two root pointers.
#[derive(Debug, Clone)]
pub struct StateDelta {
    old: Arc<SwitchState>,
    new: Arc<SwitchState>,
}

impl StateDelta {
    pub fn new(old: Arc<SwitchState>, new: Arc<SwitchState>) -> Self {
        Self { old, new }
    }

    pub fn old_state(&self) -> &Arc<SwitchState> {
        &self.old
    }

    pub fn new_state(&self) -> &Arc<SwitchState> {
        &self.new
    }

    /// The delta that undoes this one.
    pub fn reversed(&self) -> StateDelta {
        StateDelta::new(Arc::clone(&self.new), Arc::clone(&self.old))
    }

    pub fn ports_delta(&self) -> MapDelta<'_, Port> {
        MapDelta::new(&self.old.ports, &self.new.ports)
    }

    pub fn vlans_delta(&self) -> MapDelta<'_, Vlan> {
        MapDelta::new(&self.old.vlans, &self.new.vlans)
    }

    pub fn interfaces_delta(&self) -> MapDelta<'_, Interface> {
        MapDelta::new(&self.old.interfaces, &self.new.interfaces)
    }

    pub fn routes_delta(&self) -> MapDelta<'_, Route> {
        MapDelta::new(&self.old.routes, &self.new.routes)
    }

    pub fn flow_entries_delta(&self) -> MapDelta<'_, FlowEntry> {
        MapDelta::new(&self.old.flow_entries, &self.new.flow_entries)
    }

    pub fn mirrors_delta(&self) -> MapDelta<'_, Mirror> {
        MapDelta::new(&self.old.mirrors, &self.new.mirrors)
    }

    pub fn is_empty(&self) -> bool {
        Arc::ptr_eq(&self.old, &self.new)
            || (self.ports_delta().is_empty()
                && self.vlans_delta().is_empty()
                && self.interfaces_delta().is_empty()
                && self.routes_delta().is_empty()
                && self.flow_entries_delta().is_empty()
                && self.mirrors_delta().is_empty())
    }

    /// Walks neighbor entries of one family across every VLAN.
    ///
    /// A VLAN whose coarse identity changed is reported as the removal of
    /// all its old entries followed by the addition of all its new ones.
    pub fn for_each_neighbor_delta<'a, F>(&'a self, family: AddressFamily, handler: F) -> ControlFlow<()>
    where
        F: FnMut(VlanId, DeltaValue<'a, NeighborEntry>) -> ControlFlow<()>,
    {
        self.walk_vlan_tables(move |vlan: &'a Vlan| vlan.neighbor_table(family), handler)
    }

    /// Walks MAC entries across every VLAN, with the same coarse policy as
    /// [`StateDelta::for_each_neighbor_delta`].
    pub fn for_each_mac_delta<'a, F>(&'a self, handler: F) -> ControlFlow<()>
    where
        F: FnMut(VlanId, DeltaValue<'a, MacEntry>) -> ControlFlow<()>,
    {
        self.walk_vlan_tables(|vlan: &'a Vlan| &vlan.mac_table, handler)
    }

    fn walk_vlan_tables<'a, V, T, F>(&'a self, table: T, mut handler: F) -> ControlFlow<()>
    where
        V: Node + 'a,
        T: Fn(&'a Vlan) -> &'a NodeMap<V>,
        F: FnMut(VlanId, DeltaValue<'a, V>) -> ControlFlow<()>,
    {
        for change in self.vlans_delta().nested_iter() {
            match change {
                NestedDelta::Added(vlan) => {
                    for value in MapDelta::between(None, Some(table(&**vlan))).iter() {
                        handler(vlan.id, value)?;
                    }
                }
                NestedDelta::Removed(vlan) => {
                    for value in MapDelta::between(Some(table(&**vlan)), None).iter() {
                        handler(vlan.id, value)?;
                    }
                }
                NestedDelta::Coarse { old, new } => {
                    for value in MapDelta::between(Some(table(&**old)), None).iter() {
                        handler(old.id, value)?;
                    }
                    for value in MapDelta::between(None, Some(table(&**new))).iter() {
                        handler(new.id, value)?;
                    }
                }
                NestedDelta::Children { old, new } => {
                    for value in MapDelta::new(table(&**old), table(&**new)).iter() {
                        handler(new.id, value)?;
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }
}
