use swagent_state::{NeighborEntry, NextHop, SwitchState};
use tracing::{debug, warn};

use super::scheduler::NeighborProber;
use crate::daemon::StateUpdater;

/// Probes a next hop by planting a pending neighbor entry in the VLAN
/// behind its interface, which kicks off resolution.
///
/// Interfaces without a VLAN get no entry.
pub struct PendingEntryProber {
    updater: StateUpdater,
}

impl PendingEntryProber {
    pub fn new(updater: StateUpdater) -> Self {
        Self { updater }
    }
}

/// State with a pending entry for `ip` behind `interface_id`, or `None` if
/// one is not needed.
fn with_pending_entry(state: &SwitchState, next_hop: &NextHop) -> Option<SwitchState> {
    let interface_id = next_hop.interface_id?;
    let ip = next_hop.addr;
    let vlan_id = state.vlan_for_interface(interface_id)?;
    let vlan = state.vlans.get(&vlan_id)?;
    if vlan.neighbor_table(ip.family()).contains_key(&ip) {
        return None;
    }

    let mut next = state.clone();
    next.vlans.modify(&vlan_id, |vlan| {
        vlan.neighbor_table_mut(ip.family())
            .insert(NeighborEntry::pending(ip, interface_id));
    });
    debug!(%ip, %interface_id, vlan = %vlan_id, "Adding pending neighbor entry");
    Some(next)
}

impl NeighborProber for PendingEntryProber {
    fn probe(&mut self, next_hop: &NextHop) {
        let next_hop = *next_hop;
        let scheduled = self.updater.schedule(
            format!("probe next hop {next_hop}"),
            move |state: &SwitchState| with_pending_entry(state, &next_hop),
        );
        if let Err(e) = scheduled {
            warn!(next_hop = %next_hop, "Failed to schedule probe: {}", e);
        }
    }
}
