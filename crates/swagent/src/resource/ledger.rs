//! Resource usage ledger.

use std::collections::BTreeMap;
use swagent_state::NextHopSet;
use swagent_types::{AddressFamily, SwitchId};

/// Neighbor entries held by one switch, per address family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighborUsage {
    pub arp: u64,
    pub ndp: u64,
}

impl NeighborUsage {
    pub fn get(&self, family: AddressFamily) -> u64 {
        match family {
            AddressFamily::V4 => self.arp,
            AddressFamily::V6 => self.ndp,
        }
    }

    fn slot_mut(&mut self, family: AddressFamily) -> &mut u64 {
        match family {
            AddressFamily::V4 => &mut self.arp,
            AddressFamily::V6 => &mut self.ndp,
        }
    }

    pub fn total(&self) -> u64 {
        self.arp + self.ndp
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Usage counters maintained by the resource accountant.
///
/// Zeroed entries are removed rather than kept, so a drained ledger equals
/// [`ResourceLedger::default`] and a ledger rebuilt from a full walk of a
/// state compares equal to one maintained incrementally up to that state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    /// ECMP group (normalized next-hop set) to the number of resolved
    /// routes using it.
    pub ecmp_groups: BTreeMap<NextHopSet, u32>,
    /// Member entries consumed by all ECMP groups, per switch.
    pub ecmp_members: BTreeMap<SwitchId, u64>,
    /// Advanced load-balancing groups; only populated when enabled.
    pub ars_groups: BTreeMap<NextHopSet, u32>,
    /// Resolved routes.
    pub routes: u64,
    /// Learned MAC entries across all VLANs.
    pub l2_entries: u64,
    pub neighbors: BTreeMap<SwitchId, NeighborUsage>,
}

impl ResourceLedger {
    pub fn ecmp_group_count(&self) -> u64 {
        self.ecmp_groups.len() as u64
    }

    pub fn ars_group_count(&self) -> u64 {
        self.ars_groups.len() as u64
    }

    pub fn ecmp_member_usage(&self, switch_id: SwitchId) -> u64 {
        self.ecmp_members.get(&switch_id).copied().unwrap_or(0)
    }

    pub fn neighbor_usage(&self, switch_id: SwitchId) -> NeighborUsage {
        self.neighbors.get(&switch_id).copied().unwrap_or_default()
    }

    pub(crate) fn add_members(&mut self, switch_id: SwitchId, cost: u64) {
        *self.ecmp_members.entry(switch_id).or_insert(0) += cost;
    }

    pub(crate) fn remove_members(&mut self, switch_id: SwitchId, cost: u64) {
        if let Some(usage) = self.ecmp_members.get_mut(&switch_id) {
            debug_assert!(*usage >= cost, "ecmp member usage underflow on {}", switch_id);
            *usage = usage.saturating_sub(cost);
            if *usage == 0 {
                self.ecmp_members.remove(&switch_id);
            }
        }
    }

    pub(crate) fn add_neighbor(&mut self, switch_id: SwitchId, family: AddressFamily) {
        *self.neighbors.entry(switch_id).or_default().slot_mut(family) += 1;
    }

    pub(crate) fn remove_neighbor(&mut self, switch_id: SwitchId, family: AddressFamily) {
        if let Some(usage) = self.neighbors.get_mut(&switch_id) {
            let slot = usage.slot_mut(family);
            debug_assert!(*slot > 0, "{} neighbor usage underflow on {}", family, switch_id);
            *slot = slot.saturating_sub(1);
            if usage.is_zero() {
                self.neighbors.remove(&switch_id);
            }
        }
    }
}

/// Increments the reference count of `set`; returns true if it is new.
pub(crate) fn acquire_group(groups: &mut BTreeMap<NextHopSet, u32>, set: &NextHopSet) -> bool {
    match groups.get_mut(set) {
        Some(refs) => {
            *refs += 1;
            false
        }
        None => {
            groups.insert(set.clone(), 1);
            true
        }
    }
}

/// Decrements the reference count of `set`; returns true if it reached zero
/// and the group was erased.
pub(crate) fn release_group(groups: &mut BTreeMap<NextHopSet, u32>, set: &NextHopSet) -> bool {
    let Some(refs) = groups.get_mut(set) else {
        debug_assert!(false, "releasing an ECMP group that was never acquired");
        return false;
    };
    *refs -= 1;
    if *refs == 0 {
        groups.remove(set);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swagent_state::NextHop;
    use swagent_types::InterfaceId;

    fn set(addrs: &[&str]) -> NextHopSet {
        addrs
            .iter()
            .map(|a| NextHop::resolved(a.parse().unwrap(), InterfaceId::new(1), 1))
            .collect()
    }

    #[test]
    fn test_group_refcounting() {
        let mut groups = BTreeMap::new();
        let a = set(&["10.0.0.1", "10.0.0.2"]);
        assert!(acquire_group(&mut groups, &a));
        assert!(!acquire_group(&mut groups, &a));
        assert_eq!(groups.get(&a), Some(&2));
        assert!(!release_group(&mut groups, &a));
        assert!(release_group(&mut groups, &a));
        assert!(groups.is_empty());
    }

    #[test]
    fn test_zeroed_counters_are_removed() {
        let mut ledger = ResourceLedger::default();
        let switch = SwitchId::new(0);
        ledger.add_members(switch, 4);
        ledger.add_neighbor(switch, AddressFamily::V6);
        assert_eq!(ledger.ecmp_member_usage(switch), 4);
        assert_eq!(ledger.neighbor_usage(switch).ndp, 1);

        ledger.remove_members(switch, 4);
        ledger.remove_neighbor(switch, AddressFamily::V6);
        assert_eq!(ledger, ResourceLedger::default());
    }
}
