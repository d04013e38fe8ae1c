//! Per-port lookup class balancing for neighbor and MAC entries.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use swagent_state::{
    DeltaValue, LookupClass, MacEntry, NeighborEntry, NeighborPort, Node, Port, StateDelta,
    SwitchState, Vlan,
};
use swagent_types::{AddressFamily, IpAddress, MacAddress, PortId, VlanId};
use tracing::{debug, info};

use crate::daemon::{StateObserver, StateUpdater};
use crate::error::ObserverError;

/// Identity of a classified entry within its VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKey {
    Neighbor(IpAddress),
    Mac(MacAddress),
}

/// What the balancer needs from ARP, NDP and MAC entries alike.
trait ClassedEntry {
    fn entry_key(&self) -> EntryKey;
    fn mac(&self) -> MacAddress;
    fn port(&self) -> NeighborPort;
    fn class_id(&self) -> Option<LookupClass>;
    /// Entry resolves to a physical port and is usable for forwarding.
    fn qualifies(&self) -> bool;
}

impl ClassedEntry for NeighborEntry {
    fn entry_key(&self) -> EntryKey {
        EntryKey::Neighbor(self.key())
    }

    fn mac(&self) -> MacAddress {
        self.mac
    }

    fn port(&self) -> NeighborPort {
        self.port
    }

    fn class_id(&self) -> Option<LookupClass> {
        self.class_id
    }

    fn qualifies(&self) -> bool {
        self.port.physical().is_some() && self.is_reachable()
    }
}

impl ClassedEntry for MacEntry {
    fn entry_key(&self) -> EntryKey {
        EntryKey::Mac(self.key())
    }

    fn mac(&self) -> MacAddress {
        self.mac
    }

    fn port(&self) -> NeighborPort {
        self.port
    }

    fn class_id(&self) -> Option<LookupClass> {
        self.class_id
    }

    fn qualifies(&self) -> bool {
        self.port.physical().is_some()
    }
}

fn vlan_entries(vlan: &Vlan) -> impl Iterator<Item = &dyn ClassedEntry> {
    let neighbors = AddressFamily::ALL.into_iter().flat_map(move |family| {
        vlan.neighbor_table(family)
            .values()
            .map(|entry| &**entry as &dyn ClassedEntry)
    });
    let macs = vlan.mac_table.values().map(|entry| &**entry as &dyn ClassedEntry);
    neighbors.chain(macs)
}

/// Class bookkeeping of one port with a non-empty class list.
#[derive(Debug, Clone)]
struct PortClasses {
    /// Entries per class, in the port's declared order.
    counts: Vec<(LookupClass, u32)>,
    /// Class of each (MAC, VLAN) on the port and how many entries hold it.
    by_mac: BTreeMap<(MacAddress, VlanId), (LookupClass, u32)>,
}

impl PortClasses {
    fn new(classes: &[LookupClass]) -> Option<Self> {
        if classes.is_empty() {
            return None;
        }
        Some(Self {
            counts: classes.iter().map(|class| (*class, 0)).collect(),
            by_mac: BTreeMap::new(),
        })
    }

    fn contains(&self, class: LookupClass) -> bool {
        self.counts.iter().any(|(c, _)| *c == class)
    }

    fn class_of(&self, mac: MacAddress, vlan: VlanId) -> Option<LookupClass> {
        self.by_mac.get(&(mac, vlan)).map(|(class, _)| *class)
    }

    /// Least-loaded class; ties go to the earliest declared class.
    fn least_loaded(&self) -> Option<LookupClass> {
        self.counts
            .iter()
            .min_by_key(|(_, count)| *count)
            .map(|(class, _)| *class)
    }

    fn count_mut(&mut self, class: LookupClass) -> Option<&mut u32> {
        self.counts
            .iter_mut()
            .find(|(c, _)| *c == class)
            .map(|(_, count)| count)
    }

    /// Takes a reference on the class of (MAC, VLAN), choosing `preferred`
    /// or the least-loaded class when the pair has none yet.
    fn acquire(
        &mut self,
        mac: MacAddress,
        vlan: VlanId,
        preferred: Option<LookupClass>,
    ) -> Option<LookupClass> {
        if let Some((class, refs)) = self.by_mac.get_mut(&(mac, vlan)) {
            *refs += 1;
            return Some(*class);
        }
        let class = preferred
            .filter(|class| self.contains(*class))
            .or_else(|| self.least_loaded())?;
        if let Some(count) = self.count_mut(class) {
            *count += 1;
        }
        self.by_mac.insert((mac, vlan), (class, 1));
        Some(class)
    }

    fn release(&mut self, mac: MacAddress, vlan: VlanId) {
        let Some((class, refs)) = self.by_mac.get_mut(&(mac, vlan)) else {
            return;
        };
        *refs -= 1;
        if *refs == 0 {
            let class = *class;
            self.by_mac.remove(&(mac, vlan));
            if let Some(count) = self.count_mut(class) {
                *count -= 1;
            }
        }
    }
}

/// A class change to write back to one entry.
///
/// Skipped if the entry no longer resolves the way it did when the change
/// was decided; the delta carrying that move is handled on its own.
#[derive(Debug, Clone)]
struct ClassWrite {
    vlan: VlanId,
    key: EntryKey,
    port: NeighborPort,
    mac: MacAddress,
    class: Option<LookupClass>,
}

impl ClassWrite {
    fn new(vlan: VlanId, entry: &dyn ClassedEntry, class: Option<LookupClass>) -> Self {
        Self {
            vlan,
            key: entry.entry_key(),
            port: entry.port(),
            mac: entry.mac(),
            class,
        }
    }
}

fn apply_writes(state: &SwitchState, writes: &[ClassWrite]) -> Option<SwitchState> {
    let mut next = state.clone();
    let mut changed = false;
    for write in writes {
        match write.key {
            EntryKey::Neighbor(ip) => {
                next.modify_neighbor(write.vlan, ip, |entry| {
                    let current = entry.port == write.port
                        && entry.mac == write.mac
                        && (write.class.is_none() || entry.is_reachable());
                    if current && entry.class_id != write.class {
                        entry.class_id = write.class;
                        changed = true;
                    }
                });
            }
            EntryKey::Mac(mac) => {
                next.modify_mac(write.vlan, mac, |entry| {
                    if entry.port == write.port && entry.class_id != write.class {
                        entry.class_id = write.class;
                        changed = true;
                    }
                });
            }
        }
    }
    changed.then_some(next)
}

/// Spreads the neighbors of each qualifying port across the port's
/// lookup classes.
///
/// A port qualifies when it has a non-empty class list. Each new
/// (MAC, VLAN) on it gets the class with the fewest entries; further
/// entries with the same MAC in the same VLAN (an ARP and an NDP entry
/// for one host, or its L2 entry) share that class. Chosen classes are
/// written back to the entries through one follow-on update per delta.
pub struct LookupClassUpdater {
    updater: StateUpdater,
    ports: BTreeMap<PortId, PortClasses>,
    /// Port and MAC each classified entry was counted under.
    holders: BTreeMap<(VlanId, EntryKey), (PortId, MacAddress)>,
    inited: bool,
}

impl LookupClassUpdater {
    pub const NAME: &'static str = "lookup_class_updater";

    pub fn new(updater: StateUpdater) -> Self {
        Self {
            updater,
            ports: BTreeMap::new(),
            holders: BTreeMap::new(),
            inited: false,
        }
    }

    /// Entries per class on `port`, in declared order.
    pub fn class_counts(&self, port: PortId) -> Option<Vec<(LookupClass, u32)>> {
        self.ports.get(&port).map(|classes| classes.counts.clone())
    }

    /// Class cached for a MAC on a port.
    pub fn class_of(&self, port: PortId, mac: MacAddress, vlan: VlanId) -> Option<LookupClass> {
        self.ports.get(&port)?.class_of(mac, vlan)
    }

    fn acquire(
        &mut self,
        port: PortId,
        vlan: VlanId,
        entry: &dyn ClassedEntry,
        preferred: Option<LookupClass>,
    ) -> Option<LookupClass> {
        let key = (vlan, entry.entry_key());
        match self.holders.get(&key) {
            Some(&(held_port, held_mac)) if held_port == port && held_mac == entry.mac() => {
                return self.class_of(port, entry.mac(), vlan);
            }
            Some(_) => {
                self.release(vlan, entry.entry_key());
            }
            None => {}
        }
        let class = self.ports.get_mut(&port)?.acquire(entry.mac(), vlan, preferred)?;
        self.holders.insert(key, (port, entry.mac()));
        Some(class)
    }

    /// Drops the reference an entry holds; returns false if it held none.
    fn release(&mut self, vlan: VlanId, key: EntryKey) -> bool {
        let Some((port, mac)) = self.holders.remove(&(vlan, key)) else {
            return false;
        };
        if let Some(classes) = self.ports.get_mut(&port) {
            classes.release(mac, vlan);
        }
        true
    }

    /// Classifies a qualifying entry, or clears a class it should not have.
    fn assign(&mut self, vlan: VlanId, entry: &dyn ClassedEntry, writes: &mut Vec<ClassWrite>) {
        let Some(port) = entry.port().physical().filter(|_| entry.qualifies()) else {
            return;
        };
        let class = self.acquire(port, vlan, entry, None);
        if entry.class_id() != class {
            writes.push(ClassWrite::new(vlan, entry, class));
        }
    }

    fn entry_changed(&mut self, vlan: VlanId, new: &dyn ClassedEntry, writes: &mut Vec<ClassWrite>) {
        let key = new.entry_key();
        match new.port().physical().filter(|_| new.qualifies()) {
            Some(port) => match self.holders.get(&(vlan, key)) {
                Some(&(held_port, held_mac)) if held_port == port && held_mac == new.mac() => {
                    // Same port and MAC: keep the class, restoring it if an
                    // age-out and relearn collapsed into this change.
                    let class = self.class_of(port, new.mac(), vlan);
                    if class.is_some() && new.class_id() != class {
                        writes.push(ClassWrite::new(vlan, new, class));
                    }
                }
                _ => {
                    self.release(vlan, key);
                    self.assign(vlan, new, writes);
                }
            },
            None => {
                if self.release(vlan, key) && new.class_id().is_some() {
                    writes.push(ClassWrite::new(vlan, new, None));
                }
            }
        }
    }

    fn process_entry(
        &mut self,
        vlan: VlanId,
        old: Option<&dyn ClassedEntry>,
        new: Option<&dyn ClassedEntry>,
        writes: &mut Vec<ClassWrite>,
    ) {
        match (old, new) {
            (None, Some(new)) => self.assign(vlan, new, writes),
            (Some(old), None) => {
                self.release(vlan, old.entry_key());
            }
            (Some(_), Some(new)) => self.entry_changed(vlan, new, writes),
            (None, None) => {}
        }
    }

    fn init_port(&mut self, port: &Port) {
        match PortClasses::new(&port.lookup_classes) {
            Some(classes) => {
                debug!(port = %port.id, classes = port.lookup_classes.len(), "Balancing lookup classes on port");
                self.ports.insert(port.id, classes);
            }
            None => {
                self.ports.remove(&port.id);
            }
        }
    }

    fn drop_port(&mut self, port: PortId) {
        self.ports.remove(&port);
        self.holders.retain(|_, (held_port, _)| *held_port != port);
    }

    /// # Panics
    ///
    /// If any entry in `state` still resolves through the removed port.
    fn port_removed(&mut self, state: &SwitchState, port: &Port) {
        let neighbors = AddressFamily::ALL
            .into_iter()
            .map(|family| state.neighbors_on_port(family, port.id).count())
            .sum::<usize>();
        let remaining = neighbors + state.macs_on_port(port.id).count();
        if remaining > 0 {
            panic!(
                "port {} removed while {} entries still resolve through it",
                port.id, remaining
            );
        }
        self.drop_port(port.id);
    }

    fn port_changed(&mut self, state: &SwitchState, old: &Port, new: &Port, writes: &mut Vec<ClassWrite>) {
        let mut old_classes = old.lookup_classes.clone();
        let mut new_classes = new.lookup_classes.clone();
        old_classes.sort();
        new_classes.sort();
        if old_classes == new_classes {
            return;
        }

        info!(
            port = %new.id,
            old = ?old.lookup_classes,
            new = ?new.lookup_classes,
            "Lookup class list changed, reassigning every entry on the port"
        );
        self.drop_port(new.id);
        self.init_port(new);

        for family in AddressFamily::ALL {
            for (vlan, entry) in state.neighbors_on_port(family, new.id) {
                self.reassign(vlan, &**entry, writes);
            }
        }
        for (vlan, entry) in state.macs_on_port(new.id) {
            self.reassign(vlan, &**entry, writes);
        }
    }

    fn reassign(&mut self, vlan: VlanId, entry: &dyn ClassedEntry, writes: &mut Vec<ClassWrite>) {
        if entry.qualifies() {
            self.assign(vlan, entry, writes);
        } else if entry.class_id().is_some() {
            writes.push(ClassWrite::new(vlan, entry, None));
        }
    }

    fn process_ports(&mut self, delta: &StateDelta, writes: &mut Vec<ClassWrite>) {
        for value in delta.ports_delta().iter() {
            match value {
                DeltaValue::Added(port) => self.init_port(port),
                DeltaValue::Removed(port) => self.port_removed(delta.new_state(), port),
                DeltaValue::Changed(old, new) => {
                    self.port_changed(delta.new_state(), old, new, writes)
                }
            }
        }
    }

    /// Rebuilds the caches from a state whose entries may already carry
    /// classes, e.g. one restored at startup.
    fn seed(&mut self, state: &SwitchState, writes: &mut Vec<ClassWrite>) {
        for port in state.ports.values() {
            self.init_port(port);
        }
        // Adopt classes already present before balancing anything new, so
        // the counts reflect them.
        for vlan in state.vlans.values() {
            for entry in vlan_entries(vlan) {
                let Some(port) = entry.port().physical().filter(|_| entry.qualifies()) else {
                    continue;
                };
                let Some(existing) = entry.class_id() else {
                    continue;
                };
                let class = self.acquire(port, vlan.id, entry, Some(existing));
                if class.is_some() && class != Some(existing) {
                    writes.push(ClassWrite::new(vlan.id, entry, class));
                }
            }
        }
        for vlan in state.vlans.values() {
            for entry in vlan_entries(vlan) {
                if entry.qualifies() && !self.holders.contains_key(&(vlan.id, entry.entry_key())) {
                    self.assign(vlan.id, entry, writes);
                }
            }
        }
        info!(ports = self.ports.len(), entries = self.holders.len(), "Lookup class caches seeded");
    }

    fn schedule(&self, writes: Vec<ClassWrite>) -> Result<(), ObserverError> {
        if writes.is_empty() {
            return Ok(());
        }
        debug!(writes = writes.len(), "Scheduling lookup class update");
        self.updater
            .schedule("update lookup classes", move |state: &SwitchState| {
                apply_writes(state, &writes)
            })
            .map_err(|err| ObserverError::new(Self::NAME, err.to_string()))
    }
}

impl StateObserver for LookupClassUpdater {
    fn state_updated(&mut self, delta: &StateDelta) -> Result<(), ObserverError> {
        let mut writes = Vec::new();
        if !self.inited {
            self.seed(delta.old_state(), &mut writes);
            self.inited = true;
        }

        // Ports first so that a port and its entries can arrive together.
        self.process_ports(delta, &mut writes);

        for family in AddressFamily::ALL {
            let _ = delta.for_each_neighbor_delta(family, |vlan, value| {
                let old = value.old().map(|entry| &**entry as &dyn ClassedEntry);
                let new = value.new().map(|entry| &**entry as &dyn ClassedEntry);
                self.process_entry(vlan, old, new, &mut writes);
                ControlFlow::Continue(())
            });
        }
        let _ = delta.for_each_mac_delta(|vlan, value| {
            let old = value.old().map(|entry| &**entry as &dyn ClassedEntry);
            let new = value.new().map(|entry| &**entry as &dyn ClassedEntry);
            self.process_entry(vlan, old, new, &mut writes);
            ControlFlow::Continue(())
        });

        self.schedule(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::UpdateReceiver;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use swagent_state::{Interface, NeighborState};
    use swagent_types::{InterfaceId, SwitchId};

    use swagent_state::LookupClass::{QueuePerHost0 as A, QueuePerHost1 as B, QueuePerHost2 as C};

    const VLAN: u16 = 10;

    fn vlan_id() -> VlanId {
        VlanId::new(VLAN).unwrap()
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([2, 0, 0, 0, 0, last])
    }

    fn base_state(classes: Vec<LookupClass>) -> SwitchState {
        let intf = InterfaceId::new(1);
        let mut state = SwitchState::new();
        state.ports.insert(
            Port::new(PortId::new(1), "eth1/1/1")
                .with_vlan(vlan_id())
                .with_lookup_classes(classes)
                .unwrap(),
        );
        state.ports.insert(
            Port::new(PortId::new(2), "eth1/2/1")
                .with_vlan(vlan_id())
                .with_lookup_classes(vec![LookupClass::QueuePerHost5])
                .unwrap(),
        );
        state.vlans.insert(
            Vlan::new(vlan_id(), "vlan10")
                .with_interface(intf)
                .with_member(PortId::new(1), false)
                .with_member(PortId::new(2), false),
        );
        state
            .interfaces
            .insert(Interface::new(intf, "Vlan10", SwitchId::new(0)).with_vlan(vlan_id()));
        state
    }

    fn neighbor(ip: &str, mac_last: u8, port: u32) -> NeighborEntry {
        NeighborEntry::reachable(
            ip.parse().unwrap(),
            mac(mac_last),
            NeighborPort::Physical(PortId::new(port)),
            InterfaceId::new(1),
        )
    }

    /// Drives the updater the way the update service would, applying its
    /// follow-on writes as further transitions.
    struct Harness {
        updater: LookupClassUpdater,
        queue: UpdateReceiver,
        state: Arc<SwitchState>,
    }

    impl Harness {
        fn new(initial: SwitchState) -> Self {
            let (updater, queue) = StateUpdater::channel();
            Self {
                updater: LookupClassUpdater::new(updater),
                queue,
                state: initial.into_shared(),
            }
        }

        fn transition(&mut self, edit: impl FnOnce(&mut SwitchState)) {
            let mut next = SwitchState::clone(&self.state);
            edit(&mut next);
            self.commit(next.into_shared());
            self.settle();
        }

        fn commit(&mut self, next: Arc<SwitchState>) {
            let delta = StateDelta::new(Arc::clone(&self.state), Arc::clone(&next));
            self.state = next;
            self.updater.state_updated(&delta).unwrap();
        }

        fn settle(&mut self) {
            while let Some(update) = self.queue.try_next() {
                if let Some(next) = update.apply(&self.state) {
                    self.commit(next.into_shared());
                }
            }
        }

        fn add_neighbors(&mut self, entries: Vec<NeighborEntry>) {
            self.transition(|state| {
                state.vlans.modify(&vlan_id(), |vlan| {
                    for entry in entries {
                        vlan.neighbor_table_mut(entry.ip.family()).insert(entry);
                    }
                });
            });
        }

        fn edit_neighbor(&mut self, ip: &str, edit: impl FnOnce(&mut NeighborEntry)) {
            let ip: IpAddress = ip.parse().unwrap();
            self.transition(|state| {
                assert!(state.modify_neighbor(vlan_id(), ip, edit));
            });
        }

        fn class(&self, ip: &str) -> Option<LookupClass> {
            let ip: IpAddress = ip.parse().unwrap();
            let vlan = self.state.vlans.get(&vlan_id()).unwrap();
            vlan.neighbor_table(ip.family()).get(&ip).unwrap().class_id
        }
    }

    #[test]
    fn test_classes_balanced_in_declared_order() {
        let mut harness = Harness::new(base_state(vec![A, B, C]));
        harness.add_neighbors(vec![
            neighbor("10.0.0.1", 1, 1),
            neighbor("10.0.0.2", 2, 1),
            neighbor("10.0.0.3", 3, 1),
            neighbor("10.0.0.4", 4, 1),
        ]);

        let classes: Vec<_> = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]
            .iter()
            .map(|ip| harness.class(ip))
            .collect();
        assert_eq!(classes, vec![Some(A), Some(B), Some(C), Some(A)]);
        assert_eq!(
            harness.updater.class_counts(PortId::new(1)),
            Some(vec![(A, 2), (B, 1), (C, 1)])
        );
    }

    #[test]
    fn test_same_mac_shares_class() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1), neighbor("2401::1", 1, 1)]);

        assert_eq!(harness.class("10.0.0.1"), Some(A));
        assert_eq!(harness.class("2401::1"), Some(A));
        assert_eq!(harness.updater.class_counts(PortId::new(1)), Some(vec![(A, 1), (B, 0)]));

        harness.transition(|state| {
            state.vlans.modify(&vlan_id(), |vlan| {
                vlan.arp_table.remove(&"10.0.0.1".parse().unwrap());
            });
        });
        // The NDP entry still holds the class.
        assert_eq!(harness.updater.class_of(PortId::new(1), mac(1), vlan_id()), Some(A));
    }

    #[test]
    fn test_unreachable_neighbor_releases_class() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1), neighbor("10.0.0.2", 2, 1)]);
        harness.edit_neighbor("10.0.0.1", |entry| entry.state = NeighborState::Unreachable);

        assert_eq!(harness.class("10.0.0.1"), None);
        assert_eq!(harness.updater.class_counts(PortId::new(1)), Some(vec![(A, 0), (B, 1)]));

        harness.add_neighbors(vec![neighbor("10.0.0.3", 3, 1)]);
        assert_eq!(harness.class("10.0.0.3"), Some(A));
    }

    #[test]
    fn test_port_move_reassigns_under_new_port() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1)]);
        harness.edit_neighbor("10.0.0.1", |entry| {
            entry.port = NeighborPort::Physical(PortId::new(2))
        });

        assert_eq!(harness.class("10.0.0.1"), Some(LookupClass::QueuePerHost5));
        assert_eq!(harness.updater.class_counts(PortId::new(1)), Some(vec![(A, 0), (B, 0)]));
    }

    #[test]
    fn test_mac_change_releases_old_class() {
        let mut harness = Harness::new(base_state(vec![A, B, C]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1), neighbor("10.0.0.2", 2, 1)]);
        assert_eq!(harness.class("10.0.0.1"), Some(A));

        harness.edit_neighbor("10.0.0.1", |entry| entry.mac = mac(9));

        // A was released first, so it is again the least loaded.
        assert_eq!(harness.class("10.0.0.1"), Some(A));
        assert_eq!(
            harness.updater.class_counts(PortId::new(1)),
            Some(vec![(A, 1), (B, 1), (C, 0)])
        );
        assert_eq!(harness.updater.class_of(PortId::new(1), mac(1), vlan_id()), None);
        assert_eq!(harness.updater.class_of(PortId::new(1), mac(9), vlan_id()), Some(A));
    }

    #[test]
    fn test_class_list_change_resets_port() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1), neighbor("10.0.0.2", 2, 1)]);

        // Reordering is not a change.
        harness.transition(|state| {
            state.ports.modify(&PortId::new(1), |port| port.lookup_classes = vec![B, A]);
        });
        assert_eq!(harness.class("10.0.0.1"), Some(A));

        harness.transition(|state| {
            state.ports.modify(&PortId::new(1), |port| port.lookup_classes = vec![C]);
        });
        assert_eq!(harness.class("10.0.0.1"), Some(C));
        assert_eq!(harness.class("10.0.0.2"), Some(C));
        assert_eq!(harness.updater.class_counts(PortId::new(1)), Some(vec![(C, 2)]));

        harness.transition(|state| {
            state.ports.modify(&PortId::new(1), |port| port.lookup_classes.clear());
        });
        assert_eq!(harness.class("10.0.0.1"), None);
        assert_eq!(harness.updater.class_counts(PortId::new(1)), None);
    }

    #[test]
    fn test_warm_start_adopts_existing_classes() {
        let mut initial = base_state(vec![A, B]);
        let mut existing = neighbor("10.0.0.1", 1, 1);
        existing.class_id = Some(B);
        initial.vlans.modify(&vlan_id(), |vlan| {
            vlan.arp_table.insert(existing);
        });

        let mut harness = Harness::new(initial);
        harness.add_neighbors(vec![neighbor("10.0.0.2", 2, 1)]);
        assert_eq!(harness.class("10.0.0.1"), Some(B));
        assert_eq!(harness.class("10.0.0.2"), Some(A));
    }

    #[test]
    fn test_mac_entries_classified() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.transition(|state| {
            state.vlans.modify(&vlan_id(), |vlan| {
                vlan.mac_table
                    .insert(MacEntry::new(mac(7), NeighborPort::Physical(PortId::new(1))));
            });
        });
        let vlan = harness.state.vlans.get(&vlan_id()).unwrap();
        assert_eq!(vlan.mac_table.get(&mac(7)).unwrap().class_id, Some(A));
    }

    #[test]
    fn test_follow_on_update_is_quiet() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1)]);
        // settle() consumed the class write and its echo; nothing is left.
        assert!(harness.queue.try_next().is_none());
        assert_eq!(harness.updater.class_counts(PortId::new(1)), Some(vec![(A, 1), (B, 0)]));
    }

    #[test]
    #[should_panic(expected = "still resolve through it")]
    fn test_removing_port_with_live_neighbor_panics() {
        let mut harness = Harness::new(base_state(vec![A, B]));
        harness.add_neighbors(vec![neighbor("10.0.0.1", 1, 1)]);
        harness.transition(|state| {
            state.ports.remove(&PortId::new(1));
        });
    }
}
