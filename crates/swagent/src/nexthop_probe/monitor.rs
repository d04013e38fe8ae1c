//! Tracks which resolved next hops forwarding currently depends on.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use swagent_state::{DeltaValue, NextHop, Route, StateDelta};
use swagent_types::{AddressFamily, InterfaceId, IpAddress};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::daemon::StateObserver;
use crate::error::ObserverError;

/// Work handed from the monitor to the probe scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    /// Next hops gained or lost one referencing route each. Weights are
    /// stripped, so a weight change alone never shows up here.
    Changed {
        added: Vec<NextHop>,
        removed: Vec<NextHop>,
    },
    /// A neighbor entry disappeared; re-probe it right away if tracked.
    NeighborRemoved {
        ip: IpAddress,
        interface_id: InterfaceId,
    },
}

/// Resolved forwarding next hops of a route, weights stripped.
fn resolved_hops(route: &Route) -> impl Iterator<Item = NextHop> + '_ {
    route
        .resolved_next_hops()
        .into_iter()
        .flatten()
        .filter(|nh| nh.is_resolved())
        .map(NextHop::without_weight)
}

/// Observer forwarding resolved next-hop churn to the probe scheduler.
///
/// Unresolved routes and routes that drop or punt traffic contribute
/// nothing.
pub struct ResolvedNexthopMonitor {
    commands: mpsc::UnboundedSender<ProbeCommand>,
    probes_scheduled: bool,
}

impl ResolvedNexthopMonitor {
    pub const NAME: &'static str = "resolved_nexthop_monitor";

    pub fn new(commands: mpsc::UnboundedSender<ProbeCommand>) -> Self {
        Self {
            commands,
            probes_scheduled: false,
        }
    }

    /// Whether any next-hop change was ever forwarded.
    pub fn probes_scheduled(&self) -> bool {
        self.probes_scheduled
    }

    fn send(&self, command: ProbeCommand) {
        if self.commands.send(command).is_err() {
            warn!("Probe scheduler is gone, dropping probe command");
        }
    }
}

impl StateObserver for ResolvedNexthopMonitor {
    fn state_updated(&mut self, delta: &StateDelta) -> Result<(), ObserverError> {
        // Net change per next hop across all routes in this delta.
        let mut net: BTreeMap<NextHop, i64> = BTreeMap::new();
        for value in delta.routes_delta().iter() {
            if let Some(old) = value.old() {
                for nh in resolved_hops(old) {
                    *net.entry(nh).or_insert(0) -= 1;
                }
            }
            if let Some(new) = value.new() {
                for nh in resolved_hops(new) {
                    *net.entry(nh).or_insert(0) += 1;
                }
            }
        }

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for (nh, change) in net {
            let count = change.unsigned_abs() as usize;
            if change > 0 {
                added.extend(std::iter::repeat(nh).take(count));
            } else {
                removed.extend(std::iter::repeat(nh).take(count));
            }
        }
        if !added.is_empty() || !removed.is_empty() {
            debug!(added = added.len(), removed = removed.len(), "Resolved next hops changed");
            self.probes_scheduled = true;
            self.send(ProbeCommand::Changed { added, removed });
        }

        for family in AddressFamily::ALL {
            let _ = delta.for_each_neighbor_delta(family, |_, value| {
                if let DeltaValue::Removed(entry) = value {
                    self.send(ProbeCommand::NeighborRemoved {
                        ip: entry.ip,
                        interface_id: entry.interface_id,
                    });
                }
                ControlFlow::Continue(())
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use swagent_state::{
        Mirror, NeighborEntry, NeighborPort, RouteNextHopEntry, SwitchState, Vlan,
    };
    use swagent_types::{IpPrefix, MacAddress, PortId, VlanId};

    fn resolved(addr: &str, intf: u32, weight: u64) -> NextHop {
        NextHop::resolved(addr.parse().unwrap(), InterfaceId::new(intf), weight)
    }

    fn prefix() -> IpPrefix {
        "10.0.10.0/24".parse().unwrap()
    }

    fn run(
        old: &SwitchState,
        new: &SwitchState,
    ) -> (ResolvedNexthopMonitor, Vec<ProbeCommand>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = ResolvedNexthopMonitor::new(tx);
        let delta = StateDelta::new(Arc::new(old.clone()), Arc::new(new.clone()));
        monitor.state_updated(&delta).unwrap();
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        (monitor, commands)
    }

    fn with_route(route: Route) -> SwitchState {
        let mut state = SwitchState::new();
        state.routes.insert(route);
        state
    }

    #[test]
    fn test_unresolved_routes_not_probed() {
        let route = Route::unresolved(
            prefix(),
            RouteNextHopEntry::next_hops([NextHop::unresolved("10.0.10.1".parse().unwrap(), 1)]),
        );
        let (monitor, commands) = run(&SwitchState::new(), &with_route(route));
        assert!(!monitor.probes_scheduled());
        assert!(commands.is_empty());
    }

    #[test]
    fn test_resolved_route_adds_weightless_next_hops() {
        let route = Route::resolved(
            prefix(),
            RouteNextHopEntry::next_hops([resolved("fe80::22", 1, 3), resolved("fe80:55::22", 55, 1)]),
        );
        let (monitor, commands) = run(&SwitchState::new(), &with_route(route));
        assert!(monitor.probes_scheduled());
        assert_eq!(
            commands,
            vec![ProbeCommand::Changed {
                added: vec![resolved("fe80::22", 1, 0), resolved("fe80:55::22", 55, 0)],
                removed: vec![],
            }]
        );
    }

    #[test]
    fn test_changed_route_reports_difference_only() {
        let both = with_route(Route::resolved(
            prefix(),
            RouteNextHopEntry::next_hops([resolved("fe80::22", 1, 1), resolved("fe80:55::22", 55, 1)]),
        ));
        let one = with_route(Route::resolved(
            prefix(),
            RouteNextHopEntry::next_hops([resolved("fe80::22", 1, 4)]),
        ));
        let (_, commands) = run(&both, &one);
        assert_eq!(
            commands,
            vec![ProbeCommand::Changed {
                added: vec![],
                removed: vec![resolved("fe80:55::22", 55, 0)],
            }]
        );
    }

    #[test]
    fn test_cpu_route_and_unrelated_update_ignored() {
        let cpu = with_route(Route::resolved(prefix(), RouteNextHopEntry::to_cpu()));
        let (monitor, commands) = run(&SwitchState::new(), &cpu);
        assert!(!monitor.probes_scheduled());
        assert!(commands.is_empty());

        let mut mirrored = cpu.clone();
        mirrored.mirrors.insert(Mirror::new("mirror"));
        let (monitor, commands) = run(&cpu, &mirrored);
        assert!(!monitor.probes_scheduled());
        assert!(commands.is_empty());
    }

    #[test]
    fn test_removed_neighbor_forwarded() {
        let vlan_id = VlanId::new(10).unwrap();
        let mut with_neighbor = SwitchState::new();
        let mut vlan = Vlan::new(vlan_id, "vlan10").with_interface(InterfaceId::new(1));
        vlan.arp_table.insert(NeighborEntry::reachable(
            "10.0.0.22".parse().unwrap(),
            MacAddress::new([2, 0, 0, 0, 0, 22]),
            NeighborPort::Physical(PortId::new(1)),
            InterfaceId::new(1),
        ));
        with_neighbor.vlans.insert(vlan);

        let mut without = with_neighbor.clone();
        without.vlans.modify(&vlan_id, |vlan| {
            vlan.arp_table.remove(&"10.0.0.22".parse().unwrap());
        });

        let (_, commands) = run(&with_neighbor, &without);
        assert_eq!(
            commands,
            vec![ProbeCommand::NeighborRemoved {
                ip: "10.0.0.22".parse().unwrap(),
                interface_id: InterfaceId::new(1),
            }]
        );
    }
}
