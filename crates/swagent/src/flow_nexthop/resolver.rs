use std::collections::BTreeSet;
use swagent_state::{FlowEntry, NextHopSet, RedirectNextHop, StateDelta, SwitchState};
use swagent_types::IpPrefix;
use tracing::debug;

use crate::daemon::{StateObserver, StateUpdater};
use crate::error::ObserverError;

/// Forwarding next hops that redirect targets currently resolve to.
///
/// Each target takes the most specific route covering its IP; targets
/// pinned to an interface keep only next hops on that interface.
pub fn resolve_redirect(state: &SwitchState, targets: &[RedirectNextHop]) -> NextHopSet {
    let mut resolved = NextHopSet::new();
    for target in targets {
        let Some(route) = state.longest_prefix_match(&target.ip) else {
            continue;
        };
        let Some(next_hops) = route.resolved_next_hops() else {
            continue;
        };
        resolved.extend(next_hops.iter().filter(|nh| {
            nh.is_resolved()
                && target
                    .interface_id
                    .map_or(true, |intf| nh.interface_id == Some(intf))
        }));
    }
    resolved
}

/// Refreshes one entry in place; returns whether anything changed.
fn refresh_entry(state: &SwitchState, entry: &mut FlowEntry) -> bool {
    let Some(redirect) = entry.redirect.as_mut() else {
        return false;
    };
    let resolved = resolve_redirect(state, &redirect.next_hops);
    let enabled = !resolved.is_empty();
    if redirect.resolved == resolved && entry.enabled == enabled {
        return false;
    }
    redirect.resolved = resolved;
    entry.enabled = enabled;
    true
}

fn needs_refresh(state: &SwitchState, entry: &FlowEntry) -> bool {
    refresh_entry(state, &mut entry.clone())
}

fn refresh_entries(state: &SwitchState, names: &[String]) -> Option<SwitchState> {
    let mut next = state.clone();
    let mut changed = false;
    for name in names {
        // The entry may be gone by the time this runs.
        next.flow_entries.modify(name, |entry| {
            changed |= refresh_entry(state, entry);
        });
    }
    changed.then_some(next)
}

/// Keeps the resolved next hops and enabled flag of redirecting flow
/// entries in step with the route table.
pub struct FlowNexthopResolver {
    updater: StateUpdater,
}

impl FlowNexthopResolver {
    pub const NAME: &'static str = "flow_nexthop_resolver";

    pub fn new(updater: StateUpdater) -> Self {
        Self { updater }
    }

    /// Redirecting entries this delta may have affected.
    fn affected_entries(delta: &StateDelta) -> BTreeSet<String> {
        let new_state = delta.new_state();
        let mut names: BTreeSet<String> = delta
            .flow_entries_delta()
            .iter()
            .filter_map(|value| value.new())
            .filter(|entry| entry.redirect.is_some())
            .map(|entry| entry.name.clone())
            .collect();

        let prefixes: Vec<IpPrefix> = delta
            .routes_delta()
            .iter()
            .filter_map(|value| value.new().or(value.old()))
            .map(|route| route.prefix)
            .collect();
        if prefixes.is_empty() {
            return names;
        }
        for entry in new_state.flow_entries.values() {
            let Some(redirect) = &entry.redirect else {
                continue;
            };
            let touched = redirect
                .next_hops
                .iter()
                .any(|target| prefixes.iter().any(|prefix| prefix.contains(&target.ip)));
            if touched {
                names.insert(entry.name.clone());
            }
        }
        names
    }
}

impl StateObserver for FlowNexthopResolver {
    fn state_updated(&mut self, delta: &StateDelta) -> Result<(), ObserverError> {
        let new_state = delta.new_state();
        let stale: Vec<String> = Self::affected_entries(delta)
            .into_iter()
            .filter(|name| {
                new_state
                    .flow_entries
                    .get(name)
                    .is_some_and(|entry| needs_refresh(new_state, entry))
            })
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        debug!(entries = stale.len(), "Scheduling flow redirect refresh");
        self.updater
            .schedule("update flow redirect next hops", move |state: &SwitchState| {
                refresh_entries(state, &stale)
            })
            .map_err(|err| ObserverError::new(Self::NAME, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::UpdateReceiver;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use swagent_state::{NextHop, Route, RouteNextHopEntry};
    use swagent_types::InterfaceId;

    const FLOW: &str = "redirect-flow";

    fn nh(addr: &str, intf: u32) -> NextHop {
        NextHop::resolved(addr.parse().unwrap(), InterfaceId::new(intf), 1)
    }

    fn target(ip: &str, intf: Option<u32>) -> RedirectNextHop {
        RedirectNextHop {
            ip: ip.parse().unwrap(),
            interface_id: intf.map(InterfaceId::new),
        }
    }

    fn route(prefix: &str, hops: impl IntoIterator<Item = NextHop>) -> Route {
        Route::resolved(prefix.parse().unwrap(), RouteNextHopEntry::next_hops(hops))
    }

    struct Harness {
        state: SwitchState,
        resolver: FlowNexthopResolver,
        queue: UpdateReceiver,
    }

    impl Harness {
        fn new() -> Self {
            let (updater, queue) = StateUpdater::channel();
            Self {
                state: SwitchState::new(),
                resolver: FlowNexthopResolver::new(updater),
                queue,
            }
        }

        /// Commits `edit`, dispatches it and applies follow-on updates.
        fn apply(&mut self, edit: impl FnOnce(&mut SwitchState)) {
            let mut next = self.state.clone();
            edit(&mut next);
            self.commit(next);
            loop {
                let Some(update) = self.queue.try_next() else {
                    break;
                };
                if let Some(next) = update.apply(&self.state) {
                    self.commit(next);
                }
            }
        }

        fn commit(&mut self, next: SwitchState) {
            let delta = StateDelta::new(Arc::new(self.state.clone()), Arc::new(next.clone()));
            self.resolver.state_updated(&delta).unwrap();
            self.state = next;
        }

        fn flow(&self) -> &FlowEntry {
            self.state.flow_entries.get(&FLOW.to_string()).unwrap()
        }
    }

    #[test]
    fn test_unresolved_redirect_stays_disabled() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.flow_entries
                .insert(FlowEntry::new(FLOW, 10).with_redirect(vec![target("10.0.1.1", None)]));
        });
        assert!(!h.flow().enabled);
        assert!(h.flow().redirect.as_ref().unwrap().resolved.is_empty());
    }

    #[test]
    fn test_route_add_delete_tracks_resolution() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.flow_entries
                .insert(FlowEntry::new(FLOW, 10).with_redirect(vec![target("10.0.1.1", None)]));
        });

        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.1.0.1", 1), nh("10.2.0.1", 2)]));
        });
        assert!(h.flow().enabled);
        assert_eq!(
            h.flow().redirect.as_ref().unwrap().resolved,
            NextHopSet::from([nh("10.1.0.1", 1), nh("10.2.0.1", 2)])
        );

        h.apply(|s| {
            s.routes.remove(&"10.0.1.0/24".parse().unwrap());
        });
        assert!(!h.flow().enabled);
        assert!(h.flow().redirect.as_ref().unwrap().resolved.is_empty());
    }

    #[test]
    fn test_more_specific_route_wins() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.routes.insert(route("10.0.0.0/8", [nh("10.1.0.1", 1)]));
            s.flow_entries
                .insert(FlowEntry::new(FLOW, 10).with_redirect(vec![target("10.0.1.1", None)]));
        });
        assert_eq!(
            h.flow().redirect.as_ref().unwrap().resolved,
            NextHopSet::from([nh("10.1.0.1", 1)])
        );

        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.2.0.1", 2)]));
        });
        assert_eq!(
            h.flow().redirect.as_ref().unwrap().resolved,
            NextHopSet::from([nh("10.2.0.1", 2)])
        );
    }

    #[test]
    fn test_interface_filter_and_union() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.1.0.1", 1), nh("10.1.0.2", 2)]));
            s.routes.insert(route("10.0.2.0/24", [nh("10.3.0.1", 3), nh("10.3.0.2", 4)]));
            s.flow_entries.insert(
                FlowEntry::new(FLOW, 10)
                    .with_redirect(vec![target("10.0.1.1", Some(1)), target("10.0.2.1", Some(3))]),
            );
        });
        assert!(h.flow().enabled);
        assert_eq!(
            h.flow().redirect.as_ref().unwrap().resolved,
            NextHopSet::from([nh("10.1.0.1", 1), nh("10.3.0.1", 3)])
        );

        // No next hop on a pinned interface any more.
        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.1.0.2", 2)]));
            s.routes.insert(route("10.0.2.0/24", [nh("10.3.0.2", 4)]));
        });
        assert!(!h.flow().enabled);
    }

    #[test]
    fn test_unrelated_route_change_is_quiet() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.1.0.1", 1)]));
            s.flow_entries
                .insert(FlowEntry::new(FLOW, 10).with_redirect(vec![target("10.0.1.1", None)]));
        });
        let before = h.state.clone();

        let mut next = h.state.clone();
        next.routes.insert(route("192.168.0.0/16", [nh("10.9.0.1", 9)]));
        h.commit(next);
        assert!(h.queue.try_next().is_none());
        assert_eq!(h.flow(), &**before.flow_entries.get(&FLOW.to_string()).unwrap());
    }

    #[test]
    fn test_plain_entries_ignored() {
        let mut h = Harness::new();
        h.apply(|s| {
            s.routes.insert(route("10.0.1.0/24", [nh("10.1.0.1", 1)]));
            s.flow_entries.insert(FlowEntry::new(FLOW, 10));
        });
        assert!(h.flow().enabled);
        assert!(h.flow().redirect.is_none());
        assert!(h.queue.try_next().is_none());
    }
}
