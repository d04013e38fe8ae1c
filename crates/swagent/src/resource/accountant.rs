//! Capacity gate and usage bookkeeping for state transitions.

use std::ops::ControlFlow;
use std::sync::Arc;
use swagent_state::{
    DeltaValue, NeighborEntry, NextHopSet, Route, RouteAction, StateDelta, StateError,
    SwitchState,
};
use swagent_types::{AddressFamily, SwitchId};
use tracing::{debug, warn};

use super::ledger::{acquire_group, release_group, ResourceLedger};
use super::types::{
    AccountantConfig, AccountingError, AsicFamily, CheckStage, HwCapacityTable,
    ResourceExhausted, ResourceKind, ResourceViolation, WeightedMemberModel,
};

/// Proof that a transition passed [`ResourceAccountant::validate`].
///
/// The ledger already reflects the transition. Exactly one of
/// [`ResourceAccountant::commit`] or [`ResourceAccountant::abort`] must
/// consume it before the next transition is validated or recorded.
#[must_use = "a validated transition must be committed or aborted"]
#[derive(Debug)]
pub struct PendingTransition {
    generation: u64,
    delta: StateDelta,
}

impl PendingTransition {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn delta(&self) -> &StateDelta {
        &self.delta
    }
}

/// Tracks hardware resource usage across committed transitions and rejects
/// transitions that would exceed the per-switch capacity table.
///
/// ECMP groups are identified by their weight-normalized next-hop set and
/// reference counted by the resolved routes sharing them, so a new route
/// only consumes hardware when its set is new. Group and member usage is
/// checked after every route that creates or reuses a group (against the
/// full hardware limit) and again after the whole transition (against
/// `ecmp_resource_percentage` of it). Routes, neighbors and L2 entries are
/// checked once per transition against their flat maxima.
#[derive(Debug)]
pub struct ResourceAccountant {
    capacity: HwCapacityTable,
    config: AccountantConfig,
    ledger: ResourceLedger,
    pending: Option<u64>,
    generation: u64,
}

impl ResourceAccountant {
    pub fn new(capacity: HwCapacityTable, config: AccountantConfig) -> Self {
        Self {
            capacity,
            config,
            ledger: ResourceLedger::default(),
            pending: None,
            generation: 0,
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn config(&self) -> &AccountantConfig {
        &self.config
    }

    pub fn capacity(&self) -> &HwCapacityTable {
        &self.capacity
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Applies `delta` to the ledger and checks every budget.
    ///
    /// # Errors
    ///
    /// [`AccountingError::Exhausted`] if any budget is exceeded; the ledger
    /// is reverted before returning. [`AccountingError::Lookup`] if a
    /// neighbor's interface cannot be resolved, after which the ledger is
    /// no longer trustworthy.
    ///
    /// # Panics
    ///
    /// If a previously validated transition has not been committed or
    /// aborted.
    pub fn validate(&mut self, delta: &StateDelta) -> Result<PendingTransition, AccountingError> {
        self.assert_idle("validate");

        let mut checks = Checks::gating();
        self.apply(delta, &mut checks)?;
        self.final_checks(&mut checks);

        if !checks.violations.is_empty() {
            for violation in &checks.violations {
                warn!(
                    resource = %violation.kind,
                    switch_id = ?violation.switch_id,
                    stage = %violation.stage,
                    limit = violation.limit,
                    usage = violation.usage,
                    "Resource budget exceeded"
                );
            }
            self.apply(&delta.reversed(), &mut Checks::disabled())?;
            return Err(ResourceExhausted {
                violations: checks.violations,
            }
            .into());
        }

        self.generation += 1;
        self.pending = Some(self.generation);
        debug!(
            generation = self.generation,
            ecmp_groups = self.ledger.ecmp_group_count(),
            routes = self.ledger.routes,
            "Transition fits resource budget"
        );
        Ok(PendingTransition {
            generation: self.generation,
            delta: delta.clone(),
        })
    }

    /// Finalizes a validated transition.
    pub fn commit(&mut self, token: PendingTransition) {
        self.take_pending(&token);
    }

    /// Reverts the ledger changes of a validated transition that was not
    /// published.
    pub fn abort(&mut self, token: PendingTransition) -> Result<(), AccountingError> {
        self.take_pending(&token);
        self.apply(&token.delta.reversed(), &mut Checks::disabled())?;
        debug!(generation = token.generation, "Validated transition aborted");
        Ok(())
    }

    /// Applies an already committed transition to the ledger without any
    /// budget check.
    pub fn record(&mut self, delta: &StateDelta) -> Result<(), AccountingError> {
        self.assert_idle("record");
        self.apply(delta, &mut Checks::disabled())?;
        Ok(())
    }

    /// Rebuilds a ledger from scratch by walking the whole of `state`.
    pub fn derive_ledger(&self, state: &SwitchState) -> Result<ResourceLedger, AccountingError> {
        let delta = StateDelta::new(
            SwitchState::new().into_shared(),
            Arc::new(state.clone()),
        );
        let mut scratch = ResourceAccountant::new(self.capacity.clone(), self.config.clone());
        scratch.record(&delta)?;
        Ok(scratch.ledger)
    }

    fn assert_idle(&self, operation: &str) {
        if let Some(generation) = self.pending {
            panic!(
                "{} called while transition {} is still pending commit or abort",
                operation, generation
            );
        }
    }

    fn take_pending(&mut self, token: &PendingTransition) {
        match self.pending.take() {
            Some(generation) if generation == token.generation => {}
            other => panic!(
                "transition {} is not the pending transition (pending: {:?})",
                token.generation, other
            ),
        }
    }

    fn apply(&mut self, delta: &StateDelta, checks: &mut Checks) -> Result<(), StateError> {
        for value in delta.routes_delta().iter() {
            // Changed routes are remove-then-add so that crossing the
            // resolved boundary is accounted on both sides.
            match value {
                DeltaValue::Added(new) => self.route_added(new, checks),
                DeltaValue::Removed(old) => self.route_removed(old),
                DeltaValue::Changed(old, new) => {
                    self.route_removed(old);
                    self.route_added(new, checks);
                }
            }
        }
        self.apply_neighbors(delta)?;
        self.apply_l2(delta);
        Ok(())
    }

    fn route_added(&mut self, route: &Route, checks: &mut Checks) {
        if route.is_resolved() {
            self.ledger.routes += 1;
        }
        let Some(set) = self.ecmp_set(route) else {
            return;
        };
        if acquire_group(&mut self.ledger.ecmp_groups, &set) {
            for (switch_id, capacity) in &self.capacity {
                self.ledger
                    .add_members(*switch_id, member_cost(&set, capacity.asic));
            }
        }
        if self.config.ars_enabled && is_unit_weight(&set) {
            acquire_group(&mut self.ledger.ars_groups, &set);
        }
        self.check_groups(CheckStage::Intermediate, checks);
    }

    fn route_removed(&mut self, route: &Route) {
        if route.is_resolved() {
            self.ledger.routes = self.ledger.routes.saturating_sub(1);
        }
        let Some(set) = self.ecmp_set(route) else {
            return;
        };
        if release_group(&mut self.ledger.ecmp_groups, &set) {
            for (switch_id, capacity) in &self.capacity {
                self.ledger
                    .remove_members(*switch_id, member_cost(&set, capacity.asic));
            }
        }
        if self.config.ars_enabled && is_unit_weight(&set) {
            release_group(&mut self.ledger.ars_groups, &set);
        }
    }

    /// Group identity of a resolved route forwarding to more than one
    /// next hop.
    fn ecmp_set(&self, route: &Route) -> Option<NextHopSet> {
        let forward = route.forward.as_ref()?;
        if forward.action != RouteAction::NextHops {
            return None;
        }
        let set = forward.normalized_next_hops(self.config.ucmp_width);
        (set.len() > 1).then_some(set)
    }

    fn apply_neighbors(&mut self, delta: &StateDelta) -> Result<(), StateError> {
        for family in AddressFamily::ALL {
            let mut failure = None;
            let _ = delta.for_each_neighbor_delta(family, |_, value| {
                let result = match value {
                    DeltaValue::Added(new) => self.neighbor_added(delta.new_state(), new, family),
                    DeltaValue::Removed(old) => {
                        self.neighbor_removed(delta.old_state(), old, family)
                    }
                    DeltaValue::Changed(old, new) => self
                        .neighbor_removed(delta.old_state(), old, family)
                        .and_then(|()| self.neighbor_added(delta.new_state(), new, family)),
                };
                match result {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(err) => {
                        failure = Some(err);
                        ControlFlow::Break(())
                    }
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    fn neighbor_added(
        &mut self,
        state: &SwitchState,
        entry: &NeighborEntry,
        family: AddressFamily,
    ) -> Result<(), StateError> {
        let switch_id = state.switch_id_for_interface(entry.interface_id)?;
        self.ledger.add_neighbor(switch_id, family);
        Ok(())
    }

    fn neighbor_removed(
        &mut self,
        state: &SwitchState,
        entry: &NeighborEntry,
        family: AddressFamily,
    ) -> Result<(), StateError> {
        let switch_id = state.switch_id_for_interface(entry.interface_id)?;
        self.ledger.remove_neighbor(switch_id, family);
        Ok(())
    }

    fn apply_l2(&mut self, delta: &StateDelta) {
        let l2_entries = &mut self.ledger.l2_entries;
        let _ = delta.for_each_mac_delta(|_, value| {
            match value {
                DeltaValue::Added(_) => *l2_entries += 1,
                DeltaValue::Removed(_) => *l2_entries = l2_entries.saturating_sub(1),
                DeltaValue::Changed(..) => {}
            }
            ControlFlow::Continue(())
        });
    }

    fn check_groups(&self, stage: CheckStage, checks: &mut Checks) {
        let percentage = match stage {
            CheckStage::Intermediate => 100,
            CheckStage::Final => self.config.ecmp_resource_percentage,
        };
        let groups = self.ledger.ecmp_group_count();
        for (switch_id, capacity) in &self.capacity {
            let scope = Some(*switch_id);
            checks.check(
                ResourceKind::EcmpGroups,
                scope,
                stage,
                capacity.max_ecmp_groups,
                percentage,
                groups,
            );
            checks.check(
                ResourceKind::EcmpMembers,
                scope,
                stage,
                capacity.max_ecmp_members,
                percentage,
                self.ledger.ecmp_member_usage(*switch_id),
            );
            if self.config.ars_enabled {
                checks.check(
                    ResourceKind::ArsGroups,
                    scope,
                    stage,
                    capacity.max_ars_groups,
                    percentage,
                    self.ledger.ars_group_count(),
                );
            }
        }
    }

    fn final_checks(&self, checks: &mut Checks) {
        self.check_groups(CheckStage::Final, checks);

        let stage = CheckStage::Final;
        for (switch_id, capacity) in &self.capacity {
            let scope = Some(*switch_id);
            let neighbors = self.ledger.neighbor_usage(*switch_id);
            checks.check(ResourceKind::Routes, scope, stage, capacity.max_routes, 100, self.ledger.routes);
            checks.check(ResourceKind::ArpEntries, scope, stage, capacity.max_arp_entries, 100, neighbors.arp);
            checks.check(ResourceKind::NdpEntries, scope, stage, capacity.max_ndp_entries, 100, neighbors.ndp);
            if self.config.unified_neighbor_table {
                checks.check(
                    ResourceKind::UnifiedNeighborEntries,
                    scope,
                    stage,
                    capacity.max_unified_neighbor_entries,
                    100,
                    neighbors.total(),
                );
            }
        }
        checks.check(
            ResourceKind::L2Entries,
            None,
            stage,
            self.config.max_l2_entries,
            100,
            self.ledger.l2_entries,
        );
    }
}

fn is_unit_weight(set: &NextHopSet) -> bool {
    set.iter().all(|nh| nh.weight == 1)
}

/// Hardware member entries one group consumes on an ASIC.
pub fn member_cost(set: &NextHopSet, asic: AsicFamily) -> u64 {
    let hops = set.len() as u64;
    if is_unit_weight(set) {
        return hops;
    }
    match asic.weighted_member_model() {
        WeightedMemberModel::Replicated => set
            .iter()
            .fold(0u64, |cost, nh| cost.saturating_add(nh.weight)),
        WeightedMemberModel::Scaled { factor } => hops * u64::from(factor),
        WeightedMemberModel::Native => hops,
    }
}

/// Violations found during one walk; a disabled collector ignores checks.
struct Checks {
    enabled: bool,
    violations: Vec<ResourceViolation>,
}

impl Checks {
    fn gating() -> Self {
        Self {
            enabled: true,
            violations: Vec::new(),
        }
    }

    fn disabled() -> Self {
        Self {
            enabled: false,
            violations: Vec::new(),
        }
    }

    /// Records a violation if `usage` exceeds `percentage` of `limit`.
    ///
    /// The soft limit is `limit * percentage / 100` rounded down. Usage is
    /// a whole number, so this admits exactly the usages at or below the
    /// unrounded fraction: 750 of 1000 at 75% passes and 751 does not, 3
    /// of 5 at 75% passes and 4 does not.
    ///
    /// Repeated hits on the same resource at the same stage keep one
    /// record with the peak usage.
    fn check(
        &mut self,
        kind: ResourceKind,
        switch_id: Option<SwitchId>,
        stage: CheckStage,
        limit: Option<u32>,
        percentage: u8,
        usage: u64,
    ) {
        if !self.enabled {
            return;
        }
        let Some(limit) = limit else {
            return;
        };
        let limit = u64::from(limit) * u64::from(percentage) / 100;
        if usage <= limit {
            return;
        }
        match self
            .violations
            .iter_mut()
            .find(|v| v.kind == kind && v.switch_id == switch_id && v.stage == stage)
        {
            Some(existing) => existing.usage = existing.usage.max(usage),
            None => self.violations.push(ResourceViolation {
                kind,
                switch_id,
                stage,
                limit,
                usage,
            }),
        }
    }
}
