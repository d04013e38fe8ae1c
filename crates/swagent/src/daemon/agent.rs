//! The update service: one task owning the current state.

use std::future::Future;
use std::sync::Arc;
use swagent_state::{StateDelta, SwitchState};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{ObserverRegistry, StateObserver};
use super::update::{Request, StateUpdate, StateUpdater, UpdateOutcome};
use crate::error::{AgentError, Result};
use crate::resource::{AccountingError, ResourceAccountant};

/// Committed deltas buffered per lagging subscriber.
pub const DELTA_CHANNEL_CAPACITY: usize = 1024;

/// Owns the current state version, the observer registry and the resource
/// accountant.
///
/// Every mutation is a queued [`StateUpdate`] executed on the task started
/// by [`SwitchAgent::spawn`], one at a time and in submission order:
///
/// 1. run the transition against the current version
/// 2. build the delta and validate it against hardware capacity
/// 3. publish the new version and dispatch the delta to every observer
/// 4. commit the ledger, broadcast the delta and reply to the caller
///
/// Observers of transition N therefore always finish before transition
/// N+1 starts, and no observer ever sees a version that is later
/// discarded.
pub struct SwitchAgent {
    state: Arc<SwitchState>,
    registry: ObserverRegistry,
    accountant: ResourceAccountant,
    updater: StateUpdater,
    requests: mpsc::UnboundedReceiver<Request>,
    state_tx: watch::Sender<Arc<SwitchState>>,
    delta_tx: broadcast::Sender<StateDelta>,
}

impl SwitchAgent {
    /// Creates the agent with `initial` as the first published version.
    ///
    /// The ledger is seeded from `initial` without gating.
    pub fn new(initial: SwitchState, mut accountant: ResourceAccountant) -> Result<Self> {
        let state = initial.into_shared();
        accountant.record(&StateDelta::new(
            SwitchState::new().into_shared(),
            Arc::clone(&state),
        ))?;

        let (tx, requests) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(Arc::clone(&state));
        let (delta_tx, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Ok(Self {
            state,
            registry: ObserverRegistry::new(),
            accountant,
            updater: StateUpdater::new(tx),
            requests,
            state_tx,
            delta_tx,
        })
    }

    /// Registers an observer before the service starts.
    pub fn register_observer(
        &mut self,
        name: impl Into<String>,
        observer: Box<dyn StateObserver>,
    ) -> Result<()> {
        self.registry.register(name, observer)
    }

    pub fn updater(&self) -> StateUpdater {
        self.updater.clone()
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            updater: self.updater.clone(),
            state_rx: self.state_tx.subscribe(),
            delta_tx: self.delta_tx.clone(),
        }
    }

    pub fn accountant(&self) -> &ResourceAccountant {
        &self.accountant
    }

    pub fn current_state(&self) -> &Arc<SwitchState> {
        &self.state
    }

    /// Starts the update service on the current tokio runtime.
    pub fn spawn(self) -> (AgentHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!(observers = self.registry.len(), "Update service started");
        while let Some(request) = self.requests.recv().await {
            match request {
                Request::Update { update, reply } => {
                    let outcome = self.apply_update(update);
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                Request::Register {
                    name,
                    observer,
                    reply,
                } => {
                    let _ = reply.send(self.registry.register(name, observer));
                }
                Request::Unregister { name, reply } => {
                    let _ = reply.send(self.registry.unregister(&name));
                }
                Request::Stop => break,
            }
        }
        info!("Update service stopped");
    }

    /// Runs one transition through validation, publication and dispatch.
    ///
    /// # Panics
    ///
    /// If accounting cannot resolve a neighbor's interface or an observer
    /// fails; either leaves derived state that can no longer be trusted.
    pub fn apply_update(&mut self, update: StateUpdate) -> UpdateOutcome {
        let name = update.name().to_string();
        let validated = update.is_validated();
        let Some(next) = update.apply(&self.state) else {
            debug!(update = %name, "Transition made no change");
            return UpdateOutcome::NoChange;
        };
        let delta = StateDelta::new(Arc::clone(&self.state), next.into_shared());
        if delta.is_empty() {
            debug!(update = %name, "Transition made no change");
            return UpdateOutcome::NoChange;
        }

        if validated {
            let token = match self.accountant.validate(&delta) {
                Ok(token) => token,
                Err(AccountingError::Exhausted(exhausted)) => {
                    warn!(
                        update = %name,
                        violations = exhausted.violations.len(),
                        "Transition rejected for resource exhaustion"
                    );
                    return UpdateOutcome::Rejected(exhausted);
                }
                Err(AccountingError::Lookup(err)) => fatal_accounting(&name, &err),
            };
            self.publish(&delta);
            self.accountant.commit(token);
        } else {
            if let Err(err) = self.accountant.record(&delta) {
                fatal_accounting(&name, &err);
            }
            self.publish(&delta);
        }

        // No subscribers is not an error.
        let _ = self.delta_tx.send(delta);
        debug!(update = %name, "Transition applied");
        UpdateOutcome::Applied
    }

    fn publish(&mut self, delta: &StateDelta) {
        self.state = Arc::clone(delta.new_state());
        self.state_tx.send_replace(Arc::clone(&self.state));
        self.registry.dispatch(delta);
    }
}

fn fatal_accounting(update: &str, err: &dyn std::fmt::Display) -> ! {
    error!(update = %update, error = %err, "Resource accounting lookup failed");
    panic!("resource accounting failed during {}: {}", update, err);
}

/// Runs the update service until `shutdown` completes, then stops it.
///
/// The service only ends on its own when an observer or accounting lookup
/// has failed. That is fatal to the process: the failure is returned as
/// [`AgentError::ServiceFailed`] and the caller must exit.
pub async fn supervise<F>(mut service: JoinHandle<()>, handle: &AgentHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        joined = &mut service => {
            let reason = match joined {
                Err(err) if err.is_panic() => "update service panicked".to_string(),
                Err(err) => err.to_string(),
                Ok(()) => "update service exited unexpectedly".to_string(),
            };
            error!(reason = %reason, "Update service terminated");
            Err(AgentError::ServiceFailed(reason))
        }
        () = shutdown => {
            handle.stop()?;
            service
                .await
                .map_err(|err| AgentError::ServiceFailed(err.to_string()))
        }
    }
}

/// Cloneable client of a running [`SwitchAgent`].
#[derive(Debug, Clone)]
pub struct AgentHandle {
    updater: StateUpdater,
    state_rx: watch::Receiver<Arc<SwitchState>>,
    delta_tx: broadcast::Sender<StateDelta>,
}

impl AgentHandle {
    /// Applies a validated transition and waits until every observer has
    /// seen it.
    pub async fn update<F>(&self, name: impl Into<String>, transition: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        let reply = self.submit(StateUpdate::new(name, transition))?;
        reply.await.map_err(|_| AgentError::ServiceStopped)
    }

    /// [`AgentHandle::update`] for threads outside the tokio runtime.
    ///
    /// # Panics
    ///
    /// If called from within an async context.
    pub fn update_blocking<F>(&self, name: impl Into<String>, transition: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        let reply = self.submit(StateUpdate::new(name, transition))?;
        reply.blocking_recv().map_err(|_| AgentError::ServiceStopped)
    }

    /// Applies a transition that is recorded in the ledger but never
    /// rejected, for state the hardware already holds.
    pub async fn update_unvalidated<F>(
        &self,
        name: impl Into<String>,
        transition: F,
    ) -> Result<UpdateOutcome>
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        let reply = self.submit(StateUpdate::unvalidated(name, transition))?;
        reply.await.map_err(|_| AgentError::ServiceStopped)
    }

    /// Queues a validated transition without waiting for it.
    pub fn schedule_update<F>(&self, name: impl Into<String>, transition: F) -> Result<()>
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        self.updater.schedule(name, transition)
    }

    fn submit(&self, update: StateUpdate) -> Result<oneshot::Receiver<UpdateOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.updater.send(Request::Update {
            update,
            reply: Some(tx),
        })?;
        Ok(rx)
    }

    /// Latest published version.
    pub fn current_state(&self) -> Arc<SwitchState> {
        Arc::clone(&self.state_rx.borrow())
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<SwitchState>> {
        self.state_rx.clone()
    }

    /// Committed deltas from now on.
    pub fn subscribe_deltas(&self) -> broadcast::Receiver<StateDelta> {
        self.delta_tx.subscribe()
    }

    pub fn updater(&self) -> StateUpdater {
        self.updater.clone()
    }

    /// Registers an observer on the running service. It sees every
    /// transition queued after this request.
    pub async fn register_observer(
        &self,
        name: impl Into<String>,
        observer: Box<dyn StateObserver>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.updater.send(Request::Register {
            name: name.into(),
            observer,
            reply,
        })?;
        rx.await.map_err(|_| AgentError::ServiceStopped)?
    }

    pub async fn unregister_observer(&self, name: impl Into<String>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.updater.send(Request::Unregister {
            name: name.into(),
            reply,
        })?;
        rx.await.map_err(|_| AgentError::ServiceStopped)
    }

    /// Asks the service to exit once the requests queued so far are done.
    pub fn stop(&self) -> Result<()> {
        self.updater.send(Request::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserverError;
    use crate::resource::{AccountantConfig, AsicFamily, HwCapacity, HwCapacityTable};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use swagent_state::{Mirror, NextHop, Route, RouteNextHopEntry};
    use swagent_types::{InterfaceId, SwitchId};

    fn accountant(max_groups: u32) -> ResourceAccountant {
        let capacity = HwCapacity {
            max_ecmp_groups: Some(max_groups),
            ..HwCapacity::new(AsicFamily::Fake)
        };
        ResourceAccountant::new(
            HwCapacityTable::from([(SwitchId::new(0), capacity)]),
            AccountantConfig {
                ecmp_resource_percentage: 100,
                ..AccountantConfig::default()
            },
        )
    }

    fn add_ecmp_route(index: u8) -> impl FnOnce(&SwitchState) -> Option<SwitchState> + Send {
        move |state: &SwitchState| {
            let mut next = state.clone();
            next.routes.insert(Route::resolved(
                format!("10.{}.0.0/16", index).parse().unwrap(),
                RouteNextHopEntry::next_hops((1..=2).map(|host| {
                    NextHop::resolved(
                        format!("192.168.{}.{}", index, host).parse().unwrap(),
                        InterfaceId::new(1),
                        1,
                    )
                })),
            ));
            Some(next)
        }
    }

    struct Counter(Arc<Mutex<Vec<usize>>>);

    impl StateObserver for Counter {
        fn state_updated(&mut self, delta: &StateDelta) -> std::result::Result<(), ObserverError> {
            self.0.lock().unwrap().push(delta.new_state().routes.len());
            Ok(())
        }
    }

    #[test]
    fn test_apply_update_without_runtime() {
        let mut agent = SwitchAgent::new(SwitchState::new(), accountant(1)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        agent
            .register_observer("counter", Box::new(Counter(Arc::clone(&seen))))
            .unwrap();

        assert_eq!(agent.apply_update(StateUpdate::new("r0", add_ecmp_route(0))), UpdateOutcome::Applied);
        let rejected = agent.apply_update(StateUpdate::new("r1", add_ecmp_route(1)));
        assert!(matches!(rejected, UpdateOutcome::Rejected(_)));
        assert_eq!(
            agent.apply_update(StateUpdate::new("noop", |_: &SwitchState| None)),
            UpdateOutcome::NoChange
        );

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(agent.current_state().routes.len(), 1);
        assert_eq!(agent.accountant().ledger().ecmp_group_count(), 1);
    }

    #[test]
    fn test_identical_state_is_no_change() {
        let mut agent = SwitchAgent::new(SwitchState::new(), accountant(1)).unwrap();
        let outcome = agent.apply_update(StateUpdate::new("copy", |state: &SwitchState| {
            Some(state.clone())
        }));
        assert_eq!(outcome, UpdateOutcome::NoChange);
    }

    #[test]
    fn test_initial_state_seeds_ledger() {
        let mut initial = SwitchState::new();
        initial.mirrors.insert(Mirror::new("span0"));
        let seeded = add_ecmp_route(0)(&initial).unwrap();
        let agent = SwitchAgent::new(seeded, accountant(1)).unwrap();
        assert_eq!(agent.accountant().ledger().ecmp_group_count(), 1);
    }

    struct Failing;

    impl StateObserver for Failing {
        fn state_updated(&mut self, _delta: &StateDelta) -> std::result::Result<(), ObserverError> {
            Err(ObserverError::new("failing", "cache out of sync"))
        }
    }

    #[tokio::test]
    async fn test_observer_failure_fails_supervised_service() {
        let mut agent = SwitchAgent::new(SwitchState::new(), accountant(4)).unwrap();
        agent.register_observer("failing", Box::new(Failing)).unwrap();
        let (handle, service) = agent.spawn();

        assert!(matches!(
            handle.update("r0", add_ecmp_route(0)).await,
            Err(AgentError::ServiceStopped)
        ));
        let result = supervise(service, &handle, std::future::pending()).await;
        assert!(matches!(result, Err(AgentError::ServiceFailed(_))));
    }

    #[tokio::test]
    async fn test_supervise_stops_on_shutdown() {
        let agent = SwitchAgent::new(SwitchState::new(), accountant(4)).unwrap();
        let (handle, service) = agent.spawn();
        handle.update("r0", add_ecmp_route(0)).await.unwrap();

        supervise(service, &handle, async {}).await.unwrap();
        assert!(matches!(
            handle.update("late", add_ecmp_route(1)).await,
            Err(AgentError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let agent = SwitchAgent::new(SwitchState::new(), accountant(4)).unwrap();
        let (handle, task) = agent.spawn();
        let mut deltas = handle.subscribe_deltas();

        let outcome = handle.update("r0", add_ecmp_route(0)).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(handle.current_state().routes.len(), 1);

        let delta = deltas.recv().await.unwrap();
        assert_eq!(delta.routes_delta().iter().count(), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        handle
            .register_observer("counter", Box::new(Counter(Arc::clone(&seen))))
            .await
            .unwrap();
        handle.update("r1", add_ecmp_route(1)).await.unwrap();
        assert!(handle.unregister_observer("counter").await.unwrap());
        handle.update("r2", add_ecmp_route(2)).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2]);

        handle.stop().unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.update("late", add_ecmp_route(3)).await,
            Err(AgentError::ServiceStopped)
        ));
    }
}
