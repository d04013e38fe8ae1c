//! Update requests queued to the update service.

use std::fmt;
use swagent_state::SwitchState;
use tokio::sync::{mpsc, oneshot};

use super::registry::StateObserver;
use crate::error::{AgentError, Result};
use crate::resource::ResourceExhausted;

/// Computes the next state from the current one; `None` means no change.
pub type Transition = Box<dyn FnOnce(&SwitchState) -> Option<SwitchState> + Send>;

/// Result of one queued transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Committed and dispatched to every observer.
    Applied,
    /// The transition returned no new state, or one equal to the current.
    NoChange,
    /// Dropped because it would exceed hardware capacity.
    Rejected(ResourceExhausted),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// A named transition waiting for the update service.
pub struct StateUpdate {
    name: String,
    transition: Transition,
    validated: bool,
}

impl StateUpdate {
    /// A transition gated by the resource accountant.
    pub fn new<F>(name: impl Into<String>, transition: F) -> Self
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        Self {
            name: name.into(),
            transition: Box::new(transition),
            validated: true,
        }
    }

    /// A transition that is recorded in the ledger without gating.
    pub fn unvalidated<F>(name: impl Into<String>, transition: F) -> Self
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        Self {
            validated: false,
            ..Self::new(name, transition)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Runs the transition against `state`.
    pub fn apply(self, state: &SwitchState) -> Option<SwitchState> {
        (self.transition)(state)
    }
}

impl fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpdate")
            .field("name", &self.name)
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}

pub(crate) enum Request {
    Update {
        update: StateUpdate,
        reply: Option<oneshot::Sender<UpdateOutcome>>,
    },
    Register {
        name: String,
        observer: Box<dyn StateObserver>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unregister {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Stop,
}

/// Cloneable sender of transitions to the update service.
///
/// Observers hold one to issue follow-on mutations; scheduling never
/// blocks, so it is safe from inside a dispatch.
#[derive(Debug, Clone)]
pub struct StateUpdater {
    tx: mpsc::UnboundedSender<Request>,
}

impl StateUpdater {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>) -> Self {
        Self { tx }
    }

    /// A detached updater and the queue it feeds, for driving observers
    /// without an update service.
    pub fn channel() -> (Self, UpdateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), UpdateReceiver { rx })
    }

    /// Queues a validated transition without waiting for its outcome.
    pub fn schedule<F>(&self, name: impl Into<String>, transition: F) -> Result<()>
    where
        F: FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    {
        self.send(Request::Update {
            update: StateUpdate::new(name, transition),
            reply: None,
        })
    }

    pub(crate) fn send(&self, request: Request) -> Result<()> {
        self.tx.send(request).map_err(|_| AgentError::ServiceStopped)
    }
}

/// Receiving half of [`StateUpdater::channel`].
pub struct UpdateReceiver {
    rx: mpsc::UnboundedReceiver<Request>,
}

impl UpdateReceiver {
    /// Next queued transition, if any.
    pub fn try_next(&mut self) -> Option<StateUpdate> {
        while let Ok(request) = self.rx.try_recv() {
            if let Request::Update { update, .. } = request {
                return Some(update);
            }
        }
        None
    }

    /// Applies every queued transition in order, starting from `state`.
    pub fn apply_all(&mut self, state: &SwitchState) -> SwitchState {
        let mut current = state.clone();
        while let Some(update) = self.try_next() {
            if let Some(next) = update.apply(&current) {
                current = next;
            }
        }
        current
    }
}
