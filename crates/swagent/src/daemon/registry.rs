//! Observer registration and ordered delta dispatch.

use swagent_state::StateDelta;
use tracing::{debug, error, info};

use crate::error::{AgentError, ObserverError, Result};

/// Receives every committed state transition.
///
/// Observers run one at a time on the update service task and must not
/// block it. They react to the delta only; follow-on mutations go back
/// through a [`crate::StateUpdater`].
pub trait StateObserver: Send {
    fn state_updated(&mut self, delta: &StateDelta) -> std::result::Result<(), ObserverError>;
}

struct Registration {
    name: String,
    observer: Box<dyn StateObserver>,
}

/// Observers in registration order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Registration>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer under a unique name.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Configuration`] if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, observer: Box<dyn StateObserver>) -> Result<()> {
        let name = name.into();
        if self.observers.iter().any(|r| r.name == name) {
            return Err(AgentError::Configuration(format!(
                "observer {} is already registered",
                name
            )));
        }
        info!(observer = %name, position = self.observers.len(), "Registering state observer");
        self.observers.push(Registration { name, observer });
        Ok(())
    }

    /// Removes an observer; returns false if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.observers.len();
        self.observers.retain(|r| r.name != name);
        let removed = self.observers.len() != before;
        if removed {
            info!(observer = %name, "Unregistered state observer");
        }
        removed
    }

    /// Hands `delta` to every observer in registration order.
    ///
    /// # Panics
    ///
    /// If any observer fails. The remaining observers' caches cannot be
    /// trusted against a partially dispatched delta.
    pub fn dispatch(&mut self, delta: &StateDelta) {
        for registration in &mut self.observers {
            debug!(observer = %registration.name, "Dispatching state delta");
            if let Err(err) = registration.observer.state_updated(delta) {
                error!(observer = %registration.name, error = %err, "State observer failed");
                panic!("state observer {} failed: {}", registration.name, err);
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.observers.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
