//! Error types for the switch agent.

use swagent_state::StateError;
use thiserror::Error;

use crate::resource::AccountingError;

/// Switch agent errors.
///
/// A transition rejected for capacity is an ordinary
/// [`crate::UpdateOutcome::Rejected`], not an error.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error (duplicate observer, bad config file, bad class list)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// State tree error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Seeding the resource ledger from the initial state failed
    #[error("Accounting error: {0}")]
    Accounting(#[from] AccountingError),

    /// The update service task has exited
    #[error("Update service is not running")]
    ServiceStopped,

    /// The update service task ended without being asked to stop
    #[error("Update service failed: {0}")]
    ServiceFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failure reported by an observer while handling a delta.
///
/// The dispatcher treats any such failure as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{observer}: {message}")]
pub struct ObserverError {
    pub observer: String,
    pub message: String,
}

impl ObserverError {
    pub fn new(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swagent_types::InterfaceId;

    #[test]
    fn test_error_display() {
        let err = AgentError::Configuration("observer already registered".to_string());
        assert_eq!(err.to_string(), "Configuration error: observer already registered");
    }

    #[test]
    fn test_state_error_conversion() {
        let err: AgentError = StateError::UnknownInterface(InterfaceId::new(4)).into();
        assert_eq!(err.to_string(), "State error: interface intf4 is not present in the state");
    }

    #[test]
    fn test_observer_error_display() {
        let err = ObserverError::new("lookup_class_updater", "cache out of sync");
        assert_eq!(err.to_string(), "lookup_class_updater: cache out of sync");
    }
}
