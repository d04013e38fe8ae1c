//! Error types for the state tree.

use swagent_types::{InterfaceId, PortId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Interface-to-switch resolution failed.
    #[error("interface {0} is not present in the state")]
    UnknownInterface(InterfaceId),

    #[error("invalid lookup class list on {port}: {reason}")]
    InvalidLookupClasses { port: PortId, reason: String },
}

pub type Result<T> = std::result::Result<T, StateError>;
