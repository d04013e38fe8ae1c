//! Update service and observer dispatch.

mod agent;
mod registry;
mod update;

pub use agent::{supervise, AgentHandle, SwitchAgent, DELTA_CHANNEL_CAPACITY};
pub use registry::{ObserverRegistry, StateObserver};
pub use update::{StateUpdate, StateUpdater, Transition, UpdateOutcome, UpdateReceiver};
