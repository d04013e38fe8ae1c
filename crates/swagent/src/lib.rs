//! Switch agent state core
//!
//! Serializes every mutation of the switch state through one update
//! service, gates it on hardware capacity and fans the committed delta out
//! to observers that maintain derived state.
//!
//! # Architecture
//!
//! ```text
//! [callers] ──StateUpdate──> [SwitchAgent] (one tokio task)
//!                               │ transition(old) -> new
//!                               │ StateDelta(old, new)
//!                               ↓
//!                        [ResourceAccountant] ──exhausted──> Rejected
//!                               │ accepted
//!                               ↓
//!                        publish new root (watch)
//!                               │
//!                               ↓
//!                        [ObserverRegistry] in registration order
//!                          ├─ LookupClassUpdater ─────┐
//!                          ├─ ResolvedNexthopMonitor ─┼──> follow-on StateUpdates
//!                          └─ FlowNexthopResolver ────┘
//!                               │
//!                               ↓
//!                        commit ledger, broadcast delta
//! ```
//!
//! # Key Components
//!
//! - [`daemon::SwitchAgent`]: update service loop and observer dispatch
//! - [`resource::ResourceAccountant`]: capacity ledger and budget checks
//! - [`lookup_class`], [`nexthop_probe`], [`flow_nexthop`]: derived-state reactors
//! - [`config::AgentConfig`]: TOML configuration

pub mod config;
pub mod daemon;
pub mod error;
pub mod flow_nexthop;
pub mod lookup_class;
pub mod nexthop_probe;
pub mod resource;

pub use config::AgentConfig;
pub use daemon::{
    supervise, AgentHandle, ObserverRegistry, StateObserver, StateUpdate, StateUpdater, SwitchAgent,
    UpdateOutcome,
};
pub use error::{AgentError, ObserverError, Result};
pub use flow_nexthop::FlowNexthopResolver;
pub use lookup_class::LookupClassUpdater;
pub use nexthop_probe::{
    PendingEntryProber, ResolvedNexthopMonitor, ResolvedNexthopProbeScheduler,
};
pub use resource::{ResourceAccountant, ResourceExhausted};
