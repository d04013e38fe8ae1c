//! Hardware resource accounting for state transitions.
//!
//! # Architecture
//!
//! ```text
//!   StateDelta (candidate)
//!        │
//!        ▼
//!   ResourceAccountant::validate ──Err──> ResourceExhausted (transition dropped,
//!        │                                 ledger reverted)
//!        │ Ok(PendingTransition)
//!        ▼
//!   publish + observer dispatch
//!        │
//!        ▼
//!   ResourceAccountant::commit(token)
//! ```
//!
//! # Accounted resources
//!
//! - ECMP groups and members, per switch, with intermediate and soft-limit
//!   final checks
//! - Advanced load-balancing groups (optional)
//! - Resolved routes
//! - ARP/NDP neighbor entries per switch, optionally under a unified cap
//! - Learned L2 entries
//!
//! Transitions applied with [`ResourceAccountant::record`] update the
//! ledger without being gated; the ledger can always be rebuilt from a
//! state with [`ResourceAccountant::derive_ledger`].

mod accountant;
mod ledger;
mod types;

pub use accountant::{member_cost, PendingTransition, ResourceAccountant};
pub use ledger::{NeighborUsage, ResourceLedger};
pub use types::{
    AccountantConfig, AccountingError, AsicFamily, CheckStage, HwCapacity, HwCapacityTable,
    ResourceExhausted, ResourceKind, ResourceViolation, WeightedMemberModel,
    DEFAULT_ECMP_RESOURCE_PERCENTAGE, DEFAULT_UCMP_WIDTH, SCALED_WEIGHTED_MEMBER_FACTOR,
};
