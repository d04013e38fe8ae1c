//! Versioned switch state tree and structural delta engine.
//!
//! # Architecture
//!
//! ```text
//!   Arc<SwitchState> (version N)          Arc<SwitchState> (version N+1)
//!     ├─ ports      ─────────shared──────────┤ ports
//!     ├─ vlans ──┐                           ├─ vlans (new spine)
//!     │          ├─ vlan 10 ──shared─────────┤   ├─ vlan 10
//!     │          └─ vlan 20                  │   └─ vlan 20' (edited copy)
//!     └─ routes  ─────────shared─────────────┘ routes
//!
//!                 StateDelta::new(N, N+1)
//!                        │ merge walk per collection
//!                        ↓
//!          Added / Removed / Changed records in key order
//! ```
//!
//! - [`NodeMap`]: copy-on-write keyed collection, one per tree level
//! - [`MapDelta`]: linear-time diff of two versions of one collection
//! - [`StateDelta`]: per-collection deltas between two roots, including the
//!   neighbor and MAC tables nested inside VLANs

mod delta;
mod error;
mod flow;
mod interface;
mod neighbor;
mod node_map;
mod port;
mod route;
mod state_delta;
mod switch_state;
mod vlan;

pub use delta::{CoarseIdentity, DeltaValue, MapDelta, NestedDelta};
pub use error::{Result, StateError};
pub use flow::{FlowEntry, Mirror, RedirectNextHop, RedirectToNextHop};
pub use interface::Interface;
pub use neighbor::{MacEntry, MacTable, NeighborEntry, NeighborPort, NeighborState, NeighborTable};
pub use node_map::{Node, NodeMap};
pub use port::{validate_lookup_classes, LookupClass, Port};
pub use route::{NextHop, NextHopSet, Route, RouteAction, RouteNextHopEntry};
pub use state_delta::StateDelta;
pub use switch_state::SwitchState;
pub use vlan::Vlan;
