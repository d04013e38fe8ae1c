//! Keeps resolved next hops alive by probing them.
//!
//! ```text
//!   update service ──delta──> ResolvedNexthopMonitor
//!                                  │ ProbeCommand (mpsc)
//!                                  ↓
//!                     ResolvedNexthopProbeScheduler (own task)
//!                                  │ due probes, with backoff
//!                                  ↓
//!                           NeighborProber ──> StateUpdater
//! ```
//!
//! The monitor runs inside dispatch and only forwards; timing lives in the
//! scheduler task so dispatch never waits on it.

mod monitor;
mod prober;
mod scheduler;

pub use monitor::{ProbeCommand, ResolvedNexthopMonitor};
pub use prober::PendingEntryProber;
pub use scheduler::{NeighborProber, ResolvedNexthopProbe, ResolvedNexthopProbeScheduler};
