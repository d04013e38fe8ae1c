//! Lookup class balancing.
//!
//! Hosts behind a port configured with lookup classes are spread across
//! those classes so that each class maps to its own egress queue.
//!
//! ```text
//!   port eth1/1/1  classes [QueuePerHost0, QueuePerHost1, QueuePerHost2]
//!
//!   10.0.0.1 / 02:..:01 ──> QueuePerHost0
//!   10.0.0.2 / 02:..:02 ──> QueuePerHost1
//!   2401::1  / 02:..:01 ──> QueuePerHost0   (same MAC, same class)
//!   10.0.0.3 / 02:..:03 ──> QueuePerHost2
//! ```

mod updater;

pub use updater::LookupClassUpdater;
