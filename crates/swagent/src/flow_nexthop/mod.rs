//! Resolution of flow-entry redirect targets against the route table.

mod resolver;

pub use resolver::{resolve_redirect, FlowNexthopResolver};
