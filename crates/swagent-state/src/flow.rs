//! Flow entries and mirror sessions.

use serde::{Deserialize, Serialize};
use swagent_types::{InterfaceId, IpAddress, PortId};

use crate::node_map::Node;
use crate::route::NextHopSet;

/// A configured redirect target, optionally pinned to one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RedirectNextHop {
    pub ip: IpAddress,
    #[serde(default)]
    pub interface_id: Option<InterfaceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RedirectToNextHop {
    pub next_hops: Vec<RedirectNextHop>,
    /// Union of forwarding next hops the configured targets resolve to.
    #[serde(default)]
    pub resolved: NextHopSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub redirect: Option<RedirectToNextHop>,
    /// Entries redirecting to next hops stay disabled until at least one
    /// target resolves.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FlowEntry {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            redirect: None,
            enabled: true,
        }
    }

    /// Adds a redirect action; the entry starts disabled and unresolved.
    pub fn with_redirect(mut self, next_hops: Vec<RedirectNextHop>) -> Self {
        self.redirect = Some(RedirectToNextHop {
            next_hops,
            resolved: NextHopSet::new(),
        });
        self.enabled = false;
        self
    }
}

impl Node for FlowEntry {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    #[serde(default)]
    pub egress_port: Option<PortId>,
    #[serde(default)]
    pub destination: Option<IpAddress>,
}

impl Mirror {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            egress_port: None,
            destination: None,
        }
    }
}

impl Node for Mirror {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}
