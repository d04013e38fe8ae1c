//! Route entities and next-hop sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use swagent_types::{InterfaceId, IpAddress, IpPrefix};

use crate::node_map::Node;

/// A next hop; resolved when the egress interface is known.
///
/// A weight of zero removes the next hop from forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NextHop {
    pub addr: IpAddress,
    #[serde(default)]
    pub interface_id: Option<InterfaceId>,
    #[serde(default = "default_weight")]
    pub weight: u64,
}

fn default_weight() -> u64 {
    1
}

impl NextHop {
    pub fn unresolved(addr: IpAddress, weight: u64) -> Self {
        Self {
            addr,
            interface_id: None,
            weight,
        }
    }

    pub fn resolved(addr: IpAddress, interface_id: InterfaceId, weight: u64) -> Self {
        Self {
            addr,
            interface_id: Some(interface_id),
            weight,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.interface_id.is_some()
    }

    /// The same next hop with the weight stripped.
    pub fn without_weight(&self) -> Self {
        Self { weight: 0, ..*self }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interface_id {
            Some(intf) => write!(f, "{}@{}x{}", self.addr, intf, self.weight),
            None => write!(f, "{}x{}", self.addr, self.weight),
        }
    }
}

pub type NextHopSet = BTreeSet<NextHop>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    #[default]
    Drop,
    ToCpu,
    NextHops,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteNextHopEntry {
    pub action: RouteAction,
    #[serde(default)]
    pub next_hops: NextHopSet,
}

impl RouteNextHopEntry {
    pub fn drop_traffic() -> Self {
        Self::default()
    }

    pub fn to_cpu() -> Self {
        Self {
            action: RouteAction::ToCpu,
            next_hops: NextHopSet::new(),
        }
    }

    pub fn next_hops(next_hops: impl IntoIterator<Item = NextHop>) -> Self {
        Self {
            action: RouteAction::NextHops,
            next_hops: next_hops.into_iter().collect(),
        }
    }

    /// Next hops as programmed, after weight normalization.
    ///
    /// Zero weights are dropped. Equal weights collapse to unit weight,
    /// unequal weights are reduced by their gcd. When the total weight
    /// exceeds `ucmp_width` the weights are scaled down proportionally and
    /// any next hop whose scaled weight reaches zero is dropped as well.
    /// Scaling is exact for any `u64` weights.
    pub fn normalized_next_hops(&self, ucmp_width: u64) -> NextHopSet {
        if self.action != RouteAction::NextHops {
            return NextHopSet::new();
        }
        let mut hops: Vec<NextHop> = self
            .next_hops
            .iter()
            .filter(|nh| nh.weight > 0)
            .copied()
            .collect();
        reduce_weights(&mut hops);

        let total: u128 = hops.iter().map(|nh| u128::from(nh.weight)).sum();
        let width = u128::from(ucmp_width);
        if width > 0 && total > width {
            for nh in hops.iter_mut() {
                // Below `ucmp_width`, so it fits back into u64.
                nh.weight = (u128::from(nh.weight) * width / total) as u64;
            }
            hops.retain(|nh| nh.weight > 0);
            reduce_weights(&mut hops);
        }

        hops.into_iter().collect()
    }
}

fn reduce_weights(hops: &mut [NextHop]) {
    let Some(first) = hops.first().map(|nh| nh.weight) else {
        return;
    };
    if hops.iter().all(|nh| nh.weight == first) {
        hops.iter_mut().for_each(|nh| nh.weight = 1);
        return;
    }
    let divisor = hops.iter().fold(0, |acc, nh| gcd(acc, nh.weight));
    if divisor > 1 {
        hops.iter_mut().for_each(|nh| nh.weight /= divisor);
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: IpPrefix,
    /// Forwarding intent as configured.
    pub entry: RouteNextHopEntry,
    /// Forwarding decision after resolution; `None` while unresolved.
    #[serde(default)]
    pub forward: Option<RouteNextHopEntry>,
}

impl Route {
    pub fn unresolved(prefix: IpPrefix, entry: RouteNextHopEntry) -> Self {
        Self {
            prefix,
            entry,
            forward: None,
        }
    }

    pub fn resolved(prefix: IpPrefix, forward: RouteNextHopEntry) -> Self {
        Self {
            prefix,
            entry: forward.clone(),
            forward: Some(forward),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.forward.is_some()
    }

    /// Forwarding next hops of a resolved route with a next-hop action.
    pub fn resolved_next_hops(&self) -> Option<&NextHopSet> {
        self.forward
            .as_ref()
            .filter(|fwd| fwd.action == RouteAction::NextHops)
            .map(|fwd| &fwd.next_hops)
    }
}

impl Node for Route {
    type Key = IpPrefix;

    fn key(&self) -> IpPrefix {
        self.prefix
    }
}
