//! Network primitives shared by the switch agent state core.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses, ordered V4 before V6
//! - [`IpPrefix`]: CIDR prefixes with containment checks for longest-prefix match
//! - [`AddressFamily`]: runtime marker selecting per-family tables and counters
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`PortId`], [`InterfaceId`], [`SwitchId`], [`AggregatePortId`]: stable entity keys

mod ids;
mod ip;
mod mac;
mod vlan;

pub use ids::{AdminState, AggregatePortId, InterfaceId, PortId, SwitchId};
pub use ip::{AddressFamily, IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use mac::MacAddress;
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),
}
