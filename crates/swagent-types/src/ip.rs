//! IP address and prefix types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family marker.
///
/// Neighbor tables and neighbor counters exist once per family; code paths
/// that touch them take an `AddressFamily` instead of being duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    /// Maximum prefix length for this family.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }

    /// Name of the neighbor resolution protocol for this family.
    pub const fn neighbor_protocol(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "arp",
            AddressFamily::V6 => "ndp",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const UNSPECIFIED: Self = Ipv4Address(Ipv4Addr::UNSPECIFIED);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn inner(&self) -> Ipv4Addr {
        self.0
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    fn masked(&self, prefix_len: u8) -> Self {
        let bits = u32::from(self.0);
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        };
        Ipv4Address(Ipv4Addr::from(bits & mask))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const UNSPECIFIED: Self = Ipv6Address(Ipv6Addr::UNSPECIFIED);

    pub const fn inner(&self) -> Ipv6Addr {
        self.0
    }

    pub const fn segments(&self) -> [u16; 8] {
        self.0.segments()
    }

    /// Returns true if this is a link-local address (fe80::/10).
    pub fn is_link_local(&self) -> bool {
        (self.segments()[0] & 0xffc0) == 0xfe80
    }

    fn masked(&self, prefix_len: u8) -> Self {
        let bits = u128::from(self.0);
        let mask = if prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - u32::from(prefix_len))
        };
        Ipv6Address(Ipv6Addr::from(bits & mask))
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv6Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>()
            .map(Ipv6Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Ipv6Address(addr)
    }
}

/// An IP address that can be either IPv4 or IPv6.
///
/// Ordering places every IPv4 address before every IPv6 address so that
/// collections keyed by address iterate in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub const fn family(&self) -> AddressFamily {
        match self {
            IpAddress::V4(_) => AddressFamily::V4,
            IpAddress::V6(_) => AddressFamily::V6,
        }
    }

    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Returns the address with all bits past `prefix_len` cleared.
    ///
    /// `prefix_len` is clamped to the family maximum.
    pub fn masked(&self, prefix_len: u8) -> Self {
        let len = prefix_len.min(self.family().max_prefix_len());
        match self {
            IpAddress::V4(addr) => IpAddress::V4(addr.masked(len)),
            IpAddress::V6(addr) => IpAddress::V6(addr.masked(len)),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse::<Ipv6Address>().map(IpAddress::V6)
        } else {
            s.parse::<Ipv4Address>().map(IpAddress::V4)
        }
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(addr: Ipv4Address) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(addr: Ipv6Address) -> Self {
        IpAddress::V6(addr)
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(Ipv4Address(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(Ipv6Address(addr))
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// The stored address is always the network address: host bits are cleared
/// on construction so that two spellings of the same network compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = address.family().max_prefix_len();
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address: address.masked(prefix_len),
            prefix_len,
        })
    }

    /// The prefix covering exactly `address`.
    pub fn host(address: IpAddress) -> Self {
        IpPrefix {
            address,
            prefix_len: address.family().max_prefix_len(),
        }
    }

    /// The prefix of length `prefix_len` that contains `address`.
    ///
    /// Used to probe a prefix table one length at a time.
    pub fn covering(address: IpAddress, prefix_len: u8) -> Self {
        let len = prefix_len.min(address.family().max_prefix_len());
        IpPrefix {
            address: address.masked(len),
            prefix_len: len,
        }
    }

    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn family(&self) -> AddressFamily {
        self.address.family()
    }

    /// Returns true if `addr` falls inside this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        addr.family() == self.family() && addr.masked(self.prefix_len) == self.address
    }

    /// Returns true if this is a host route (/32 for IPv4, /128 for IPv6).
    pub const fn is_host_route(&self) -> bool {
        self.prefix_len == self.address.family().max_prefix_len()
    }

    /// Returns true if this is the default route (0.0.0.0/0 or ::/0).
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddress = addr_str.parse()?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_family() {
        let v4: IpAddress = "10.0.0.1".parse().unwrap();
        let v6: IpAddress = "2001:db8::1".parse().unwrap();
        assert_eq!(v4.family(), AddressFamily::V4);
        assert_eq!(v6.family(), AddressFamily::V6);
        assert!(v4 < v6);
    }

    #[test]
    fn test_prefix_clears_host_bits() {
        let prefix: IpPrefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.1.0.0/16");
        assert_eq!(prefix, "10.1.0.0/16".parse::<IpPrefix>().unwrap());
    }

    #[test]
    fn test_prefix_contains() {
        let prefix: IpPrefix = "123.0.0.0/24".parse().unwrap();
        assert!(prefix.contains(&"123.0.0.77".parse().unwrap()));
        assert!(!prefix.contains(&"123.0.1.1".parse().unwrap()));
        assert!(!prefix.contains(&"::1".parse().unwrap()));

        let default: IpPrefix = "0.0.0.0/0".parse().unwrap();
        assert!(default.contains(&"8.8.8.8".parse().unwrap()));
        assert!(default.is_default());
    }

    #[test]
    fn test_v6_prefix_contains() {
        let prefix: IpPrefix = "2401:db00::/32".parse().unwrap();
        assert!(prefix.contains(&"2401:db00::1".parse().unwrap()));
        assert!(!prefix.contains(&"2401:db01::1".parse().unwrap()));
    }

    #[test]
    fn test_covering() {
        let addr: IpAddress = "10.1.2.3".parse().unwrap();
        assert_eq!(IpPrefix::covering(addr, 24).to_string(), "10.1.2.0/24");
        assert_eq!(IpPrefix::covering(addr, 0).to_string(), "0.0.0.0/0");
        assert!(IpPrefix::host(addr).is_host_route());
    }

    #[test]
    fn test_invalid_prefix_length() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_prefix_serde_as_string() {
        let prefix: IpPrefix = "192.168.0.0/16".parse().unwrap();
        let json = serde_json::to_string(&prefix).unwrap();
        assert_eq!(json, "\"192.168.0.0/16\"");
        let back: IpPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prefix);
    }
}
