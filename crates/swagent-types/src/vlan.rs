//! VLAN ID type with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// VLAN 0 (priority tagged frames) and 4095 are reserved.
///
/// # Examples
///
/// ```
/// use swagent_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Lowest usable VLAN ID.
    pub const MIN: u16 = 1;
    /// Highest usable VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a VLAN ID, validating the range.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4094).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Returns the raw VLAN ID.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses a bare number or the `Vlan<id>` interface name.
impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the "Vlan100" interface spelling as well as bare numbers.
        let id_str = match s.get(..4) {
            Some(head) if head.eq_ignore_ascii_case("vlan") => &s[4..],
            _ => s,
        };

        let id: u16 = id_str.parse().map_err(|_| ParseError::InvalidVlanId(0))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bounds() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
    }

    #[test]
    fn test_parse_vlan_prefix() {
        assert_eq!("Vlan100".parse::<VlanId>().unwrap().as_u16(), 100);
        assert_eq!("VLAN200".parse::<VlanId>().unwrap().as_u16(), 200);
        assert_eq!("300".parse::<VlanId>().unwrap().as_u16(), 300);
    }

    #[test]
    fn test_serde_rejects_out_of_range() {
        assert!(serde_json::from_str::<VlanId>("5000").is_err());
        assert_eq!(serde_json::from_str::<VlanId>("5").unwrap().as_u16(), 5);
    }
}
