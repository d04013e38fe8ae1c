//! Stable entity identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(id: $inner) -> Self {
                $name(id)
            }

            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                $name(id)
            }
        }
    };
}

id_newtype!(
    /// Physical port identifier.
    PortId(u32),
    "port"
);
id_newtype!(
    /// Aggregate (LAG) port identifier.
    AggregatePortId(u32),
    "aggport"
);
id_newtype!(
    /// Router interface identifier.
    InterfaceId(u32),
    "intf"
);
id_newtype!(
    /// Identifier of one switching ASIC managed by the agent.
    SwitchId(u16),
    "switch"
);

/// Administrative state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Up,
    #[default]
    Down,
}

impl AdminState {
    pub const fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
        }
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(AdminState::Up),
            "down" => Ok(AdminState::Down),
            _ => Err(ParseError::InvalidAdminState(s.to_string())),
        }
    }
}
