//! Lua version negotiation between the host and the bridge library

use crate::errors::BridgeError;
use std::fmt;

/// A Lua `(major, minor)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionDescriptor {
    pub major: i32,
    pub minor: i32,
}

impl VersionDescriptor {
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// Decompose a `lua_version`-style number such as `504`
    pub fn from_host(version_num: i64) -> Result<Self, BridgeError> {
        Ok(Self {
            major: narrow(version_num / 100, "host major version")?,
            minor: narrow(version_num % 100, "host minor version")?,
        })
    }

    /// Build from the leading items of the bridge library's version sequence
    pub fn from_declared(items: &[i64]) -> Result<Self, BridgeError> {
        match items {
            [major, minor, ..] => Ok(Self {
                major: narrow(*major, "declared major version")?,
                minor: narrow(*minor, "declared minor version")?,
            }),
            _ => Err(BridgeError::Type(format!(
                "version must have at least 2 items, found {}",
                items.len()
            ))),
        }
    }
}

impl fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn narrow(value: i64, what: &str) -> Result<i32, BridgeError> {
    i32::try_from(value)
        .map_err(|_| BridgeError::Conversion(format!("{} {} does not fit a C int", what, value)))
}
