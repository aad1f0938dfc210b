use crate::version::VersionDescriptor;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while bootstrapping or tearing down the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Could not load Python runtime library '{library}': {reason}")]
    Link { library: String, reason: String },

    #[error("Could not initialize Python: {0}")]
    Init(String),

    #[error("Could not import '{module}': {reason}")]
    Import { module: String, reason: String },

    #[error("Missing attribute '{name}': {reason}")]
    Attribute { name: String, reason: String },

    #[error("Unexpected value: {0}")]
    Type(String),

    #[error("Integer conversion failed: {0}")]
    Conversion(String),

    #[error("'{module}' was built for Lua {declared}, but the host runs Lua {host}")]
    VersionMismatch {
        module: String,
        declared: VersionDescriptor,
        host: VersionDescriptor,
    },

    #[error("Could not construct the Lua runtime bridge: {0}")]
    Construction(String),

    #[error("Host protocol violation: {0}")]
    Protocol(String),

    #[error("Could not unload Python runtime library '{library}': {reason}")]
    Unlink { library: String, reason: String },
}

/// A failed load, as raised back to the Lua caller
///
/// `location` follows `luaL_where`: `"chunk:line: "` for a Lua caller and an
/// empty string when the nearest frame is native.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    pub error: BridgeError,
    pub location: String,
}

impl fmt::Display for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.location, self.error)
    }
}

impl std::error::Error for InitFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
