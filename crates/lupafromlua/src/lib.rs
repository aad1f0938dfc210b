//! Lua extension module that embeds Python
//!
//! `require("lupafromlua")` starts an embedded Python interpreter, checks that
//! the installed `lupa` was built for the host's Lua version, and publishes a
//! `lupa.LuaRuntime` wrapping the running Lua state as `__main__.lua`. The same
//! object is returned to Lua.
//!
//! The interpreter is finalized, and the dynamically linked libpython
//! released, when Lua collects the registration token stored in its registry.

pub mod capsule;
pub mod entrypoint;
pub mod errors;
pub mod initializer;
pub mod linker;
pub mod lua_host;
pub mod python_runtime;
pub mod registration;
pub mod release;
pub mod runtime;
pub mod version;

pub use errors::{BridgeError, InitFailure};
pub use initializer::{BridgeHandle, BridgeOptions, Initializer};
pub use registration::{RegistrationToken, REGISTRY_KEY};
