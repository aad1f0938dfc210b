//! Seams between the initializer and the two runtimes it coordinates
//!
//! The initializer only ever talks to these traits. `lua_host` and
//! `python_runtime` provide the real implementations; tests substitute
//! journaling stubs.

use crate::capsule::ForeignState;
use crate::errors::BridgeError;
use crate::registration::RegistrationToken;

/// The Lua side: the context that loaded the module
pub trait HostRuntime {
    /// The running host's Lua version as `major * 100 + minor`
    fn version_num(&self) -> Result<i64, BridgeError>;

    /// Raw state handed across the boundary
    fn foreign_state(&self) -> Result<ForeignState, BridgeError>;

    fn is_registered(&self, key: &str) -> Result<bool, BridgeError>;

    /// Store `token` under `key`; the host runs its teardown when it collects it
    fn register(&self, key: &str, token: RegistrationToken) -> Result<(), BridgeError>;

    /// Drop the host's reference to the token under `key`
    fn unregister(&self, key: &str) -> Result<(), BridgeError>;

    /// Whether the module namespace the bridge is loaded into is a table
    fn namespace_is_table(&self) -> Result<bool, BridgeError>;

    /// `luaL_where`-style location of the Lua caller
    fn location(&self) -> String;
}

/// The embedded Python interpreter
///
/// `Object` is an owned reference. Handing it to [`EmbeddedRuntime::release`]
/// gives the reference back; the initializer never lets one go out of scope
/// any other way.
pub trait EmbeddedRuntime {
    type Object;

    /// Start the interpreter without installing signal handlers
    fn start(&self);

    fn is_initialized(&self) -> bool;

    /// Finalize the interpreter, reclaiming every object still alive in it
    fn finalize(&self);

    /// Set `sys.argv` to a single placeholder program name
    fn set_program_name(&self, name: &str) -> Result<(), BridgeError>;

    fn import(&self, module: &str) -> Result<Self::Object, BridgeError>;

    fn getattr(&self, object: &Self::Object, name: &str) -> Result<Self::Object, BridgeError>;

    /// Read the first `count` items of a sequence as integers
    fn int_prefix(&self, sequence: &Self::Object, count: usize) -> Result<Vec<i64>, BridgeError>;

    fn capsule(&self, state: &ForeignState) -> Result<Self::Object, BridgeError>;

    fn empty_args(&self) -> Result<Self::Object, BridgeError>;

    /// Build the keyword mapping `{key: value}`
    fn kwargs(&self, key: &str, value: &Self::Object) -> Result<Self::Object, BridgeError>;

    fn call(
        &self,
        callable: &Self::Object,
        args: &Self::Object,
        kwargs: &Self::Object,
    ) -> Result<Self::Object, BridgeError>;

    /// Look up `name` in `__main__`
    fn global(&self, name: &str) -> Result<Option<Self::Object>, BridgeError>;

    /// Bind `name` in `__main__`
    fn set_global(&self, name: &str, value: &Self::Object) -> Result<(), BridgeError>;

    fn release(&self, object: Self::Object);
}
