//! The Lua state that loaded the module, seen through mlua

use crate::capsule::ForeignState;
use crate::errors::BridgeError;
use crate::registration::RegistrationToken;
use crate::runtime::HostRuntime;
use mlua::{ffi, Lua, UserData, Value};
use std::ffi::c_void;

/// Stack levels searched for a Lua frame when locating the caller
const MAX_LOCATION_DEPTH: usize = 8;

// Lua's collector drops the userdata, which drops the token and runs teardown.
impl UserData for RegistrationToken {}

pub struct LuaHost<'lua> {
    lua: &'lua Lua,
}

impl<'lua> LuaHost<'lua> {
    pub fn new(lua: &'lua Lua) -> Self {
        Self { lua }
    }
}

fn registry_error(key: &str, err: &mlua::Error) -> BridgeError {
    BridgeError::Protocol(format!("registry entry '{}': {}", key, err))
}

impl HostRuntime for LuaHost<'_> {
    /// Asks the core through `lua_version(L)`; in `module` mode that is the
    /// interpreter that loaded us, not the headers we were built against.
    fn version_num(&self) -> Result<i64, BridgeError> {
        let mut version = 0;
        // SAFETY: `lua_version` only reads the global state.
        let read = unsafe {
            self.lua.exec_raw::<()>((), |state| {
                version = host_version(state);
            })
        };
        read.map_err(|e| BridgeError::Protocol(format!("Failed to read the Lua version: {}", e)))?;
        Ok(version)
    }

    fn foreign_state(&self) -> Result<ForeignState, BridgeError> {
        let mut main_state: *mut ffi::lua_State = std::ptr::null_mut();
        // SAFETY: only reads the main thread out of the registry and restores
        // the stack before returning.
        let read = unsafe {
            self.lua.exec_raw::<()>((), |state| {
                main_state = main_thread(state);
            })
        };
        read.map_err(|e| BridgeError::Construction(format!("Failed to read lua_State: {}", e)))?;

        ForeignState::lua_state(main_state.cast::<c_void>())
            .ok_or_else(|| BridgeError::Construction("host returned a null lua_State".to_string()))
    }

    fn is_registered(&self, key: &str) -> Result<bool, BridgeError> {
        let value: Value = self
            .lua
            .named_registry_value(key)
            .map_err(|e| registry_error(key, &e))?;
        Ok(!matches!(value, Value::Nil))
    }

    fn register(&self, key: &str, token: RegistrationToken) -> Result<(), BridgeError> {
        let userdata = self
            .lua
            .create_userdata(token)
            .map_err(|e| registry_error(key, &e))?;
        self.lua
            .set_named_registry_value(key, userdata)
            .map_err(|e| registry_error(key, &e))
    }

    fn unregister(&self, key: &str) -> Result<(), BridgeError> {
        self.lua
            .set_named_registry_value(key, Value::Nil)
            .map_err(|e| registry_error(key, &e))
    }

    fn namespace_is_table(&self) -> Result<bool, BridgeError> {
        // Loaded modules live in `package.loaded`; without it there is no
        // namespace for `require` to hand the bridge back through.
        let package: Value = self
            .lua
            .globals()
            .raw_get("package")
            .map_err(|e| BridgeError::Protocol(format!("Failed to read package: {}", e)))?;
        let Value::Table(package) = package else {
            return Ok(false);
        };
        let loaded: Value = package
            .raw_get("loaded")
            .map_err(|e| BridgeError::Protocol(format!("Failed to read package.loaded: {}", e)))?;
        Ok(matches!(loaded, Value::Table(_)))
    }

    fn location(&self) -> String {
        (1..=MAX_LOCATION_DEPTH)
            .map_while(|level| self.lua.inspect_stack(level))
            .find_map(|frame| {
                let line = frame.curr_line();
                if line <= 0 {
                    return None;
                }
                let source = frame.source();
                let short_src = source.short_src.as_deref().unwrap_or("?");
                Some(format!("{}:{}: ", short_src, line))
            })
            .unwrap_or_default()
    }
}

#[cfg(feature = "lua54")]
#[allow(clippy::cast_possible_truncation)]
unsafe fn host_version(state: *mut ffi::lua_State) -> i64 {
    // SAFETY: `state` is the live state handed to `exec_raw`.
    unsafe { ffi::lua_version(state) as i64 }
}

#[cfg(any(feature = "lua53", feature = "lua52"))]
#[allow(clippy::cast_possible_truncation)]
unsafe fn host_version(state: *mut ffi::lua_State) -> i64 {
    // SAFETY: for a live state this points at the core's version number.
    unsafe { *ffi::lua_version(state) as i64 }
}

// 5.1 has no version query; LuaJIT speaks 5.1.
#[cfg(any(feature = "lua51", feature = "luajit"))]
unsafe fn host_version(_state: *mut ffi::lua_State) -> i64 {
    501
}

/// The state's main thread, so the bridge outlives the coroutine running `require`
#[cfg(not(any(feature = "lua51", feature = "luajit")))]
unsafe fn main_thread(state: *mut ffi::lua_State) -> *mut ffi::lua_State {
    // SAFETY: the registry always holds the main thread at LUA_RIDX_MAINTHREAD.
    unsafe {
        ffi::lua_rawgeti(state, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_MAINTHREAD);
        let main = ffi::lua_tothread(state, -1);
        ffi::lua_pop(state, 1);
        main
    }
}

#[cfg(any(feature = "lua51", feature = "luajit"))]
unsafe fn main_thread(state: *mut ffi::lua_State) -> *mut ffi::lua_State {
    state
}
