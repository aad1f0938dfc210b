//! `require("lupafromlua")`
//!
//! Wires the real runtimes into the initializer and converts its outcome into
//! something Lua understands: the bridge as userdata, or a raised error.

use crate::initializer::{BridgeOptions, Initializer};
use crate::linker::SystemLinker;
use crate::lua_host::LuaHost;
use crate::python_runtime::PythonRuntime;
use crate::runtime::EmbeddedRuntime;
use lupafromlua_config::Config;
use lupafromlua_logger as logger;
use mlua::{AnyUserData, Lua, MetaMethod, UserData, UserDataMethods};
use once_cell::sync::OnceCell;
use pyo3::prelude::*;
use std::rc::Rc;

static CONFIG: OnceCell<Config> = OnceCell::new();

/// Configuration for this process, read on first load
fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::load().unwrap_or_else(|e| {
            logger::warn(&format!("Ignoring unreadable configuration: {}", e));
            Config::default()
        })
    })
}

#[cfg(unix)]
fn python_library(config: &Config) -> String {
    config
        .get_python_library(crate::linker::PYTHON_LIBRT)
        .to_string()
}

#[cfg(not(unix))]
fn python_library(config: &Config) -> String {
    config.get_python_library("").to_string()
}

/// Lua-side handle on `lupa.LuaRuntime`
pub struct LuaBridge {
    instance: Option<Py<PyAny>>,
}

impl LuaBridge {
    pub fn new(instance: Py<PyAny>) -> Self {
        Self {
            instance: Some(instance),
        }
    }

    fn describe(&self) -> String {
        let Some(instance) = self.instance.as_ref() else {
            return "<lupafromlua bridge (released)>".to_string();
        };
        if !PythonRuntime.is_initialized() {
            return "<lupafromlua bridge (Python finalized)>".to_string();
        }
        Python::attach(|py| {
            instance
                .bind(py)
                .repr()
                .map(|repr| repr.to_string())
                .unwrap_or_else(|e| format!("<lupafromlua bridge (repr failed: {})>", e))
        })
    }
}

impl UserData for LuaBridge {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.describe()));
    }
}

impl Drop for LuaBridge {
    fn drop(&mut self) {
        // Once Python is finalized the object is already gone with it.
        if let Some(instance) = self.instance.take() {
            if PythonRuntime.is_initialized() {
                PythonRuntime.release(instance);
            } else {
                std::mem::forget(instance);
            }
        }
    }
}

/// Body of `luaopen_lupafromlua`
pub fn open(lua: &Lua) -> mlua::Result<AnyUserData> {
    open_with(lua, BridgeOptions::from_config(config()))
}

/// Load the bridge under explicit names instead of the configured ones
///
/// A failure is raised as the [`InitFailure`](crate::errors::InitFailure)
/// itself, so its text on the Lua side starts with the caller's location like
/// any `error("...")`.
pub fn open_with(lua: &Lua, options: BridgeOptions) -> mlua::Result<AnyUserData> {
    let config = config();
    if let Err(e) = logger::init_with_verbosity(config.get_verbosity()) {
        logger::warn(&format!("Log file unavailable: {}", e));
    }

    let host = LuaHost::new(lua);
    let initializer = Initializer::new(
        &host,
        Rc::new(PythonRuntime::new()),
        SystemLinker::new(python_library(config)),
        options,
    );

    match initializer.initialize() {
        Ok(handle) => lua.create_userdata(LuaBridge::new(handle.into_instance())),
        Err(failure) => Err(mlua::Error::external(failure)),
    }
}

#[cfg(feature = "module")]
#[mlua::lua_module]
fn lupafromlua(lua: &Lua) -> mlua::Result<AnyUserData> {
    open(lua)
}
