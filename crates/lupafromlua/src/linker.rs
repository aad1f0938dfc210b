//! Dynamic Python library loading
//!
//! A Lua host never links against libpython, so on Unix the runtime library is
//! dlopened before the interpreter starts. It must be opened with
//! `RTLD_GLOBAL`: Python's own extension modules (and lupa's) expect to
//! resolve `Py*` symbols from the global namespace. Other platforms link the
//! runtime at build time and use a no-op linker.

use crate::errors::BridgeError;
use lupafromlua_logger as logger;

/// Runtime library name configured at build time
#[cfg(unix)]
pub const PYTHON_LIBRT: &str = env!("LUPAFROMLUA_PYTHON_LIBRT");

/// Platform hook for linking and unlinking the embedded runtime
pub trait DynamicLinker {
    type Handle;

    fn load(&self) -> Result<Self::Handle, BridgeError>;

    fn unload(&self, handle: Self::Handle) -> Result<(), BridgeError>;
}

/// The platform's dynamic loader
#[derive(Debug, Clone)]
pub struct SystemLinker {
    library: String,
}

impl SystemLinker {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }
}

#[cfg(unix)]
impl DynamicLinker for SystemLinker {
    type Handle = libloading::os::unix::Library;

    fn load(&self) -> Result<Self::Handle, BridgeError> {
        use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};

        logger::debug(&format!("Loading Python shared library: {}", self.library));

        // SAFETY: libpython's initializers only register its own symbols.
        let library = unsafe { Library::open(Some(&self.library), RTLD_NOW | RTLD_GLOBAL) }
            .map_err(|e| BridgeError::Link {
                library: self.library.clone(),
                reason: e.to_string(),
            })?;

        logger::debug("Python library loaded with RTLD_GLOBAL");
        Ok(library)
    }

    fn unload(&self, handle: Self::Handle) -> Result<(), BridgeError> {
        handle.close().map_err(|e| BridgeError::Unlink {
            library: self.library.clone(),
            reason: e.to_string(),
        })?;
        logger::debug(&format!("Unloaded Python shared library: {}", self.library));
        Ok(())
    }
}

#[cfg(not(unix))]
impl DynamicLinker for SystemLinker {
    type Handle = ();

    fn load(&self) -> Result<Self::Handle, BridgeError> {
        Ok(())
    }

    fn unload(&self, _handle: Self::Handle) -> Result<(), BridgeError> {
        Ok(())
    }
}
