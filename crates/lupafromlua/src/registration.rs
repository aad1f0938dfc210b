//! Registration token and the teardown it carries
//!
//! The token is the only thing that ever finalizes the interpreter in normal
//! operation: the host keeps it in its registry, and when the host's collector
//! reclaims it, `Drop` runs the teardown. Initialization failures run the same
//! teardown early through the shared [`Teardown`] handle.

use crate::errors::BridgeError;
use crate::linker::DynamicLinker;
use crate::runtime::EmbeddedRuntime;
use lupafromlua_logger as logger;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Registry key the token is stored under
pub const REGISTRY_KEY: &str = "lupafromlua.registration";

/// Behavior attached to a registration token
pub trait Finalizer {
    fn run(&self) -> Result<(), BridgeError>;
}

/// Finalize the interpreter, then unlink the runtime library
pub struct Teardown<E: EmbeddedRuntime, L: DynamicLinker> {
    runtime: Rc<E>,
    linker: L,
    handle: RefCell<Option<L::Handle>>,
    spent: Cell<bool>,
}

impl<E: EmbeddedRuntime, L: DynamicLinker> Teardown<E, L> {
    pub fn new(runtime: Rc<E>, linker: L, handle: L::Handle) -> Self {
        Self {
            runtime,
            linker,
            handle: RefCell::new(Some(handle)),
            spent: Cell::new(false),
        }
    }
}

impl<E: EmbeddedRuntime, L: DynamicLinker> Finalizer for Teardown<E, L> {
    fn run(&self) -> Result<(), BridgeError> {
        // A later load may have started a fresh interpreter; a stale token
        // must not finalize it.
        if self.spent.replace(true) {
            return Ok(());
        }

        if self.runtime.is_initialized() {
            logger::debug("Finalizing Python interpreter");
            self.runtime.finalize();
        }

        let handle = self.handle.borrow_mut().take();
        if let Some(handle) = handle {
            self.linker.unload(handle)?;
        }
        Ok(())
    }
}

/// Host-collectable marker whose collection tears the bridge down
pub struct RegistrationToken {
    finalizer: Rc<dyn Finalizer>,
}

impl RegistrationToken {
    pub fn new(finalizer: Rc<dyn Finalizer>) -> Self {
        Self { finalizer }
    }

    /// Run the attached teardown now; collection later becomes a no-op
    pub fn finalize(&self) -> Result<(), BridgeError> {
        self.finalizer.run()
    }
}

impl Drop for RegistrationToken {
    fn drop(&mut self) {
        // Collection callbacks cannot raise into the host.
        if let Err(e) = self.finalizer.run() {
            logger::error(&format!("Bridge teardown failed during collection: {}", e));
        }
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken").finish_non_exhaustive()
    }
}
