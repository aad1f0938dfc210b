//! Bridge initialization
//!
//! One load of the module runs [`Initializer::initialize`]:
//! 1. Check the host registry for an existing registration token
//! 2. If absent, link the Python runtime and register a token carrying teardown
//! 3. Start the interpreter (no signal handlers) and set `sys.argv`
//! 4. Import the bridge library and compare its Lua version with the host's
//! 5. Construct `LuaRuntime(state=<capsule>)`
//! 6. Publish it as a global in `__main__` and return it to the host
//!
//! Any failure after step 2 finalizes the interpreter, unlinks the library and
//! removes the token before the error reaches the host, so a later load starts
//! from scratch. A load that finds a token skips straight to step 5.

use crate::errors::{BridgeError, InitFailure};
use crate::linker::DynamicLinker;
use crate::registration::{Finalizer, RegistrationToken, Teardown, REGISTRY_KEY};
use crate::release::{ReleaseScope, Slot};
use crate::runtime::{EmbeddedRuntime, HostRuntime};
use crate::version::VersionDescriptor;
use lupafromlua_config::Config;
use lupafromlua_logger as logger;
use std::panic::Location;
use std::rc::Rc;
use std::time::Instant;

/// Attribute of the bridge library holding its Lua version sequence
pub const VERSION_ATTRIBUTE: &str = "LUA_VERSION";
/// Attribute of the bridge library naming the runtime class
pub const RUNTIME_CLASS: &str = "LuaRuntime";
/// Keyword the runtime class takes the state capsule under
pub const STATE_KEYWORD: &str = "state";

/// Names the initializer uses on the embedded side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub bridge_module: String,
    pub global_name: String,
    pub program_name: String,
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bridge_module: config.get_bridge_module().to_string(),
            global_name: config.get_global_name().to_string(),
            program_name: config.get_program_name().to_string(),
        }
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The bridge instance as returned to the host
#[derive(Debug)]
pub struct BridgeHandle<O> {
    instance: O,
}

impl<O> BridgeHandle<O> {
    pub fn instance(&self) -> &O {
        &self.instance
    }

    pub fn into_instance(self) -> O {
        self.instance
    }
}

pub struct Initializer<'h, H, E, L> {
    host: &'h H,
    runtime: Rc<E>,
    linker: L,
    options: BridgeOptions,
}

impl<'h, H, E, L> Initializer<'h, H, E, L>
where
    H: HostRuntime,
    E: EmbeddedRuntime + 'static,
    L: DynamicLinker + Clone + 'static,
    L::Handle: 'static,
{
    pub fn new(host: &'h H, runtime: Rc<E>, linker: L, options: BridgeOptions) -> Self {
        Self {
            host,
            runtime,
            linker,
            options,
        }
    }

    pub fn initialize(self) -> Result<BridgeHandle<E::Object>, InitFailure> {
        let start_time = Instant::now();

        let registered = match self.host.is_registered(REGISTRY_KEY) {
            Ok(registered) => registered,
            Err(e) => return Err(self.fail(None, e)),
        };

        let teardown = if registered {
            logger::debug("Bridge token already registered, skipping interpreter startup");
            None
        } else {
            match self.register() {
                Ok(teardown) => Some(teardown),
                Err(e) => return Err(self.fail(None, e)),
            }
        };

        let result = match teardown {
            Some(_) => self.bootstrap(),
            None => self.reenter(),
        };

        match result {
            Ok(instance) => {
                logger::debug(&format!(
                    "Total bridge initialization took: {:?}",
                    start_time.elapsed()
                ));
                Ok(BridgeHandle { instance })
            }
            Err(error) => {
                let teardown = teardown.map(|t| t as Rc<dyn Finalizer>);
                Err(self.fail(teardown.as_deref(), error))
            }
        }
    }

    /// Check-and-raise: undo whatever this load registered, then build the
    /// error the host will see.
    #[track_caller]
    fn fail(&self, teardown: Option<&dyn Finalizer>, error: BridgeError) -> InitFailure {
        logger::error(&format!(
            "Bridge initialization failed ({}): {}",
            Location::caller(),
            error
        ));

        if let Some(teardown) = teardown {
            if let Err(e) = teardown.run() {
                logger::error(&format!("Cleanup after failed initialization: {}", e));
            }
            if let Err(e) = self.host.unregister(REGISTRY_KEY) {
                logger::error(&format!("Could not remove bridge registration: {}", e));
            }
        }

        InitFailure {
            error,
            location: self.host.location(),
        }
    }

    /// Link the runtime and hand the host a token before anything starts
    fn register(&self) -> Result<Rc<Teardown<E, L>>, BridgeError> {
        let handle = self.linker.load()?;
        let teardown = Rc::new(Teardown::new(
            Rc::clone(&self.runtime),
            self.linker.clone(),
            handle,
        ));
        let finalizer: Rc<dyn Finalizer> = teardown.clone();
        self.host
            .register(REGISTRY_KEY, RegistrationToken::new(finalizer))?;
        logger::debug(&format!("Registered bridge token under '{}'", REGISTRY_KEY));
        Ok(teardown)
    }

    fn bootstrap(&self) -> Result<E::Object, BridgeError> {
        self.start_interpreter()?;

        let runtime = &*self.runtime;
        let mut scope = ReleaseScope::new(runtime);
        let module = scope.hold(self.import_bridge_module()?);

        let version_obj = runtime.getattr(scope.get(module)?, VERSION_ATTRIBUTE)?;
        let version = scope.hold(version_obj);
        self.negotiate_version(scope.get(version)?)?;

        self.construct(&mut scope, module)
    }

    fn reenter(&self) -> Result<E::Object, BridgeError> {
        let runtime = &*self.runtime;
        if !runtime.is_initialized() {
            return Err(BridgeError::Init(
                "bridge is registered but the interpreter is not running".to_string(),
            ));
        }

        if let Some(existing) = runtime.global(&self.options.global_name)? {
            logger::debug(&format!(
                "Reusing published bridge __main__.{}",
                self.options.global_name
            ));
            return Ok(existing);
        }

        let mut scope = ReleaseScope::new(runtime);
        let module = scope.hold(self.import_bridge_module()?);
        self.construct(&mut scope, module)
    }

    fn start_interpreter(&self) -> Result<(), BridgeError> {
        logger::debug("Initializing Python...");
        let python_start = Instant::now();
        self.runtime.start();
        if !self.runtime.is_initialized() {
            return Err(BridgeError::Init(
                "interpreter reports not initialized after startup".to_string(),
            ));
        }
        logger::debug(&format!(
            "Python initialization took: {:?}",
            python_start.elapsed()
        ));

        self.runtime.set_program_name(&self.options.program_name)
    }

    fn import_bridge_module(&self) -> Result<E::Object, BridgeError> {
        logger::debug(&format!("Importing {}", self.options.bridge_module));
        self.runtime.import(&self.options.bridge_module)
    }

    fn negotiate_version(&self, declared_obj: &E::Object) -> Result<(), BridgeError> {
        let items = self.runtime.int_prefix(declared_obj, 2)?;
        let declared = VersionDescriptor::from_declared(&items)?;
        let host = VersionDescriptor::from_host(self.host.version_num()?)?;

        if declared != host {
            return Err(BridgeError::VersionMismatch {
                module: self.options.bridge_module.clone(),
                declared,
                host,
            });
        }

        logger::debug(&format!(
            "{} was built for Lua {}, matching the host",
            self.options.bridge_module, declared
        ));
        Ok(())
    }

    fn construct(
        &self,
        scope: &mut ReleaseScope<'_, E>,
        module: Slot,
    ) -> Result<E::Object, BridgeError> {
        let runtime = &*self.runtime;

        let class_obj = runtime.getattr(scope.get(module)?, RUNTIME_CLASS)?;
        let class = scope.hold(class_obj);

        let state = self.host.foreign_state()?;
        let capsule_obj = runtime.capsule(&state)?;
        let capsule = scope.hold(capsule_obj);

        let args_obj = runtime.empty_args()?;
        let args = scope.hold(args_obj);

        let kwargs_obj = runtime.kwargs(STATE_KEYWORD, scope.get(capsule)?)?;
        let kwargs = scope.hold(kwargs_obj);

        let instance_obj = runtime.call(scope.get(class)?, scope.get(args)?, scope.get(kwargs)?)?;
        let instance = scope.hold(instance_obj);

        self.publish(scope.get(instance)?)?;
        scope.take(instance)
    }

    fn publish(&self, instance: &E::Object) -> Result<(), BridgeError> {
        if !self.host.namespace_is_table()? {
            return Err(BridgeError::Protocol(
                "module namespace on the host is not a table".to_string(),
            ));
        }

        self.runtime
            .set_global(&self.options.global_name, instance)?;
        logger::info(&format!(
            "Published Lua runtime bridge as __main__.{}",
            self.options.global_name
        ));
        Ok(())
    }
}
