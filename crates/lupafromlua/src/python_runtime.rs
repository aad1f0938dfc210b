//! The embedded CPython interpreter, driven through pyo3
//!
//! The interpreter is started and finalized with the raw C API because the
//! host, not pyo3, owns its lifetime: signal handlers must stay off and
//! finalization happens when Lua collects the registration token.
//! Every other call goes through `Python::attach`.

use crate::capsule::ForeignState;
use crate::errors::BridgeError;
use crate::runtime::EmbeddedRuntime;
use lupafromlua_logger as logger;
use pyo3::exceptions::PyOverflowError;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule, PyTuple};

const MAIN_MODULE: &str = "__main__";

/// The process-wide CPython interpreter
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonRuntime;

impl PythonRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn construction(what: &str, err: &PyErr) -> BridgeError {
    BridgeError::Construction(format!("{}: {}", what, err))
}

impl EmbeddedRuntime for PythonRuntime {
    type Object = Py<PyAny>;

    fn start(&self) {
        // SAFETY: called once per registration, on the host thread, before any
        // other Python API use. 0 leaves signal handling to the host.
        unsafe { ffi::Py_InitializeEx(0) };
    }

    fn is_initialized(&self) -> bool {
        // SAFETY: may be called at any time, even before initialization.
        unsafe { ffi::Py_IsInitialized() != 0 }
    }

    fn finalize(&self) {
        // SAFETY: the host thread still holds the GIL it acquired in `start`,
        // and no `Python::attach` scope is active here.
        let status = unsafe { ffi::Py_FinalizeEx() };
        if status < 0 {
            logger::warn("Python reported errors while flushing buffered data at finalization");
        }
    }

    fn set_program_name(&self, name: &str) -> Result<(), BridgeError> {
        Python::attach(|py| {
            let sys = PyModule::import(py, "sys")
                .map_err(|e| BridgeError::Init(format!("Failed to import sys module: {}", e)))?;
            let argv = PyList::new(py, [name])
                .map_err(|e| BridgeError::Init(format!("Failed to build sys.argv: {}", e)))?;
            sys.setattr("argv", argv)
                .map_err(|e| BridgeError::Init(format!("Failed to set sys.argv: {}", e)))?;
            Ok(())
        })
    }

    fn import(&self, module: &str) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| {
            PyModule::import(py, module)
                .map(|m| m.into_any().unbind())
                .map_err(|e| BridgeError::Import {
                    module: module.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn getattr(&self, object: &Self::Object, name: &str) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| {
            object
                .bind(py)
                .getattr(name)
                .map(Bound::unbind)
                .map_err(|e| BridgeError::Attribute {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn int_prefix(&self, sequence: &Self::Object, count: usize) -> Result<Vec<i64>, BridgeError> {
        Python::attach(|py| {
            let sequence = sequence.bind(py);
            let len = sequence
                .len()
                .map_err(|e| BridgeError::Type(format!("expected a sequence: {}", e)))?;
            if len < count {
                return Err(BridgeError::Type(format!(
                    "expected at least {} items, found {}",
                    count, len
                )));
            }

            (0..count)
                .map(|index| {
                    let item = sequence
                        .get_item(index)
                        .map_err(|e| BridgeError::Type(format!("item {}: {}", index, e)))?;
                    item.extract::<i64>().map_err(|e| {
                        if e.is_instance_of::<PyOverflowError>(py) {
                            BridgeError::Conversion(format!("item {}: {}", index, e))
                        } else {
                            BridgeError::Type(format!("item {} is not an integer: {}", index, e))
                        }
                    })
                })
                .collect()
        })
    }

    fn capsule(&self, state: &ForeignState) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| {
            // SAFETY: the tag is 'static and no destructor is attached; the
            // capsule never owns the state it points at.
            let capsule = unsafe {
                let raw = ffi::PyCapsule_New(state.as_ptr(), state.tag().as_ptr(), None);
                Bound::from_owned_ptr_or_err(py, raw)
            };
            capsule
                .map(Bound::unbind)
                .map_err(|e| construction("Failed to create lua_State capsule", &e))
        })
    }

    fn empty_args(&self) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| Ok(PyTuple::empty(py).into_any().unbind()))
    }

    fn kwargs(&self, key: &str, value: &Self::Object) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| {
            let kwargs = PyDict::new(py);
            kwargs
                .set_item(key, value.bind(py))
                .map_err(|e| construction("Failed to build keyword arguments", &e))?;
            Ok(kwargs.into_any().unbind())
        })
    }

    fn call(
        &self,
        callable: &Self::Object,
        args: &Self::Object,
        kwargs: &Self::Object,
    ) -> Result<Self::Object, BridgeError> {
        Python::attach(|py| {
            // SAFETY: all three pointers are live owned references for the
            // duration of the call; the result is a new reference or NULL.
            let instance = unsafe {
                let raw = ffi::PyObject_Call(callable.as_ptr(), args.as_ptr(), kwargs.as_ptr());
                Bound::from_owned_ptr_or_err(py, raw)
            };
            instance
                .map(Bound::unbind)
                .map_err(|e| construction("LuaRuntime(state=...) raised", &e))
        })
    }

    fn global(&self, name: &str) -> Result<Option<Self::Object>, BridgeError> {
        Python::attach(|py| {
            let main = PyModule::import(py, MAIN_MODULE).map_err(|e| BridgeError::Import {
                module: MAIN_MODULE.to_string(),
                reason: e.to_string(),
            })?;
            let present = main.hasattr(name).map_err(|e| BridgeError::Attribute {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            if !present {
                return Ok(None);
            }
            main.getattr(name)
                .map(|value| Some(value.unbind()))
                .map_err(|e| BridgeError::Attribute {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn set_global(&self, name: &str, value: &Self::Object) -> Result<(), BridgeError> {
        Python::attach(|py| {
            let main = PyModule::import(py, MAIN_MODULE).map_err(|e| BridgeError::Import {
                module: MAIN_MODULE.to_string(),
                reason: e.to_string(),
            })?;
            main.setattr(name, value.bind(py))
                .map_err(|e| construction(&format!("Failed to set __main__.{}", name), &e))
        })
    }

    fn release(&self, object: Self::Object) {
        Python::attach(|_py| drop(object));
    }
}
