//! Journaling stand-ins for the Lua host, the Python interpreter and the
//! dynamic loader. Every observable call is appended to a shared journal so
//! tests can assert on ordering.

use lupafromlua::capsule::ForeignState;
use lupafromlua::linker::DynamicLinker;
use lupafromlua::runtime::{EmbeddedRuntime, HostRuntime};
use lupafromlua::{
    BridgeError, BridgeHandle, BridgeOptions, InitFailure, Initializer, RegistrationToken,
    REGISTRY_KEY,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub const STUB_LIBRARY: &str = "libpython-stub.so";
pub const STUB_LOCATION: &str = "test.lua:7: ";

#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.borrow().iter().position(|e| e == entry)
    }

    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.0.borrow().iter().rposition(|e| e.starts_with(prefix))
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

pub struct StubHost {
    journal: Journal,
    version: i64,
    namespace_table: Cell<bool>,
    registry: RefCell<HashMap<String, RegistrationToken>>,
    state: Cell<u8>,
}

impl StubHost {
    pub fn new(journal: Journal, version: i64) -> Self {
        Self {
            journal,
            version,
            namespace_table: Cell::new(true),
            registry: RefCell::new(HashMap::new()),
            state: Cell::new(0),
        }
    }

    pub fn set_namespace_table(&self, is_table: bool) {
        self.namespace_table.set(is_table);
    }

    pub fn registered_keys(&self) -> Vec<String> {
        self.registry.borrow().keys().cloned().collect()
    }

    /// Invoke the token's teardown without collecting it
    pub fn finalize_token(&self) -> Option<Result<(), BridgeError>> {
        self.registry
            .borrow()
            .get(REGISTRY_KEY)
            .map(RegistrationToken::finalize)
    }

    /// Simulate the host's collector reclaiming every registered token
    pub fn collect(&self) {
        let tokens: Vec<RegistrationToken> =
            self.registry.borrow_mut().drain().map(|(_, t)| t).collect();
        drop(tokens);
    }
}

impl HostRuntime for StubHost {
    fn version_num(&self) -> Result<i64, BridgeError> {
        Ok(self.version)
    }

    fn foreign_state(&self) -> Result<ForeignState, BridgeError> {
        ForeignState::lua_state(self.state.as_ptr().cast())
            .ok_or_else(|| BridgeError::Construction("null state".to_string()))
    }

    fn is_registered(&self, key: &str) -> Result<bool, BridgeError> {
        Ok(self.registry.borrow().contains_key(key))
    }

    fn register(&self, key: &str, token: RegistrationToken) -> Result<(), BridgeError> {
        self.journal.record("register");
        let previous = self.registry.borrow_mut().insert(key.to_string(), token);
        drop(previous);
        Ok(())
    }

    fn unregister(&self, key: &str) -> Result<(), BridgeError> {
        self.journal.record("unregister");
        let token = self.registry.borrow_mut().remove(key);
        drop(token);
        Ok(())
    }

    fn namespace_is_table(&self) -> Result<bool, BridgeError> {
        Ok(self.namespace_table.get())
    }

    fn location(&self) -> String {
        STUB_LOCATION.to_string()
    }
}

/// An owned reference to a stub object; `id` identifies the referent
#[derive(Debug, PartialEq, Eq)]
pub struct StubObject {
    pub id: usize,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Start,
    ProgramName,
    Import,
    VersionAttribute,
    RuntimeClass,
    Capsule,
    Args,
    Kwargs,
    Call,
    Publish,
}

pub struct StubPython {
    journal: Journal,
    initialized: Cell<bool>,
    declared: RefCell<Vec<i64>>,
    fault: Cell<Option<Fault>>,
    next_id: Cell<usize>,
    refcounts: RefCell<HashMap<usize, usize>>,
    globals: RefCell<HashMap<String, (usize, String)>>,
}

impl StubPython {
    pub fn new(journal: Journal, declared: &[i64]) -> Self {
        Self {
            journal,
            initialized: Cell::new(false),
            declared: RefCell::new(declared.to_vec()),
            fault: Cell::new(None),
            next_id: Cell::new(1),
            refcounts: RefCell::new(HashMap::new()),
            globals: RefCell::new(HashMap::new()),
        }
    }

    pub fn declare(&self, declared: &[i64]) {
        *self.declared.borrow_mut() = declared.to_vec();
    }

    pub fn inject(&self, fault: Option<Fault>) {
        self.fault.set(fault);
    }

    pub fn global_id(&self, name: &str) -> Option<usize> {
        self.globals.borrow().get(name).map(|(id, _)| *id)
    }

    pub fn clear_global(&self, name: &str) {
        if let Some((id, _)) = self.globals.borrow_mut().remove(name) {
            self.decref(id);
        }
    }

    pub fn refcount(&self, id: usize) -> usize {
        self.refcounts.borrow().get(&id).copied().unwrap_or(0)
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.fault.get() == Some(fault)
    }

    fn object(&self, label: &str) -> StubObject {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.refcounts.borrow_mut().insert(id, 1);
        StubObject {
            id,
            label: label.to_string(),
        }
    }

    fn incref(&self, id: usize) {
        *self.refcounts.borrow_mut().entry(id).or_insert(0) += 1;
    }

    /// Returns false when the referent had no references left
    fn decref(&self, id: usize) -> bool {
        let mut refcounts = self.refcounts.borrow_mut();
        match refcounts.get_mut(&id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    fn construction(&self, what: &str) -> BridgeError {
        BridgeError::Construction(format!("injected {} failure", what))
    }
}

impl EmbeddedRuntime for StubPython {
    type Object = StubObject;

    fn start(&self) {
        self.journal.record("start");
        if !self.faulted(Fault::Start) {
            self.initialized.set(true);
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    fn finalize(&self) {
        self.journal.record("finalize");
        self.initialized.set(false);
        self.globals.borrow_mut().clear();
        self.refcounts.borrow_mut().clear();
    }

    fn set_program_name(&self, name: &str) -> Result<(), BridgeError> {
        if self.faulted(Fault::ProgramName) {
            return Err(BridgeError::Init("injected sys.argv failure".to_string()));
        }
        self.journal.record(format!("argv:{}", name));
        Ok(())
    }

    fn import(&self, module: &str) -> Result<Self::Object, BridgeError> {
        self.journal.record(format!("import:{}", module));
        if self.faulted(Fault::Import) {
            return Err(BridgeError::Import {
                module: module.to_string(),
                reason: "No module named 'lupa'".to_string(),
            });
        }
        Ok(self.object("module"))
    }

    fn getattr(&self, _object: &Self::Object, name: &str) -> Result<Self::Object, BridgeError> {
        self.journal.record(format!("getattr:{}", name));
        let missing = || BridgeError::Attribute {
            name: name.to_string(),
            reason: "module has no such attribute".to_string(),
        };
        let (label, fault) = match name {
            "LUA_VERSION" => ("version", Fault::VersionAttribute),
            "LuaRuntime" => ("class", Fault::RuntimeClass),
            _ => return Err(missing()),
        };
        if self.faulted(fault) {
            return Err(missing());
        }
        Ok(self.object(label))
    }

    fn int_prefix(&self, _sequence: &Self::Object, count: usize) -> Result<Vec<i64>, BridgeError> {
        Ok(self.declared.borrow().iter().take(count).copied().collect())
    }

    fn capsule(&self, state: &ForeignState) -> Result<Self::Object, BridgeError> {
        if self.faulted(Fault::Capsule) {
            return Err(self.construction("capsule"));
        }
        self.journal
            .record(format!("capsule:{}", state.tag().to_string_lossy()));
        Ok(self.object("capsule"))
    }

    fn empty_args(&self) -> Result<Self::Object, BridgeError> {
        if self.faulted(Fault::Args) {
            return Err(self.construction("args"));
        }
        Ok(self.object("args"))
    }

    fn kwargs(&self, key: &str, value: &Self::Object) -> Result<Self::Object, BridgeError> {
        if self.faulted(Fault::Kwargs) {
            return Err(self.construction("kwargs"));
        }
        self.journal.record(format!("kwargs:{}={}", key, value.label));
        Ok(self.object("kwargs"))
    }

    fn call(
        &self,
        callable: &Self::Object,
        _args: &Self::Object,
        _kwargs: &Self::Object,
    ) -> Result<Self::Object, BridgeError> {
        self.journal.record(format!("call:{}", callable.label));
        if self.faulted(Fault::Call) {
            return Err(self.construction("constructor"));
        }
        Ok(self.object("bridge"))
    }

    fn global(&self, name: &str) -> Result<Option<Self::Object>, BridgeError> {
        let found = self.globals.borrow().get(name).cloned();
        Ok(found.map(|(id, label)| {
            self.incref(id);
            StubObject { id, label }
        }))
    }

    fn set_global(&self, name: &str, value: &Self::Object) -> Result<(), BridgeError> {
        if self.faulted(Fault::Publish) {
            return Err(self.construction("publication"));
        }
        self.journal.record(format!("publish:{}", name));
        self.incref(value.id);
        self.globals
            .borrow_mut()
            .insert(name.to_string(), (value.id, value.label.clone()));
        Ok(())
    }

    fn release(&self, object: Self::Object) {
        if self.decref(object.id) {
            self.journal.record(format!("release:{}", object.label));
        } else {
            self.journal.record(format!("double-release:{}", object.label));
        }
    }
}

#[derive(Default)]
struct LinkerState {
    fail_load: Cell<bool>,
    fail_unload: Cell<bool>,
}

#[derive(Clone)]
pub struct StubLinker {
    journal: Journal,
    state: Rc<LinkerState>,
}

impl StubLinker {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            state: Rc::default(),
        }
    }

    pub fn fail_load(&self, fail: bool) {
        self.state.fail_load.set(fail);
    }

    pub fn fail_unload(&self, fail: bool) {
        self.state.fail_unload.set(fail);
    }
}

impl DynamicLinker for StubLinker {
    type Handle = &'static str;

    fn load(&self) -> Result<Self::Handle, BridgeError> {
        if self.state.fail_load.get() {
            self.journal.record("link-failed");
            return Err(BridgeError::Link {
                library: STUB_LIBRARY.to_string(),
                reason: "cannot open shared object file".to_string(),
            });
        }
        self.journal.record("link");
        Ok(STUB_LIBRARY)
    }

    fn unload(&self, handle: Self::Handle) -> Result<(), BridgeError> {
        if self.state.fail_unload.get() {
            self.journal.record("unlink-failed");
            return Err(BridgeError::Unlink {
                library: handle.to_string(),
                reason: "invalid handle".to_string(),
            });
        }
        self.journal.record("unlink");
        Ok(())
    }
}

pub struct Harness {
    pub journal: Journal,
    pub host: StubHost,
    pub python: Rc<StubPython>,
    pub linker: StubLinker,
}

impl Harness {
    pub fn new(host_version: i64, declared: &[i64]) -> Self {
        let journal = Journal::default();
        Self {
            host: StubHost::new(journal.clone(), host_version),
            python: Rc::new(StubPython::new(journal.clone(), declared)),
            linker: StubLinker::new(journal.clone()),
            journal,
        }
    }

    pub fn initialize(&self) -> Result<BridgeHandle<StubObject>, InitFailure> {
        Initializer::new(
            &self.host,
            Rc::clone(&self.python),
            self.linker.clone(),
            BridgeOptions::default(),
        )
        .initialize()
    }
}
