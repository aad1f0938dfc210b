use crate::errors::BridgeError;
use crate::runtime::EmbeddedRuntime;

/// Index of an object held by a [`ReleaseScope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

/// Owns intermediate embedded objects and releases them in reverse order of
/// acquisition when dropped, on success and failure paths alike.
pub struct ReleaseScope<'r, E: EmbeddedRuntime> {
    runtime: &'r E,
    held: Vec<Option<E::Object>>,
}

impl<'r, E: EmbeddedRuntime> ReleaseScope<'r, E> {
    pub fn new(runtime: &'r E) -> Self {
        Self {
            runtime,
            held: Vec::new(),
        }
    }

    pub fn hold(&mut self, object: E::Object) -> Slot {
        self.held.push(Some(object));
        Slot(self.held.len() - 1)
    }

    pub fn get(&self, slot: Slot) -> Result<&E::Object, BridgeError> {
        self.held
            .get(slot.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| BridgeError::Protocol(format!("object slot {} already handed off", slot.0)))
    }

    /// Hand an object off to a long-lived owner; the scope will not release it
    pub fn take(&mut self, slot: Slot) -> Result<E::Object, BridgeError> {
        self.held
            .get_mut(slot.0)
            .and_then(Option::take)
            .ok_or_else(|| BridgeError::Protocol(format!("object slot {} already handed off", slot.0)))
    }
}

impl<E: EmbeddedRuntime> Drop for ReleaseScope<'_, E> {
    fn drop(&mut self) {
        while let Some(entry) = self.held.pop() {
            if let Some(object) = entry {
                self.runtime.release(object);
            }
        }
    }
}
