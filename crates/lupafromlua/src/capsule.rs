use std::ffi::{c_void, CStr};
use std::ptr::NonNull;

/// Capsule name lupa checks before unwrapping the state pointer
pub const LUA_STATE_TAG: &CStr = c"lua_State";

/// An opaque host-state pointer tagged for the embedded side
///
/// Only the bridge library knows how to turn it back into a `lua_State*`;
/// nothing in this crate dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignState {
    ptr: NonNull<c_void>,
    tag: &'static CStr,
}

impl ForeignState {
    /// Wrap a raw `lua_State*`; `None` for a null pointer
    pub fn lua_state(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            tag: LUA_STATE_TAG,
        })
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn tag(&self) -> &'static CStr {
        self.tag
    }
}
