//! Allocation-guard protocol (§4.3)
//!
//! Code that must hold raw interior pointers across several allocations
//! (constructing a compound value out of pieces that reference each other)
//! declares an upper bound up front with `Machine::require_alloc`, which
//! performs any GC that would otherwise be needed up front and, while peers
//! are attached, holds `alloc_lock` for the lifetime of the returned guard.
//! Allocations made through the guard (`AllocGuard::alloc`) are therefore
//! guaranteed not to move anything out from under a caller still holding
//! earlier pointers from the same window.
//!
//! This is the reservation half of the `Require`/`Done` pair described in
//! §4.3; `Done` is simply dropping the guard.

use crate::cell::Tag;
use crate::error::fatal;
use crate::lock::ReentrantGuard;
use crate::value::Value;

/// An open allocation reservation. Allocations made through `alloc` are
/// guaranteed to skip GC: the reservation already proved enough room exists.
pub struct AllocGuard<'m> {
    pub(crate) machine: &'m crate::machine::Machine,
    pub(crate) _lock: Option<ReentrantGuard<'m>>,
}

impl<'m> AllocGuard<'m> {
    /// Guarded allocation (the `Mc` constructors of §4.1): must not trigger
    /// GC. A failure here means the caller's declared upper bound (`n` in
    /// `require_alloc`) undercounted — that is a caller bug, not a runtime
    /// condition, so it is fatal rather than silently collecting mid-window.
    pub fn alloc(&self, payload_len: usize, tag: Tag) -> Value {
        match self.machine.try_bump_raw(payload_len, tag) {
            Some(v) => v,
            None => fatal("guarded allocation exceeded its reservation"),
        }
    }
}
