//! Thread-local re-entrancy suppression.
//!
//! While suppressed, dispatch on the current thread goes straight to the
//! original body. Adapters use this for their own bookkeeping so that a
//! hooked method called from inside an adapter does not re-enter adapters.

use std::cell::Cell;

thread_local! {
    static SUPPRESSED: Cell<bool> = const { Cell::new(false) };
}

/// True if hook callbacks are suppressed on the current thread.
pub fn is_suppressed() -> bool {
    SUPPRESSED.with(|s| s.get())
}

/// RAII guard that suppresses hook callbacks for its lifetime.
///
/// Saves the current state and restores it on drop, so guards nest.
pub struct HookSuppressGuard(bool);

impl HookSuppressGuard {
    pub fn new() -> Self {
        let was = SUPPRESSED.with(|s| s.replace(true));
        Self(was)
    }
}

impl Default for HookSuppressGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HookSuppressGuard {
    fn drop(&mut self) {
        SUPPRESSED.with(|s| s.set(self.0));
    }
}
