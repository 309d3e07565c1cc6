//! The host runtime seam.
//!
//! Everything xhook needs from the managed runtime goes through `Runtime`:
//! resolving a method description to a slot, redirecting that slot to the
//! dispatcher, undoing the redirect, and calling the original body.

use crate::method::{MethodSpec, TargetMethod};
use crate::types::{Outcome, Result, Value};

pub trait Runtime: Send + Sync {
    /// Resolve a description to a method slot.
    ///
    /// Fails with `HookError::UnresolvedTarget` when no such method exists or
    /// it is not reachable.
    fn resolve(&self, spec: &MethodSpec) -> Result<TargetMethod>;

    /// Redirect calls of `method` into the dispatcher.
    ///
    /// Called once, when the first registration for `method` is added. Fails
    /// with `HookError::UnresolvedTarget` when the slot cannot be patched.
    fn bind(&self, method: &TargetMethod) -> Result<()>;

    /// Undo `bind`: restore the original entry point, or deoptimize the
    /// method when restoring is not possible.
    fn release(&self, method: &TargetMethod);

    /// Drop compiled code for `method` so inlined call sites reach the
    /// interception point. Returns false when the runtime declined.
    fn deoptimize(&self, method: &TargetMethod) -> bool {
        let _ = method;
        false
    }

    /// Run the original, unhooked body.
    ///
    /// The outer `Result` reports failures of the call machinery itself
    /// (e.g. `HookError::IncompatibleCall`); the inner `Outcome` is what the
    /// body returned or threw.
    fn invoke_original(
        &self,
        method: &TargetMethod,
        this: Option<&Value>,
        args: &[Value],
    ) -> Result<Outcome>;
}
