//! xhook-intercept: method interception for managed runtimes.
//!
//! A `Dispatcher` owns the `HookRegistry` and is what the runtime calls in
//! place of a bound method. Adapters implement `Hooker`; the runtime itself
//! is reached through the `Runtime` trait.

pub mod interceptor;
pub mod method;
pub mod runtime;
pub mod thread;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;


// Re-exports for convenience (flattened imports)
pub use interceptor::invocation::{AdapterFault, CallContext, Phase};
pub use interceptor::listener::{CallListener, Hooker};
pub use interceptor::reentry::{is_suppressed, HookSuppressGuard};
pub use interceptor::registry::{HookRegistration, HookRegistry, Snapshot};
pub use interceptor::{Dispatcher, InstallState, InterceptionPoint};
pub use method::{MethodId, MethodSpec, TargetMethod};
pub use runtime::Runtime;
pub use types::{CallbackToken, HookError, ObjectRef, Outcome, Result, Throwable, Value};
