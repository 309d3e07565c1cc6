use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::interceptor::invocation::{AdapterFault, CallContext, Phase};
use crate::interceptor::listener::Hooker;
use crate::interceptor::registry::{HookRegistration, HookRegistry};
use crate::method::{MethodSpec, TargetMethod};
use crate::runtime::Runtime;
use crate::types::{CallbackToken, HookError, Outcome, Result, Value};

pub mod invocation;
pub mod listener;
pub mod reentry;
pub mod registry;

/// A lifecycle method that must be hooked before any module code runs.
pub struct InterceptionPoint {
    pub name: String,
    pub spec: MethodSpec,
    pub hooker: Arc<dyn Hooker>,
    pub priority: i32,
}

impl InterceptionPoint {
    pub fn new(name: impl Into<String>, spec: MethodSpec, hooker: Arc<dyn Hooker>) -> Self {
        Self {
            name: name.into(),
            spec,
            hooker,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Whether the interception points of this process are in place.
///
/// `Installed { points: 0 }` (nothing to hook) and `Failed` are distinct:
/// a process in `Failed` has no partial hooks left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installed { points: usize },
    Failed { reason: String },
}

struct Installed {
    state: InstallState,
    hooks: Vec<(TargetMethod, CallbackToken)>,
}

/// Routes intercepted invocations through their registered adapters.
///
/// The runtime calls `dispatch` in place of a bound method. One dispatch
/// runs `before` adapters in snapshot order, the original body unless an
/// adapter substituted an outcome, then `after` adapters in reverse order.
pub struct Dispatcher {
    runtime: Arc<dyn Runtime>,
    registry: HookRegistry,
    install: Mutex<Installed>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            registry: HookRegistry::new(Arc::clone(&runtime)),
            runtime,
            install: Mutex::new(Installed {
                state: InstallState::NotInstalled,
                hooks: Vec::new(),
            }),
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Resolve `spec` and attach `hooker` with a fresh token.
    pub fn hook(
        &self,
        spec: &MethodSpec,
        hooker: Arc<dyn Hooker>,
        priority: i32,
    ) -> Result<(TargetMethod, CallbackToken)> {
        let method = self.runtime.resolve(spec)?;
        let token = self.registry.next_token();
        self.registry.register(&method, hooker, priority, token)?;
        Ok((method, token))
    }

    pub fn unhook(&self, method: &TargetMethod, token: CallbackToken) -> Result<()> {
        self.registry.unregister(method, token)
    }

    fn install_lock(&self) -> MutexGuard<'_, Installed> {
        self.install.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn install_state(&self) -> InstallState {
        self.install_lock().state.clone()
    }

    /// Hook every point, or none of them.
    ///
    /// Idempotent once it succeeded: later calls return the installed count
    /// without touching the registry. On failure every point hooked so far is
    /// rolled back, the state becomes `Failed` and the error names the point.
    pub fn install_interception_points(&self, points: &[InterceptionPoint]) -> Result<usize> {
        let mut install = self.install_lock();
        if let InstallState::Installed { points } = install.state {
            debug!("Interception points already installed ({})", points);
            return Ok(points);
        }

        let mut hooked = Vec::with_capacity(points.len());
        for point in points {
            match self.hook(&point.spec, Arc::clone(&point.hooker), point.priority) {
                Ok(entry) => {
                    debug!("Installed interception point '{}' on {}", point.name, entry.0);
                    hooked.push(entry);
                }
                Err(e) => {
                    error!("Interception point '{}' failed: {}", point.name, e);
                    for (method, token) in hooked.iter().rev() {
                        if let Err(e) = self.registry.unregister(method, *token) {
                            warn!("Rollback of {} on {} failed: {}", token, method, e);
                        }
                    }
                    install.state = InstallState::Failed {
                        reason: e.to_string(),
                    };
                    return Err(HookError::InstallFailed {
                        point: point.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!("Installed {} interception point(s)", hooked.len());
        install.state = InstallState::Installed {
            points: hooked.len(),
        };
        install.hooks = hooked;
        Ok(points.len())
    }

    /// Remove the hooks placed by `install_interception_points`.
    ///
    /// Returns the number of registrations removed.
    pub fn uninstall_interception_points(&self) -> usize {
        let mut install = self.install_lock();
        let hooks = std::mem::take(&mut install.hooks);
        let mut removed = 0;
        for (method, token) in hooks.iter().rev() {
            match self.registry.unregister(method, *token) {
                Ok(()) => removed += 1,
                // Someone else already unhooked it.
                Err(e) => debug!("Skipping {}: {}", token, e),
            }
        }
        install.state = InstallState::NotInstalled;
        removed
    }

    /// Run `method` through its adapters and deliver the outcome.
    pub fn dispatch(&self, method: &TargetMethod, this: Option<Value>, args: Vec<Value>) -> Outcome {
        if reentry::is_suppressed() {
            return self.invoke_original(method, this.as_ref(), &args);
        }

        let snapshot = self.registry.snapshot(method);
        if snapshot.is_empty() {
            return self.invoke_original(method, this.as_ref(), &args);
        }

        let mut ctx = CallContext::new(method.clone(), this, args);

        ctx.set_phase(Phase::Before);
        // Only adapters whose `before` ran get their `after`, in reverse.
        let mut entered = 0;
        for reg in &snapshot {
            entered += 1;
            let saved = ctx.save();
            if let Err(message) = run_isolated(|| reg.hooker().before(&mut ctx)) {
                ctx.restore(saved);
                record_fault(&mut ctx, reg, Phase::Before, message);
            }
            if ctx.skips_original() {
                break;
            }
        }

        if !ctx.skips_original() {
            ctx.set_phase(Phase::Original);
            let (this, args) = ctx.receiver_and_args();
            let outcome = self.invoke_original(method, this, args);
            ctx.set_outcome(outcome);
        }

        ctx.set_phase(Phase::After);
        for reg in snapshot.iter().take(entered).rev() {
            let saved = ctx.save();
            if let Err(message) = run_isolated(|| reg.hooker().after(&mut ctx)) {
                ctx.restore(saved);
                record_fault(&mut ctx, reg, Phase::After, message);
            }
        }

        ctx.complete();
        ctx.finish()
    }

    /// Call the original body of `method`, bypassing every adapter.
    ///
    /// Failures of the call machinery surface as the method's natural fault
    /// type, never as a `HookError`.
    pub fn invoke_original(&self, method: &TargetMethod, this: Option<&Value>, args: &[Value]) -> Outcome {
        if let Err(e) = check_call(method, this, args) {
            warn!("{}", e);
            return Err(method.natural_fault(e.to_string()));
        }
        match self.runtime.invoke_original(method, this, args) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Original call of {} failed: {}", method, e);
                Err(method.natural_fault(e.to_string()))
            }
        }
    }
}

fn check_call(method: &TargetMethod, this: Option<&Value>, args: &[Value]) -> Result<()> {
    let incompatible = |reason: String| HookError::IncompatibleCall {
        method: method.to_string(),
        reason,
    };
    if args.len() != method.param_count() {
        return Err(incompatible(format!(
            "expected {} argument(s), got {}",
            method.param_count(),
            args.len()
        )));
    }
    match (method.is_static(), this) {
        (true, Some(_)) => Err(incompatible("static method called with a receiver".into())),
        (false, None) => Err(incompatible("instance method called without a receiver".into())),
        _ => Ok(()),
    }
}

fn run_isolated<F>(f: F) -> std::result::Result<(), String>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

fn record_fault(ctx: &mut CallContext, reg: &HookRegistration, phase: Phase, message: String) {
    warn!(
        "Hooker {} failed in {:?} of {} (priority {}, thread {:#x}): {}",
        reg.hooker().name(),
        phase,
        ctx.method(),
        reg.priority(),
        ctx.thread_id(),
        message
    );
    ctx.record_fault(AdapterFault {
        hooker: reg.hooker().name().to_string(),
        token: reg.token(),
        priority: reg.priority(),
        phase,
        message,
    });
}
