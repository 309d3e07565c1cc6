//! In-memory runtime for tests: method bodies are closures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::interceptor::Dispatcher;
use crate::method::{MethodId, MethodSpec, TargetMethod};
use crate::runtime::Runtime;
use crate::types::{HookError, Outcome, Result, Value};

/// Fault class the mock runtime reports for calls it cannot perform.
pub const FAULT_CLASS: &str = "java.lang.IllegalArgumentException";

pub type Body = Arc<dyn Fn(Option<&Value>, &[Value]) -> Outcome + Send + Sync>;

#[derive(Default)]
struct State {
    by_spec: HashMap<MethodSpec, TargetMethod>,
    bodies: HashMap<MethodId, Body>,
    unbindable: HashSet<MethodId>,
    bound: HashSet<MethodId>,
    bind_counts: HashMap<MethodId, usize>,
    released: Vec<MethodId>,
    deoptimized: Vec<MethodId>,
}

#[derive(Default)]
pub struct MockRuntime {
    next_id: AtomicU64,
    original_calls: AtomicUsize,
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Define a method with `body` as its original implementation.
    pub fn define<F>(&self, spec: MethodSpec, body: F) -> TargetMethod
    where
        F: Fn(Option<&Value>, &[Value]) -> Outcome + Send + Sync + 'static,
    {
        let id = MethodId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let method = TargetMethod::new(id, spec.clone(), FAULT_CLASS);
        let mut state = self.state();
        state.by_spec.insert(spec, method.clone());
        state.bodies.insert(id, Arc::new(body));
        method
    }

    /// Make `bind` fail for `method`.
    pub fn refuse_bind(&self, method: &TargetMethod) {
        self.state().unbindable.insert(method.id());
    }

    pub fn is_bound(&self, method: &TargetMethod) -> bool {
        self.state().bound.contains(&method.id())
    }

    pub fn bind_count(&self, method: &TargetMethod) -> usize {
        self.state()
            .bind_counts
            .get(&method.id())
            .copied()
            .unwrap_or(0)
    }

    pub fn released(&self) -> Vec<MethodId> {
        self.state().released.clone()
    }

    pub fn deoptimized(&self) -> Vec<MethodId> {
        self.state().deoptimized.clone()
    }

    /// Number of times an original body ran.
    pub fn original_calls(&self) -> usize {
        self.original_calls.load(Ordering::SeqCst)
    }

    /// Call `method` the way compiled code would: through the dispatcher when
    /// the slot is bound, straight to the body otherwise.
    pub fn call(
        &self,
        dispatcher: &Dispatcher,
        method: &TargetMethod,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Outcome {
        if self.is_bound(method) {
            dispatcher.dispatch(method, this, args)
        } else {
            dispatcher.invoke_original(method, this.as_ref(), &args)
        }
    }
}

impl Runtime for MockRuntime {
    fn resolve(&self, spec: &MethodSpec) -> Result<TargetMethod> {
        self.state()
            .by_spec
            .get(spec)
            .cloned()
            .ok_or_else(|| HookError::UnresolvedTarget {
                target: spec.to_string(),
                reason: "no such method".to_string(),
            })
    }

    fn bind(&self, method: &TargetMethod) -> Result<()> {
        let mut state = self.state();
        if state.unbindable.contains(&method.id()) {
            return Err(HookError::UnresolvedTarget {
                target: method.to_string(),
                reason: "method slot is not patchable".to_string(),
            });
        }
        state.bound.insert(method.id());
        *state.bind_counts.entry(method.id()).or_default() += 1;
        Ok(())
    }

    fn release(&self, method: &TargetMethod) {
        let mut state = self.state();
        state.bound.remove(&method.id());
        state.released.push(method.id());
    }

    fn deoptimize(&self, method: &TargetMethod) -> bool {
        self.state().deoptimized.push(method.id());
        true
    }

    fn invoke_original(
        &self,
        method: &TargetMethod,
        this: Option<&Value>,
        args: &[Value],
    ) -> Result<Outcome> {
        let body = self.state().bodies.get(&method.id()).cloned();
        let body = body.ok_or_else(|| HookError::IncompatibleCall {
            method: method.to_string(),
            reason: "method has no body".to_string(),
        })?;
        self.original_calls.fetch_add(1, Ordering::SeqCst);
        // Body runs without the state lock: it may call back into the runtime.
        Ok(body(this, args))
    }
}
