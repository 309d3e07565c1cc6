//! Per-invocation call context handed to adapters.

use std::marker::PhantomData;

use crate::method::TargetMethod;
use crate::thread;
use crate::types::{CallbackToken, Outcome, Throwable, Value};

/// Dispatch phase of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Before,
    Original,
    After,
    /// Delivered a return value.
    Completed,
    /// Delivered a thrown value.
    Faulted,
}

/// An adapter failed during `before` or `after`. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterFault {
    pub hooker: String,
    pub token: CallbackToken,
    pub priority: i32,
    pub phase: Phase,
    pub message: String,
}

/// State carried through one intercepted invocation.
///
/// Created and consumed by the dispatcher on the calling thread; adapters
/// only ever borrow it. Not `Send`: a context never leaves its thread.
pub struct CallContext {
    method: TargetMethod,
    this: Option<Value>,
    args: Vec<Value>,
    outcome: Option<Outcome>,
    skip_original: bool,
    phase: Phase,
    faults: Vec<AdapterFault>,
    thread: u64,
    _not_send: PhantomData<*const ()>,
}

/// Result slots saved before an adapter runs, restored if it faults.
pub(crate) struct SavedSlots {
    outcome: Option<Outcome>,
    skip_original: bool,
}

impl CallContext {
    pub(crate) fn new(method: TargetMethod, this: Option<Value>, args: Vec<Value>) -> Self {
        Self {
            method,
            this,
            args,
            outcome: None,
            skip_original: false,
            phase: Phase::Created,
            faults: Vec::new(),
            thread: thread::id(),
            _not_send: PhantomData,
        }
    }

    pub fn method(&self) -> &TargetMethod {
        &self.method
    }

    /// Receiver of an instance call, `None` for static methods.
    pub fn this(&self) -> Option<&Value> {
        self.this.as_ref()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Mutable view of the arguments. Changes made during `before` are what
    /// the original body receives.
    pub fn args_mut(&mut self) -> &mut Vec<Value> {
        &mut self.args
    }

    pub fn arg(&self, n: usize) -> Option<&Value> {
        self.args.get(n)
    }

    /// Replace argument `n`. Returns false when `n` is out of range.
    pub fn set_arg(&mut self, n: usize, value: Value) -> bool {
        match self.args.get_mut(n) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Current return value, if the call (so far) returns normally.
    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// Current thrown value, if any.
    pub fn throwable(&self) -> Option<&Throwable> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    pub fn has_throwable(&self) -> bool {
        self.throwable().is_some()
    }

    /// Set the value delivered to the caller.
    ///
    /// During `before` this also skips the original body.
    pub fn set_result(&mut self, value: Value) {
        self.outcome = Some(Ok(value));
        if self.phase == Phase::Before {
            self.skip_original = true;
        }
    }

    /// Make the call throw `throwable`.
    ///
    /// During `before` this also skips the original body.
    pub fn set_throwable(&mut self, throwable: Throwable) {
        self.outcome = Some(Err(throwable));
        if self.phase == Phase::Before {
            self.skip_original = true;
        }
    }

    /// True once a `before` adapter substituted a result or throwable.
    pub fn skips_original(&self) -> bool {
        self.skip_original
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Faults recorded so far in this invocation.
    pub fn faults(&self) -> &[AdapterFault] {
        &self.faults
    }

    /// Thread the invocation runs on.
    pub fn thread_id(&self) -> u64 {
        self.thread
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }

    pub(crate) fn save(&self) -> SavedSlots {
        SavedSlots {
            outcome: self.outcome.clone(),
            skip_original: self.skip_original,
        }
    }

    pub(crate) fn restore(&mut self, saved: SavedSlots) {
        self.outcome = saved.outcome;
        self.skip_original = saved.skip_original;
    }

    pub(crate) fn record_fault(&mut self, fault: AdapterFault) {
        self.faults.push(fault);
    }

    pub(crate) fn receiver_and_args(&self) -> (Option<&Value>, &[Value]) {
        (self.this.as_ref(), &self.args)
    }

    /// Move to `Completed` or `Faulted` depending on what will be delivered.
    pub(crate) fn complete(&mut self) -> Phase {
        self.phase = if self.has_throwable() {
            Phase::Faulted
        } else {
            Phase::Completed
        };
        self.phase
    }

    /// Hand back what the caller receives.
    pub(crate) fn finish(self) -> Outcome {
        self.outcome.unwrap_or(Ok(Value::Null))
    }
}
