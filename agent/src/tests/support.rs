//! Fakes shared by the agent test suites.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use xhook_intercept::mock::MockRuntime;
use xhook_intercept::{Dispatcher, ObjectRef, TargetMethod, Value};
use xhook_protocol::{
    ApplicationService, ChannelError, ChannelHandle, Liveness, ManagerControl, ModuleArguments, Pid,
    Uid,
};

use crate::bootstrap::{LifecycleMethods, ManagerStartup};
use crate::hookers::ModuleLoader;

/// A process runtime with every lifecycle method defined.
pub struct Process {
    pub rt: Arc<MockRuntime>,
    pub dispatcher: Arc<Dispatcher>,
    pub attach: TargetMethod,
    pub crash: TargetMethod,
    pub launch: TargetMethod,
    pub started: TargetMethod,
}

impl Process {
    pub fn new() -> Self {
        let methods = LifecycleMethods::default();
        let rt = Arc::new(MockRuntime::new());
        let attach = rt.define(methods.attach, |_, _| Ok(Value::Null));
        let crash = rt.define(methods.crash, |_, _| Ok(Value::Null));
        let launch = rt.define(methods.manager_launch, |_, _| Ok(Value::Str("resolved".into())));
        let started = rt.define(methods.process_started, |_, _| Ok(Value::Bool(false)));
        let dispatcher = Arc::new(Dispatcher::new(rt.clone()));
        Self {
            rt,
            dispatcher,
            attach,
            crash,
            launch,
            started,
        }
    }

    pub fn application() -> Value {
        Value::Object(ObjectRef::new("android.app.ActivityThread", 1))
    }

    pub fn call_attach(&self) -> xhook_intercept::Outcome {
        self.rt.call(
            &self.dispatcher,
            &self.attach,
            Some(Self::application()),
            vec![Value::Bool(false), Value::Int(0)],
        )
    }

    pub fn call_crash(&self, arg: Value) -> xhook_intercept::Outcome {
        let thread = Value::Object(ObjectRef::new("java.lang.Thread", 2));
        self.rt.call(&self.dispatcher, &self.crash, Some(thread), vec![arg])
    }

    pub fn call_launch(&self, request: &str) -> xhook_intercept::Outcome {
        self.rt.call(
            &self.dispatcher,
            &self.launch,
            Some(Value::Null),
            vec![Value::Str(request.into()), Value::Null, Value::Int(0), Value::Null],
        )
    }

    pub fn call_started(&self, pid: i64, uid: i64, name: &str) -> xhook_intercept::Outcome {
        self.rt.call(
            &self.dispatcher,
            &self.started,
            Some(Value::Null),
            vec![Value::Int(pid), Value::Int(uid), Value::Str(name.into())],
        )
    }
}

#[derive(Default)]
pub struct RecordingLoader {
    pub calls: Mutex<Vec<(Value, ModuleArguments)>>,
    pub fail: AtomicBool,
}

impl ModuleLoader for RecordingLoader {
    fn load_modules(&self, app: &Value, args: &ModuleArguments) -> anyhow::Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("module apk is corrupt");
        }
        self.calls.lock().unwrap().push((app.clone(), args.clone()));
        Ok(3)
    }
}

impl RecordingLoader {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Answers the mute query with a fixed value, or fails.
pub struct FixedAppService(pub Option<bool>);

impl ApplicationService for FixedAppService {
    fn is_log_muted(&self, channel: ChannelHandle) -> Result<bool, ChannelError> {
        self.0.ok_or(ChannelError::Dead(channel))
    }
}

pub struct FixedStartup {
    pub allow: bool,
    pub calls: AtomicUsize,
}

impl FixedStartup {
    pub fn new(allow: bool) -> Self {
        Self {
            allow,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ManagerStartup for FixedStartup {
    fn start(&self, _pid: Pid, _uid: Uid) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.allow
    }
}

/// Records every manager-control call and answers `should_start` with `allow`.
#[derive(Default)]
pub struct RecordingControl {
    pub allow: AtomicBool,
    pub pre_starts: AtomicUsize,
    pub candidates: Mutex<Vec<(Pid, Uid, String)>>,
}

impl ManagerControl for RecordingControl {
    fn pre_start_manager(&self) -> bool {
        self.pre_starts.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn should_start_manager(&self, pid: Pid, uid: Uid, process_name: &str) -> bool {
        self.candidates
            .lock()
            .unwrap()
            .push((pid, uid, process_name.to_string()));
        self.allow.load(Ordering::SeqCst)
    }

    fn post_start_manager(&self, _pid: Pid, _uid: Uid) -> bool {
        false
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        enabled
    }

    fn obtain_channel(
        &self,
        _heartbeat: Arc<dyn Liveness>,
        _pid: Pid,
        _uid: Uid,
    ) -> Option<ChannelHandle> {
        None
    }
}
