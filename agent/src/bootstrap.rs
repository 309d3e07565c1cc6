//! Per-process bootstrap: install interception points, configure logging,
//! then pick the manager branch or the module-loading branch.

use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, info, warn};
use thiserror::Error;
use xhook_intercept::{Dispatcher, HookError, InterceptionPoint, MethodSpec};
use xhook_protocol::{
    ApplicationService, ConfigError, Liveness, ManagerControl, ManagerIdentity, Pid, ProcessCreated, Uid,
    XhookConfig,
};

use crate::hookers::{AttachHooker, CrashDumpHooker, ManagerLaunchHooker, ModuleLoader, SystemAttachHooker};
use crate::logging::{init_logging, ModuleLog};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to install interception points: {0}")]
    Install(#[from] HookError),

    #[error("process is already bootstrapped ({0:?})")]
    AlreadyBootstrapped(Branch),
}

/// What a process does after its hooks are in place. Chosen once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Manager,
    Modules,
}

/// Starts the manager inside this process. Returns false if it may not run.
pub trait ManagerStartup: Send + Sync {
    fn start(&self, pid: Pid, uid: Uid) -> bool;
}

/// Manager startup that confirms the attach with the privileged service and
/// obtains the control channel, guarded by this process's heartbeat.
pub struct ServiceManagerStartup {
    control: Arc<dyn ManagerControl>,
    heartbeat: Arc<dyn Liveness>,
}

impl ServiceManagerStartup {
    pub fn new(control: Arc<dyn ManagerControl>, heartbeat: Arc<dyn Liveness>) -> Self {
        Self { control, heartbeat }
    }
}

impl ManagerStartup for ServiceManagerStartup {
    fn start(&self, pid: Pid, uid: Uid) -> bool {
        if !self.control.post_start_manager(pid, uid) {
            debug!("Attach of pid {} not confirmed by the service", pid);
            return false;
        }
        match self
            .control
            .obtain_channel(Arc::clone(&self.heartbeat), pid, uid)
        {
            Some(channel) => {
                info!("Manager pid {} obtained {}", pid, channel);
                true
            }
            None => false,
        }
    }
}

/// Lifecycle methods the sequencer hooks.
#[derive(Debug, Clone)]
pub struct LifecycleMethods {
    /// Application attach, hooked in every process.
    pub attach: MethodSpec,
    /// Uncaught-throwable dispatch, hooked in every process.
    pub crash: MethodSpec,
    /// Activity launch resolution, hooked in the system process.
    pub manager_launch: MethodSpec,
    /// New process record `(pid, uid, process_name)`, hooked in the system process.
    pub process_started: MethodSpec,
}

impl Default for LifecycleMethods {
    fn default() -> Self {
        Self {
            attach: MethodSpec::instance("android.app.ActivityThread", "attach", &["boolean", "long"]),
            crash: MethodSpec::instance(
                "java.lang.Thread",
                "dispatchUncaughtException",
                &["java.lang.Throwable"],
            ),
            manager_launch: MethodSpec::instance(
                "com.android.server.wm.ActivityTaskSupervisor",
                "resolveActivity",
                &["android.content.Intent", "android.content.pm.ResolveInfo", "int", "android.app.ProfilerInfo"],
            ),
            process_started: MethodSpec::instance(
                "com.android.server.am.ProcessList",
                "handleProcessStarted",
                &["int", "int", "java.lang.String"],
            ),
        }
    }
}

/// Identity of the running process.
pub fn current_process() -> (Pid, Uid) {
    // SAFETY: getpid and getuid have no preconditions and cannot fail.
    unsafe { (Pid(libc::getpid()), Uid(libc::getuid())) }
}

pub struct Sequencer {
    dispatcher: Arc<Dispatcher>,
    expected: ManagerIdentity,
    verbose: bool,
    methods: LifecycleMethods,
    module_log: Arc<ModuleLog>,
    loader: Arc<dyn ModuleLoader>,
    app_service: Arc<dyn ApplicationService>,
    manager: Arc<dyn ManagerStartup>,
    control: Option<Arc<dyn ManagerControl>>,
    identity: (Pid, Uid),
    branch: Arc<OnceLock<Branch>>,
    bootstrapping: Mutex<()>,
}

impl Sequencer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        config: &XhookConfig,
        loader: Arc<dyn ModuleLoader>,
        app_service: Arc<dyn ApplicationService>,
        manager: Arc<dyn ManagerStartup>,
    ) -> Self {
        Self {
            dispatcher,
            expected: config.manager.clone(),
            verbose: config.verbose,
            methods: LifecycleMethods::default(),
            module_log: Arc::new(ModuleLog::new()),
            loader,
            app_service,
            manager,
            control: None,
            identity: current_process(),
            branch: Arc::new(OnceLock::new()),
            bootstrapping: Mutex::new(()),
        }
    }

    /// Build from the configuration named by `XHOOK_CONFIG`, or the defaults.
    pub fn from_env(
        dispatcher: Arc<Dispatcher>,
        loader: Arc<dyn ModuleLoader>,
        app_service: Arc<dyn ApplicationService>,
        manager: Arc<dyn ManagerStartup>,
    ) -> Result<Self, ConfigError> {
        let config = XhookConfig::from_env()?;
        Ok(Self::new(dispatcher, &config, loader, app_service, manager))
    }

    /// Manager control used by the system-process adapters.
    pub fn with_control(mut self, control: Arc<dyn ManagerControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_methods(mut self, methods: LifecycleMethods) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_module_log(mut self, log: Arc<ModuleLog>) -> Self {
        self.module_log = log;
        self
    }

    /// Override the detected `(pid, uid)` of this process.
    pub fn with_identity(mut self, pid: Pid, uid: Uid) -> Self {
        self.identity = (pid, uid);
        self
    }

    pub fn expected(&self) -> &ManagerIdentity {
        &self.expected
    }

    pub fn module_log(&self) -> &Arc<ModuleLog> {
        &self.module_log
    }

    pub fn branch(&self) -> Option<Branch> {
        self.branch.get().copied()
    }

    /// Bootstrap this process after `event`.
    ///
    /// Hooks go in before anything else; an install failure aborts with no
    /// branch chosen. Runs at most once per process; concurrent callers are
    /// serialized and all but the first get `AlreadyBootstrapped`.
    pub fn fork_common(&self, event: &ProcessCreated) -> Result<Branch, BootstrapError> {
        let _serial = self.bootstrapping.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(branch) = self.branch() {
            return Err(BootstrapError::AlreadyBootstrapped(branch));
        }
        init_logging(self.verbose);
        debug!(
            "Bootstrapping {} (system: {}, args: {:?}, {})",
            event.process_name, event.is_system, event.module_args, event.channel
        );

        let points = self.interception_points(event);
        let installed = self.dispatcher.install_interception_points(&points)?;
        debug!("{} interception point(s) in place", installed);

        match self.app_service.is_log_muted(event.channel) {
            Ok(muted) => self.module_log.set_muted(muted),
            Err(e) => debug!("Log mute query failed, keeping module log on: {}", e),
        }

        let (pid, uid) = self.identity;
        let branch = if self.expected.matches(uid, &event.process_name) && self.manager.start(pid, uid) {
            Branch::Manager
        } else {
            Branch::Modules
        };
        self.branch
            .set(branch)
            .map_err(|_| BootstrapError::AlreadyBootstrapped(self.branch().unwrap_or(branch)))?;

        match branch {
            Branch::Manager => info!("Loaded manager in {}, skipping module loading", event.process_name),
            Branch::Modules => info!("Loading modules for {}/{}", event.process_name, uid),
        }
        Ok(branch)
    }

    fn interception_points(&self, event: &ProcessCreated) -> Vec<InterceptionPoint> {
        let mut points = vec![
            InterceptionPoint::new(
                "attach",
                self.methods.attach.clone(),
                Arc::new(AttachHooker::new(
                    Arc::clone(&self.loader),
                    event.module_args.clone(),
                    Arc::clone(&self.branch),
                )),
            ),
            InterceptionPoint::new(
                "crash",
                self.methods.crash.clone(),
                Arc::new(CrashDumpHooker::new(Arc::clone(&self.module_log))),
            ),
        ];
        if event.is_system {
            match &self.control {
                Some(control) => {
                    points.push(InterceptionPoint::new(
                        "manager-launch",
                        self.methods.manager_launch.clone(),
                        Arc::new(ManagerLaunchHooker::new(
                            Arc::clone(control),
                            self.expected.package_name.as_str(),
                        )),
                    ));
                    points.push(InterceptionPoint::new(
                        "system-attach",
                        self.methods.process_started.clone(),
                        Arc::new(SystemAttachHooker::new(Arc::clone(control))),
                    ));
                }
                None => warn!("System process without manager control, parasitic launch disabled"),
            }
        }
        points
    }
}
