//! System-process adapters that drive the parasitic manager launch.

use std::sync::Arc;

use log::{debug, info};
use xhook_intercept::{CallContext, Hooker, Value};
use xhook_protocol::{ManagerControl, Pid, Uid};

/// Launch requests carrying this marker start the manager.
pub const MANAGER_LAUNCH_MARKER: &str = "org.xhook.manager.LAUNCH_MANAGER";

/// Opens the attach window when a launch request asks for the manager.
///
/// Argument 0 of the hooked method is the launch request. It must name the
/// host package the manager is injected into and carry the launch marker.
pub struct ManagerLaunchHooker {
    control: Arc<dyn ManagerControl>,
    host_package: String,
    marker: String,
}

impl ManagerLaunchHooker {
    pub fn new(control: Arc<dyn ManagerControl>, host_package: impl Into<String>) -> Self {
        Self::with_marker(control, host_package, MANAGER_LAUNCH_MARKER)
    }

    pub fn with_marker(
        control: Arc<dyn ManagerControl>,
        host_package: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            control,
            host_package: host_package.into(),
            marker: marker.into(),
        }
    }

    fn is_manager_launch(&self, request: &str) -> bool {
        request.contains(self.marker.as_str()) && request.contains(self.host_package.as_str())
    }
}

impl Hooker for ManagerLaunchHooker {
    fn name(&self) -> &str {
        "manager-launch"
    }

    fn before(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        let is_manager_launch = ctx
            .arg(0)
            .and_then(Value::as_str)
            .map(|request| self.is_manager_launch(request))
            .unwrap_or(false);
        if is_manager_launch {
            self.control.pre_start_manager();
            info!("Manager launch requested via {}, attach window open", self.host_package);
        }
        Ok(())
    }
}

/// Asks the arbiter about every new process record and flags the one
/// authorized as the manager.
///
/// The hooked method takes `(pid, uid, process_name)`. On authorization the
/// return value becomes `true`, telling the runtime to inject the manager.
pub struct SystemAttachHooker {
    control: Arc<dyn ManagerControl>,
}

impl SystemAttachHooker {
    pub fn new(control: Arc<dyn ManagerControl>) -> Self {
        Self { control }
    }
}

impl Hooker for SystemAttachHooker {
    fn name(&self) -> &str {
        "system-attach"
    }

    fn after(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        if ctx.has_throwable() {
            return Ok(());
        }
        let pid = ctx.arg(0).and_then(Value::as_int);
        let uid = ctx.arg(1).and_then(Value::as_int);
        let name = ctx.arg(2).and_then(Value::as_str);
        let (Some(pid), Some(uid), Some(name)) = (pid, uid, name) else {
            anyhow::bail!("unexpected process record arguments: {:?}", ctx.args());
        };
        let pid = Pid(i32::try_from(pid)?);
        let uid = Uid(u32::try_from(uid)?);
        if self.control.should_start_manager(pid, uid, name) {
            debug!("Process {} ({}) flagged for manager injection", pid, name);
            ctx.set_result(Value::Bool(true));
        }
        Ok(())
    }
}
