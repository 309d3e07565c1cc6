//! Per-process side of xhook: the bootstrap sequencer and the hooker
//! adapters it installs.
//!
//! The host runtime reports every forked process with a `ProcessCreated`
//! event. `Sequencer::fork_common` configures logging, installs the lifecycle
//! interception points, applies the module log setting, then either starts
//! the manager (when this process is the authorized manager) or lets the
//! attach hook load modules.

pub mod bootstrap;
pub mod hookers;
pub mod logging;

pub use bootstrap::{
    current_process, BootstrapError, Branch, LifecycleMethods, ManagerStartup, Sequencer,
    ServiceManagerStartup,
};
pub use hookers::{
    AttachHooker, CrashDumpHooker, ManagerLaunchHooker, ModuleLoader, SystemAttachHooker,
    MANAGER_LAUNCH_MARKER,
};
pub use logging::{init_logging, ModuleLog, MODULE_TARGET};
pub use xhook_protocol::ApplicationService;

#[cfg(test)]
mod tests;
