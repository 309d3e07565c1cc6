//! Hooker adapters installed by the bootstrap sequencer.

mod attach;
mod crash;
mod manager;

pub use attach::{AttachHooker, ModuleLoader};
pub use crash::CrashDumpHooker;
pub use manager::{ManagerLaunchHooker, SystemAttachHooker, MANAGER_LAUNCH_MARKER};
