//! Common types shared between the xhook system service and app processes.

pub mod channel;
pub mod config;
pub mod control;
pub mod event;
pub mod identity;

pub use channel::{ChannelError, ChannelHandle, DeathCallback, DeathLink, Liveness, LocalChannel};
pub use config::{ConfigError, XhookConfig};
pub use control::{ApplicationService, ManagerControl};
pub use event::{ModuleArguments, ProcessCreated};
pub use identity::{ManagerIdentity, Pid, Uid};
