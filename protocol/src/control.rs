//! The manager-control boundary between app-side hooks and the system service.
//!
//! These five calls, plus the log-mute query every app process makes, are the
//! only contract the hooking core has with the privileged service. Everything
//! else the service offers (package queries, log retrieval, flashing) is
//! platform glue outside of xhook.

use std::sync::Arc;

use crate::channel::{ChannelError, ChannelHandle, Liveness};
use crate::identity::{Pid, Uid};

/// Arbitration calls exposed by the privileged service.
///
/// Rejections are ordinary `false`/`None` results, never errors.
pub trait ManagerControl: Send + Sync {
    /// Open an attach window. Always succeeds.
    fn pre_start_manager(&self) -> bool;

    /// Claim the open window for a newly spawned candidate.
    fn should_start_manager(&self, pid: Pid, uid: Uid, process_name: &str) -> bool;

    /// Confirm that `(pid, uid)` is the candidate that claimed the window.
    fn post_start_manager(&self, pid: Pid, uid: Uid) -> bool;

    /// Toggle arbitration. Returns the new value.
    fn set_enabled(&self, enabled: bool) -> bool;

    /// Hand the privileged control channel to an authorized caller.
    ///
    /// `heartbeat` is the caller's own channel; its death revokes the grant.
    fn obtain_channel(
        &self,
        heartbeat: Arc<dyn Liveness>,
        pid: Pid,
        uid: Uid,
    ) -> Option<ChannelHandle>;
}

/// The per-process application service reached over a new process's channel.
pub trait ApplicationService: Send + Sync {
    /// Whether module-facing log output is muted for the process on `channel`.
    fn is_log_muted(&self, channel: ChannelHandle) -> Result<bool, ChannelError>;
}
