//! The privileged service's side of manager control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use xhook_protocol::{
    ApplicationService, ChannelError, ChannelHandle, Liveness, ManagerControl, ManagerIdentity, Pid,
    Uid, XhookConfig,
};

use crate::arbiter::{AttachArbiter, AttachState};
use crate::guard::{AuxiliaryBinding, GuardError};

/// Owns the attach session of one host service instance and hands the
/// control channel to the process it authorized.
pub struct ManagerService {
    expected: ManagerIdentity,
    enabled_at_start: bool,
    control: ChannelHandle,
    auxiliary: Option<Arc<dyn AuxiliaryBinding>>,
    log_muted: AtomicBool,
    arbiter: Mutex<Arc<AttachArbiter>>,
}

impl ManagerService {
    pub fn new(config: &XhookConfig, control: ChannelHandle) -> Self {
        Self {
            expected: config.manager.clone(),
            enabled_at_start: config.manager_enabled,
            control,
            auxiliary: None,
            log_muted: AtomicBool::new(config.log_muted),
            arbiter: Mutex::new(Arc::new(AttachArbiter::new(
                config.manager.clone(),
                config.manager_enabled,
            ))),
        }
    }

    /// Keep `binding` bound while a manager holds the channel.
    pub fn with_auxiliary(mut self, binding: Arc<dyn AuxiliaryBinding>) -> Self {
        self.auxiliary = Some(binding);
        self
    }

    fn slot(&self) -> MutexGuard<'_, Arc<AttachArbiter>> {
        self.arbiter.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current arbiter. Calls in flight keep the one they started with.
    pub fn arbiter(&self) -> Arc<AttachArbiter> {
        Arc::clone(&self.slot())
    }

    pub fn state(&self) -> AttachState {
        self.arbiter().state()
    }

    pub fn control_channel(&self) -> ChannelHandle {
        self.control
    }

    /// The host service process died: its channels are gone with it.
    pub fn on_host_service_died(&self) {
        if self.arbiter().clear_guard() {
            info!("Host service died, manager guard dropped");
        }
    }

    /// Start over with a fresh session, as after a host service restart.
    pub fn restart(&self) {
        let fresh = Arc::new(AttachArbiter::new(self.expected.clone(), self.enabled_at_start));
        let old = std::mem::replace(&mut *self.slot(), fresh);
        old.clear_guard();
        info!("Manager session reset");
    }

    /// Mute or unmute module logs in processes started from now on.
    pub fn set_log_muted(&self, muted: bool) {
        self.log_muted.store(muted, Ordering::Relaxed);
        info!("Module log muted = {}", muted);
    }

    /// Whether `(pid, uid)` holds the channel and its guard is still alive.
    pub fn is_running_manager(&self, pid: Pid, uid: Uid) -> bool {
        self.arbiter().is_guarding(pid, uid)
    }
}

impl ManagerControl for ManagerService {
    fn pre_start_manager(&self) -> bool {
        self.arbiter().pre_start()
    }

    fn should_start_manager(&self, pid: Pid, uid: Uid, process_name: &str) -> bool {
        self.arbiter().should_start(pid, uid, process_name)
    }

    fn post_start_manager(&self, pid: Pid, uid: Uid) -> bool {
        self.arbiter().post_start(pid, uid)
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        self.arbiter().set_enabled(enabled)
    }

    fn obtain_channel(
        &self,
        heartbeat: Arc<dyn Liveness>,
        pid: Pid,
        uid: Uid,
    ) -> Option<ChannelHandle> {
        match self
            .arbiter()
            .install_guard(heartbeat, pid, uid, self.auxiliary.clone())
        {
            Ok(()) => Some(self.control),
            Err(GuardError::NotAuthorized { .. }) => {
                debug!("Refusing control channel to pid {} (uid {})", pid, uid);
                None
            }
            Err(e) => {
                warn!("Cannot guard manager pid {}: {}", pid, e);
                None
            }
        }
    }
}

impl ApplicationService for ManagerService {
    fn is_log_muted(&self, channel: ChannelHandle) -> Result<bool, ChannelError> {
        let muted = self.log_muted.load(Ordering::Relaxed);
        debug!("Log mute query over {}: {}", channel, muted);
        Ok(muted)
    }
}
