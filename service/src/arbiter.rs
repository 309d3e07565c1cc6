//! Attach arbitration: which spawned process may become the manager.
//!
//! The arbiter owns the single session record of a service instance. Every
//! transition is a read-modify-write under one lock; guards installed here
//! clear themselves from the record through a weak reference when their
//! channel dies, so a dead session never keeps its guard alive.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info};
use xhook_protocol::{Liveness, ManagerIdentity, Pid, Uid};

use crate::guard::{AuxiliaryBinding, Guard, GuardError};

/// Observable arbitration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Idle,
    /// A manager launch was announced and no candidate has claimed it yet.
    PendingAttach,
    Authorized(Pid),
}

#[derive(Debug)]
struct SessionState {
    pending: bool,
    authorized: Option<Pid>,
    enabled: bool,
    guard: Option<Guard>,
    next_guard: u64,
}

pub struct AttachArbiter {
    expected: ManagerIdentity,
    session: Arc<Mutex<SessionState>>,
}

fn lock(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

impl AttachArbiter {
    pub fn new(expected: ManagerIdentity, enabled: bool) -> Self {
        Self {
            expected,
            session: Arc::new(Mutex::new(SessionState {
                pending: false,
                authorized: None,
                enabled,
                guard: None,
                next_guard: 1,
            })),
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.session)
    }

    pub fn expected(&self) -> &ManagerIdentity {
        &self.expected
    }

    pub fn state(&self) -> AttachState {
        let s = self.session();
        if s.pending {
            AttachState::PendingAttach
        } else if let Some(pid) = s.authorized {
            AttachState::Authorized(pid)
        } else {
            AttachState::Idle
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.session().enabled
    }

    /// Open the attach window. Clears any earlier authorization.
    pub fn pre_start(&self) -> bool {
        let mut s = self.session();
        s.pending = true;
        if let Some(pid) = s.authorized.take() {
            debug!("Attach window reopened, dropping authorization of pid {}", pid);
        }
        true
    }

    /// Claim the open window for `pid`.
    ///
    /// One-shot: the window closes on success. Any mismatch leaves the state
    /// untouched, including an open window.
    pub fn should_start(&self, pid: Pid, uid: Uid, process_name: &str) -> bool {
        let mut s = self.session();
        if !s.enabled {
            debug!("Rejecting manager candidate pid {}: arbitration disabled", pid);
            return false;
        }
        if !s.pending {
            debug!("Rejecting manager candidate pid {}: no attach window", pid);
            return false;
        }
        if !self.expected.matches(uid, process_name) {
            debug!(
                "Rejecting manager candidate pid {} (uid {}, {}): identity mismatch",
                pid, uid, process_name
            );
            return false;
        }
        s.pending = false;
        s.authorized = Some(pid);
        info!("Authorized manager candidate pid {} (uid {})", pid, uid);
        true
    }

    /// True iff `(pid, uid)` is the authorized candidate and arbitration is on.
    pub fn post_start(&self, pid: Pid, uid: Uid) -> bool {
        let s = self.session();
        s.enabled && self.expected.matches_uid(uid) && s.authorized == Some(pid)
    }

    /// Toggle arbitration. Disabling revokes the open window and any
    /// authorization, so re-enabling requires a fresh `pre_start`.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut s = self.session();
        s.enabled = enabled;
        if !enabled {
            s.pending = false;
            s.authorized = None;
        }
        info!("Manager arbitration enabled = {}", enabled);
        s.enabled
    }

    /// Watch `channel` on behalf of the authorized `(pid, uid)`.
    ///
    /// The authorization check and the store happen under one lock, so a
    /// concurrent `set_enabled(false)` or `pre_start` either lands first and
    /// the call fails with `NotAuthorized`, or lands after the guard is in.
    /// Replaces any earlier guard. When the channel dies the guard removes
    /// itself and revokes the authorization it was installed for.
    pub fn install_guard(
        &self,
        channel: Arc<dyn Liveness>,
        pid: Pid,
        uid: Uid,
        auxiliary: Option<Arc<dyn AuxiliaryBinding>>,
    ) -> Result<(), GuardError> {
        let mut s = self.session();
        if !(s.enabled && self.expected.matches_uid(uid) && s.authorized == Some(pid)) {
            return Err(GuardError::NotAuthorized { pid, uid });
        }
        let id = s.next_guard;
        s.next_guard += 1;

        let weak: Weak<Mutex<SessionState>> = Arc::downgrade(&self.session);
        let on_death = Box::new(move || on_channel_death(weak, id));
        // Linked under the session lock: a concurrent death waits for the
        // guard to be stored before looking for it.
        let guard = Guard::bind(id, channel, pid, uid, auxiliary, on_death)?;
        info!("Installed guard {} on {} for manager pid {}", id, guard.handle(), pid);

        let previous = s.guard.replace(guard);
        drop(s);
        if let Some(old) = previous {
            debug!("Guard {} replaced by {}", old.id(), id);
            old.release();
        }
        Ok(())
    }

    /// Drop the current guard, if any. Authorization is left as is.
    pub fn clear_guard(&self) -> bool {
        let guard = self.session().guard.take();
        match guard {
            Some(g) => {
                g.release();
                true
            }
            None => false,
        }
    }

    pub fn has_guard(&self) -> bool {
        self.session().guard.is_some()
    }

    /// Liveness of the guarded channel; false without a guard.
    pub fn guard_alive(&self) -> bool {
        self.session()
            .guard
            .as_ref()
            .map(Guard::is_alive)
            .unwrap_or(false)
    }

    /// Whether a live guard is bound to exactly `(pid, uid)`.
    pub fn is_guarding(&self, pid: Pid, uid: Uid) -> bool {
        self.session()
            .guard
            .as_ref()
            .map(|g| g.pid() == pid && g.uid() == uid && g.is_alive())
            .unwrap_or(false)
    }
}

impl Drop for AttachArbiter {
    fn drop(&mut self) {
        let guard = lock(&self.session).guard.take();
        if let Some(g) = guard {
            g.release();
        }
    }
}

fn on_channel_death(session: Weak<Mutex<SessionState>>, id: u64) {
    let Some(session) = session.upgrade() else {
        return;
    };
    let guard = {
        let mut s = lock(&session);
        if s.guard.as_ref().map(Guard::id) == Some(id) {
            let guard = s.guard.take();
            let pid = guard.as_ref().map(Guard::pid);
            if pid.is_some() && s.authorized == pid {
                s.authorized = None;
            }
            guard
        } else {
            None
        }
    };
    match guard {
        Some(g) => {
            info!("Manager pid {} died, guard {} cleared", g.pid(), id);
            g.release();
        }
        None => debug!("Death of stale guard {} ignored", id),
    }
}
