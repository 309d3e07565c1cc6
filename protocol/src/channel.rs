//! Channel handles and the liveness capability used to watch them.
//!
//! A channel is opaque to xhook. The only things the core needs from it are
//! an identity (`ChannelHandle`) and a way to learn that the peer died
//! (`Liveness`). Platform bindings implement `Liveness` over their own death
//! notification primitive; `LocalChannel` is the in-process implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identity of a channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub u64);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{:x}", self.0)
    }
}

/// Token returned by `Liveness::link_to_death`, used to unlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeathLink(pub u64);

/// Invoked at most once when the peer of a channel dies.
pub type DeathCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("{0} is already dead")]
    Dead(ChannelHandle),

    #[error("failed to watch {handle}: {reason}")]
    SubscribeFailed { handle: ChannelHandle, reason: String },
}

/// Subscribe/notify capability over a channel's peer liveness.
pub trait Liveness: Send + Sync {
    fn handle(&self) -> ChannelHandle;

    /// Register `on_death` to run when the peer dies.
    ///
    /// Fails with `ChannelError::Dead` if the peer is already gone; the
    /// callback is dropped without running in that case. Guards link while
    /// holding their session lock, so implementations must not re-enter the
    /// caller.
    fn link_to_death(&self, on_death: DeathCallback) -> Result<DeathLink, ChannelError>;

    /// Remove a previously registered callback. Unknown links are ignored.
    fn unlink_to_death(&self, link: DeathLink);

    /// Non-blocking probe.
    fn is_alive(&self) -> bool;
}

/// In-process channel whose death is triggered explicitly with `kill()`.
pub struct LocalChannel {
    handle: ChannelHandle,
    alive: AtomicBool,
    next_link: AtomicU64,
    recipients: Mutex<HashMap<u64, DeathCallback>>,
}

impl LocalChannel {
    pub fn new(handle: ChannelHandle) -> Self {
        Self {
            handle,
            alive: AtomicBool::new(true),
            next_link: AtomicU64::new(1),
            recipients: Mutex::new(HashMap::new()),
        }
    }

    /// Mark the peer dead and run every linked recipient exactly once.
    ///
    /// Recipients run outside the internal lock, so they may call back into
    /// this channel.
    pub fn kill(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let recipients: Vec<DeathCallback> = {
            let mut map = self.recipients.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, cb)| cb).collect()
        };
        debug!("{} died, notifying {} recipient(s)", self.handle, recipients.len());
        for cb in recipients {
            cb();
        }
    }

    /// Number of currently linked recipients.
    pub fn linked(&self) -> usize {
        self.recipients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Liveness for LocalChannel {
    fn handle(&self) -> ChannelHandle {
        self.handle
    }

    fn link_to_death(&self, on_death: DeathCallback) -> Result<DeathLink, ChannelError> {
        let mut map = self.recipients.lock().unwrap_or_else(|e| e.into_inner());
        // Checked under the lock so a concurrent kill() either sees this
        // recipient or we see the dead flag.
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ChannelError::Dead(self.handle));
        }
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        map.insert(id, on_death);
        Ok(DeathLink(id))
    }

    fn unlink_to_death(&self, link: DeathLink) {
        self.recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&link.0);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
