//! Liveness guard over the channel handed to an authorized manager.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use xhook_protocol::{ChannelError, ChannelHandle, DeathCallback, DeathLink, Liveness, Pid, Uid};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("cannot watch manager channel: {0}")]
    Channel(#[from] ChannelError),

    #[error("auxiliary binding failed: {0}")]
    Auxiliary(String),

    #[error("pid {pid} (uid {uid}) is not the authorized manager")]
    NotAuthorized { pid: Pid, uid: Uid },
}

/// A platform service kept bound for as long as the manager lives.
///
/// `bind` runs while the arbiter holds its session lock and must not call
/// back into the arbiter or the service that owns it.
pub trait AuxiliaryBinding: Send + Sync {
    fn bind(&self) -> anyhow::Result<()>;
    fn unbind(&self);
}

/// Binds one authenticated channel to the session that granted it.
///
/// Dropping a `Guard` without `release` leaves its death link in place; the
/// session always releases guards it removes.
pub struct Guard {
    id: u64,
    channel: Arc<dyn Liveness>,
    link: DeathLink,
    pid: Pid,
    uid: Uid,
    auxiliary: Option<Arc<dyn AuxiliaryBinding>>,
}

impl Guard {
    /// Link `on_death` to `channel` and bind the auxiliary service.
    ///
    /// On any failure nothing stays linked or bound.
    pub(crate) fn bind(
        id: u64,
        channel: Arc<dyn Liveness>,
        pid: Pid,
        uid: Uid,
        auxiliary: Option<Arc<dyn AuxiliaryBinding>>,
        on_death: DeathCallback,
    ) -> Result<Self, GuardError> {
        let link = channel.link_to_death(on_death)?;
        if let Some(aux) = &auxiliary {
            if let Err(e) = aux.bind() {
                channel.unlink_to_death(link);
                return Err(GuardError::Auxiliary(format!("{:#}", e)));
            }
        }
        debug!("Guard {} linked to {} for pid {}", id, channel.handle(), pid);
        Ok(Self {
            id,
            channel,
            link,
            pid,
            uid,
            auxiliary,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn handle(&self) -> ChannelHandle {
        self.channel.handle()
    }

    /// Non-blocking probe of the watched channel.
    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    /// Unlink from the channel and unbind the auxiliary service.
    pub(crate) fn release(self) {
        self.channel.unlink_to_death(self.link);
        if let Some(aux) = &self.auxiliary {
            aux.unbind();
        }
        if self.channel.is_alive() {
            debug!("Guard {} released while {} is still alive", self.id, self.handle());
        } else {
            warn!("Manager channel {} of pid {} lost", self.handle(), self.pid);
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("pid", &self.pid)
            .field("uid", &self.uid)
            .field("auxiliary", &self.auxiliary.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xhook_protocol::LocalChannel;

    #[derive(Default)]
    struct CountingBinding {
        bound: AtomicUsize,
        unbound: AtomicUsize,
        refuse: bool,
    }

    impl AuxiliaryBinding for CountingBinding {
        fn bind(&self) -> anyhow::Result<()> {
            if self.refuse {
                anyhow::bail!("service unavailable");
            }
            self.bound.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unbind(&self) {
            self.unbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_bind_links_and_release_unlinks() {
        let ch = Arc::new(LocalChannel::new(ChannelHandle(1)));
        let aux = Arc::new(CountingBinding::default());
        let guard = Guard::bind(
            1,
            ch.clone(),
            Pid(10),
            Uid(2000),
            Some(aux.clone()),
            Box::new(|| {}),
        )
        .unwrap();
        assert_eq!(ch.linked(), 1);
        assert_eq!(aux.bound.load(Ordering::SeqCst), 1);
        assert!(guard.is_alive());

        guard.release();
        assert_eq!(ch.linked(), 0);
        assert_eq!(aux.unbound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_channel_is_refused() {
        let ch = Arc::new(LocalChannel::new(ChannelHandle(2)));
        ch.kill();
        let err = Guard::bind(1, ch, Pid(1), Uid(1), None, Box::new(|| {})).unwrap_err();
        assert!(matches!(err, GuardError::Channel(ChannelError::Dead(_))));
    }

    #[test]
    fn test_failed_auxiliary_unlinks() {
        let ch = Arc::new(LocalChannel::new(ChannelHandle(3)));
        let aux = Arc::new(CountingBinding {
            refuse: true,
            ..Default::default()
        });
        let err = Guard::bind(1, ch.clone(), Pid(1), Uid(1), Some(aux), Box::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, GuardError::Auxiliary(_)));
        assert_eq!(ch.linked(), 0);
    }
}
