//! Tests for the manager-control boundary of the service.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use xhook_protocol::{
    ApplicationService, ChannelHandle, LocalChannel, ManagerControl, Pid, Uid, XhookConfig,
};

use crate::arbiter::AttachState;
use crate::guard::AuxiliaryBinding;
use crate::service::ManagerService;

const CONTROL: ChannelHandle = ChannelHandle(0xc0);

fn config() -> XhookConfig {
    XhookConfig::from_yaml(
        r#"
manager:
  uid: 2000
  process_name: org.xhook.manager
"#,
    )
    .unwrap()
}

fn service() -> ManagerService {
    ManagerService::new(&config(), CONTROL)
}

fn heartbeat(n: u64) -> Arc<LocalChannel> {
    Arc::new(LocalChannel::new(ChannelHandle(n)))
}

fn start(svc: &ManagerService, pid: i32) {
    assert!(svc.pre_start_manager());
    assert!(svc.should_start_manager(Pid(pid), Uid(2000), "org.xhook.manager"));
}

#[derive(Default)]
struct Binding {
    binds: AtomicUsize,
    unbinds: AtomicUsize,
}

impl AuxiliaryBinding for Binding {
    fn bind(&self) -> anyhow::Result<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&self) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_obtain_channel_requires_authorization() {
    let svc = service();
    assert_eq!(svc.obtain_channel(heartbeat(1), Pid(5), Uid(2000)), None);

    start(&svc, 5);
    assert_eq!(svc.obtain_channel(heartbeat(1), Pid(6), Uid(2000)), None);
    assert_eq!(svc.obtain_channel(heartbeat(1), Pid(5), Uid(2000)), Some(CONTROL));
    assert!(svc.is_running_manager(Pid(5), Uid(2000)));
}

#[test]
fn test_heartbeat_death_ends_the_grant() {
    let svc = service();
    start(&svc, 5);
    let hb = heartbeat(1);
    svc.obtain_channel(hb.clone(), Pid(5), Uid(2000)).unwrap();

    hb.kill();
    assert!(!svc.is_running_manager(Pid(5), Uid(2000)));
    assert!(!svc.post_start_manager(Pid(5), Uid(2000)));

    start(&svc, 77);
    assert!(svc.post_start_manager(Pid(77), Uid(2000)));
}

#[test]
fn test_dead_heartbeat_is_refused() {
    let svc = service();
    start(&svc, 5);
    let hb = heartbeat(1);
    hb.kill();
    assert_eq!(svc.obtain_channel(hb, Pid(5), Uid(2000)), None);
    assert!(!svc.is_running_manager(Pid(5), Uid(2000)));
}

#[test]
fn test_disable_blocks_obtain_channel() {
    let svc = service();
    start(&svc, 5);
    assert!(!svc.set_enabled(false));
    assert_eq!(svc.obtain_channel(heartbeat(1), Pid(5), Uid(2000)), None);
    assert!(svc.set_enabled(true));
    assert_eq!(svc.obtain_channel(heartbeat(1), Pid(5), Uid(2000)), None);
}

/// Counts binds that happen after `revoked` was raised.
struct LateBinding {
    revoked: Arc<AtomicBool>,
    late: AtomicUsize,
}

impl AuxiliaryBinding for LateBinding {
    fn bind(&self) -> anyhow::Result<()> {
        if self.revoked.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn unbind(&self) {}
}

/// Races `revoke` against `obtain_channel` for an authorized pid and returns
/// how many grants were made after `revoke` had returned.
fn late_grants(revoke: fn(&ManagerService)) -> usize {
    let mut late = 0;
    for _ in 0..2000 {
        let revoked = Arc::new(AtomicBool::new(false));
        let binding = Arc::new(LateBinding {
            revoked: Arc::clone(&revoked),
            late: AtomicUsize::new(0),
        });
        let svc = Arc::new(service().with_auxiliary(binding.clone()));
        start(&svc, 5);

        let other = {
            let svc = Arc::clone(&svc);
            let revoked = Arc::clone(&revoked);
            std::thread::spawn(move || {
                revoke(&svc);
                revoked.store(true, Ordering::SeqCst);
            })
        };
        let granted = svc.obtain_channel(heartbeat(1), Pid(5), Uid(2000));
        other.join().unwrap();

        late += binding.late.load(Ordering::SeqCst);
        if granted.is_none() {
            assert!(!svc.is_running_manager(Pid(5), Uid(2000)));
        }
    }
    late
}

#[test]
fn test_disable_racing_obtain_channel_never_grants_late() {
    let late = late_grants(|svc| {
        svc.set_enabled(false);
    });
    assert_eq!(late, 0);
}

#[test]
fn test_reopened_window_racing_obtain_channel_never_grants_late() {
    let late = late_grants(|svc| {
        svc.pre_start_manager();
    });
    assert_eq!(late, 0);
}

#[test]
fn test_auxiliary_binding_follows_manager_lifetime() {
    let binding = Arc::new(Binding::default());
    let svc = service().with_auxiliary(binding.clone());
    start(&svc, 5);
    let hb = heartbeat(1);
    svc.obtain_channel(hb.clone(), Pid(5), Uid(2000)).unwrap();
    assert_eq!(binding.binds.load(Ordering::SeqCst), 1);
    assert_eq!(binding.unbinds.load(Ordering::SeqCst), 0);

    hb.kill();
    assert_eq!(binding.unbinds.load(Ordering::SeqCst), 1);
}

#[test]
fn test_host_service_death_drops_guard() {
    let svc = service();
    start(&svc, 5);
    let hb = heartbeat(1);
    svc.obtain_channel(hb.clone(), Pid(5), Uid(2000)).unwrap();

    svc.on_host_service_died();
    assert!(!svc.is_running_manager(Pid(5), Uid(2000)));
    assert_eq!(hb.linked(), 0);
}

#[test]
fn test_restart_gives_fresh_session() {
    let svc = service();
    start(&svc, 5);
    let hb = heartbeat(1);
    svc.obtain_channel(hb.clone(), Pid(5), Uid(2000)).unwrap();
    svc.set_enabled(false);

    svc.restart();
    assert_eq!(svc.state(), AttachState::Idle);
    assert!(svc.arbiter().is_enabled());
    assert!(!svc.post_start_manager(Pid(5), Uid(2000)));
    assert_eq!(hb.linked(), 0);

    start(&svc, 6);
    assert!(svc.post_start_manager(Pid(6), Uid(2000)));
}

#[test]
fn test_config_disabled_at_start() {
    let mut cfg = config();
    cfg.manager_enabled = false;
    let svc = ManagerService::new(&cfg, CONTROL);
    svc.pre_start_manager();
    assert!(!svc.should_start_manager(Pid(1), Uid(2000), "org.xhook.manager"));
}

#[test]
fn test_log_mute_follows_config() {
    assert!(!service().is_log_muted(ChannelHandle(3)).unwrap());

    let mut cfg = config();
    cfg.log_muted = true;
    let svc = ManagerService::new(&cfg, CONTROL);
    assert!(svc.is_log_muted(ChannelHandle(3)).unwrap());

    svc.set_log_muted(false);
    assert!(!svc.is_log_muted(ChannelHandle(3)).unwrap());
}
