//! Per-method registration lists.
//!
//! Each hooked method owns an immutable `Arc<Vec<HookRegistration>>`.
//! Mutations clone the vector and swap the `Arc` under the lock; dispatch
//! takes a snapshot (one atomic increment) and iterates outside the lock, so
//! adapters may register or unregister while they run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::interceptor::listener::Hooker;
use crate::method::{MethodId, TargetMethod};
use crate::runtime::Runtime;
use crate::types::{CallbackToken, HookError, Result};

/// One adapter attached to one target method.
#[derive(Clone)]
pub struct HookRegistration {
    method: TargetMethod,
    hooker: Arc<dyn Hooker>,
    priority: i32,
    token: CallbackToken,
}

impl HookRegistration {
    pub fn method(&self) -> &TargetMethod {
        &self.method
    }

    pub fn hooker(&self) -> &Arc<dyn Hooker> {
        &self.hooker
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn token(&self) -> CallbackToken {
        self.token
    }
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("method", &self.method)
            .field("hooker", &self.hooker.name())
            .field("priority", &self.priority)
            .field("token", &self.token)
            .finish()
    }
}

/// Registrations of one method as they were at the moment of the call.
///
/// Ordered by ascending priority, then registration order. Later changes to
/// the registry are never visible through an existing snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    hooks: Arc<Vec<HookRegistration>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HookRegistration> {
        self.hooks.iter()
    }

    pub fn tokens(&self) -> Vec<CallbackToken> {
        self.hooks.iter().map(|h| h.token).collect()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a HookRegistration;
    type IntoIter = std::slice::Iter<'a, HookRegistration>;

    fn into_iter(self) -> Self::IntoIter {
        self.hooks.iter()
    }
}

struct Slot {
    method: TargetMethod,
    hooks: Arc<Vec<HookRegistration>>,
}

pub struct HookRegistry {
    runtime: Arc<dyn Runtime>,
    slots: Mutex<HashMap<MethodId, Slot>>,
    next_token: AtomicU64,
}

impl HookRegistry {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<MethodId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A token no other caller of this registry has been handed.
    pub fn next_token(&self) -> CallbackToken {
        CallbackToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach `hooker` to `method`.
    ///
    /// The first registration for a method binds its runtime slot; if that
    /// fails the registry is left unchanged.
    pub fn register(
        &self,
        method: &TargetMethod,
        hooker: Arc<dyn Hooker>,
        priority: i32,
        token: CallbackToken,
    ) -> Result<()> {
        let mut slots = self.slots();

        let slot = match slots.entry(method.id()) {
            Entry::Occupied(e) => {
                let slot = e.into_mut();
                if slot.hooks.iter().any(|h| h.token == token) {
                    return Err(HookError::AlreadyRegistered {
                        method: method.to_string(),
                        token,
                    });
                }
                slot
            }
            Entry::Vacant(e) => {
                self.runtime.bind(method)?;
                info!("Bound interception point for {}", method);
                e.insert(Slot {
                    method: method.clone(),
                    hooks: Arc::new(Vec::new()),
                })
            }
        };

        let registration = HookRegistration {
            method: method.clone(),
            hooker,
            priority,
            token,
        };

        let mut hooks = (*slot.hooks).clone();
        // Equal priorities keep registration order.
        let pos = hooks.partition_point(|h| h.priority <= priority);
        hooks.insert(pos, registration);
        slot.hooks = Arc::new(hooks);

        debug!(
            "Registered {} on {} (priority {}, {} total)",
            token,
            method,
            priority,
            slot.hooks.len()
        );
        Ok(())
    }

    /// Detach the registration `token` from `method`.
    ///
    /// Removing the last registration releases the runtime slot.
    pub fn unregister(&self, method: &TargetMethod, token: CallbackToken) -> Result<()> {
        let mut slots = self.slots();

        let not_found = || HookError::NotFound {
            method: method.to_string(),
            token,
        };
        let slot = slots.get_mut(&method.id()).ok_or_else(not_found)?;
        let pos = slot
            .hooks
            .iter()
            .position(|h| h.token == token)
            .ok_or_else(not_found)?;

        let mut hooks = (*slot.hooks).clone();
        hooks.remove(pos);
        debug!("Unregistered {} from {} ({} left)", token, method, hooks.len());

        if hooks.is_empty() {
            slots.remove(&method.id());
            // Released under the lock so a racing register() rebinds after us.
            self.runtime.release(method);
            info!("Released interception point for {}", method);
        } else {
            slot.hooks = Arc::new(hooks);
        }
        Ok(())
    }

    /// Registrations of `method` at this instant.
    pub fn snapshot(&self, method: &TargetMethod) -> Snapshot {
        match self.slots().get(&method.id()) {
            Some(slot) => Snapshot {
                hooks: Arc::clone(&slot.hooks),
            },
            None => Snapshot::default(),
        }
    }

    pub fn is_hooked(&self, method: &TargetMethod) -> bool {
        self.slots().contains_key(&method.id())
    }

    /// Methods with at least one live registration.
    pub fn hooked_methods(&self) -> Vec<TargetMethod> {
        let mut methods: Vec<TargetMethod> =
            self.slots().values().map(|s| s.method.clone()).collect();
        methods.sort_by_key(|m| m.id());
        methods
    }

    /// Ask the runtime to drop compiled code for `method`.
    pub fn deoptimize(&self, method: &TargetMethod) -> bool {
        let ok = self.runtime.deoptimize(method);
        debug!("Deoptimize {}: {}", method, if ok { "done" } else { "declined" });
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::listener::CallListener;
    use crate::method::MethodSpec;
    use crate::mock::MockRuntime;
    use crate::types::Value;

    fn setup() -> (Arc<MockRuntime>, HookRegistry, TargetMethod) {
        let rt = Arc::new(MockRuntime::new());
        let m = rt.define(MethodSpec::instance("a.B", "run", &["int"]), |_, args| {
            Ok(args[0].clone())
        });
        let reg = HookRegistry::new(rt.clone());
        (rt, reg, m)
    }

    fn hooker(name: &str) -> Arc<dyn Hooker> {
        Arc::new(CallListener::new(name))
    }

    #[test]
    fn test_snapshot_orders_by_priority_then_registration() {
        let (_rt, reg, m) = setup();
        reg.register(&m, hooker("a"), 10, CallbackToken(1)).unwrap();
        reg.register(&m, hooker("b"), -5, CallbackToken(2)).unwrap();
        reg.register(&m, hooker("c"), 10, CallbackToken(3)).unwrap();
        reg.register(&m, hooker("d"), 0, CallbackToken(4)).unwrap();
        reg.register(&m, hooker("e"), -5, CallbackToken(5)).unwrap();

        let snap = reg.snapshot(&m);
        assert_eq!(
            snap.tokens(),
            vec![
                CallbackToken(2),
                CallbackToken(5),
                CallbackToken(4),
                CallbackToken(1),
                CallbackToken(3)
            ]
        );
        let names: Vec<&str> = snap.iter().map(|h| h.hooker().name()).collect();
        assert_eq!(names, vec!["b", "e", "d", "a", "c"]);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let (_rt, reg, m) = setup();
        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        let err = reg.register(&m, hooker("b"), 5, CallbackToken(1)).unwrap_err();
        assert!(matches!(err, HookError::AlreadyRegistered { .. }));
        assert_eq!(reg.snapshot(&m).len(), 1);
    }

    #[test]
    fn test_same_token_on_other_method_is_fine() {
        let (rt, reg, m) = setup();
        let other = rt.define(MethodSpec::instance("a.B", "stop", &[]), |_, _| Ok(Value::Null));
        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        reg.register(&other, hooker("a"), 0, CallbackToken(1)).unwrap();
        assert_eq!(reg.hooked_methods().len(), 2);
    }

    #[test]
    fn test_unbindable_target_is_unresolved() {
        let (rt, reg, m) = setup();
        rt.refuse_bind(&m);
        let err = reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap_err();
        assert!(matches!(err, HookError::UnresolvedTarget { .. }));
        assert!(!reg.is_hooked(&m));
        assert!(reg.snapshot(&m).is_empty());
    }

    #[test]
    fn test_bind_happens_once_per_method() {
        let (rt, reg, m) = setup();
        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        reg.register(&m, hooker("b"), 0, CallbackToken(2)).unwrap();
        assert_eq!(rt.bind_count(&m), 1);
        assert!(rt.is_bound(&m));
    }

    #[test]
    fn test_unregister_unknown_is_not_found() {
        let (_rt, reg, m) = setup();
        let err = reg.unregister(&m, CallbackToken(9)).unwrap_err();
        assert!(matches!(err, HookError::NotFound { .. }));

        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        let err = reg.unregister(&m, CallbackToken(9)).unwrap_err();
        assert!(matches!(err, HookError::NotFound { .. }));
    }

    #[test]
    fn test_unregister_last_releases_slot() {
        let (rt, reg, m) = setup();
        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        reg.register(&m, hooker("b"), 0, CallbackToken(2)).unwrap();

        reg.unregister(&m, CallbackToken(1)).unwrap();
        assert!(rt.is_bound(&m));
        assert_eq!(reg.snapshot(&m).tokens(), vec![CallbackToken(2)]);

        reg.unregister(&m, CallbackToken(2)).unwrap();
        assert!(reg.snapshot(&m).is_empty());
        assert!(!rt.is_bound(&m));
        assert_eq!(rt.released(), vec![m.id()]);
        assert!(reg.hooked_methods().is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let (_rt, reg, m) = setup();
        reg.register(&m, hooker("a"), 0, CallbackToken(1)).unwrap();
        let snap = reg.snapshot(&m);

        reg.register(&m, hooker("b"), 0, CallbackToken(2)).unwrap();
        reg.unregister(&m, CallbackToken(1)).unwrap();

        assert_eq!(snap.tokens(), vec![CallbackToken(1)]);
        assert_eq!(reg.snapshot(&m).tokens(), vec![CallbackToken(2)]);
    }

    #[test]
    fn test_concurrent_registration_keeps_every_entry() {
        let (_rt, reg, m) = setup();
        let reg = Arc::new(reg);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                let m = m.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let token = reg.next_token();
                        reg.register(&m, hooker("x"), (t * i) % 7, token).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = reg.snapshot(&m);
        assert_eq!(snap.len(), 200);
        let prios: Vec<i32> = snap.iter().map(|h| h.priority()).collect();
        assert!(prios.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_deoptimize_forwards_to_runtime() {
        let (rt, reg, m) = setup();
        assert!(reg.deoptimize(&m));
        assert_eq!(rt.deoptimized(), vec![m.id()]);
    }
}
