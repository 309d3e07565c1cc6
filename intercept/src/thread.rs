//! Platform-specific thread ID retrieval.

/// Get the current thread ID in a cross-platform way.
#[cfg(unix)]
#[inline]
pub fn id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

/// Fallback for non-unix targets: a per-thread counter value.
#[cfg(not(unix))]
#[inline]
pub fn id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}
