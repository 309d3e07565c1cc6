//! Process logging: framework diagnostics and the module-facing sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::info;

/// Log target of module-facing output.
pub const MODULE_TARGET: &str = "xhook::module";

const RECENT_LINES: usize = 64;

/// Initialize `env_logger` for this process. `RUST_LOG` wins over `verbose`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

/// Log sink for output meant for module authors (crash dumps, load results).
///
/// Muting only silences this sink; framework diagnostics keep flowing.
pub struct ModuleLog {
    muted: AtomicBool,
    recent: Mutex<VecDeque<String>>,
}

impl Default for ModuleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLog {
    pub fn new() -> Self {
        Self {
            muted: AtomicBool::new(false),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_LINES)),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Emit `line` unless muted. Returns whether it was emitted.
    pub fn log(&self, line: impl Into<String>) -> bool {
        if self.is_muted() {
            return false;
        }
        let line = line.into();
        info!(target: MODULE_TARGET, "{}", line);
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_LINES {
            recent.pop_front();
        }
        recent.push_back(line);
        true
    }

    /// Most recent emitted lines, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
