use std::sync::Arc;

use log::debug;
use xhook_intercept::{CallContext, Hooker, Value};

use crate::logging::ModuleLog;

/// Records uncaught throwables to the module log before the runtime's own
/// crash handling runs. Never fails and never changes the outcome.
pub struct CrashDumpHooker {
    log: Arc<ModuleLog>,
}

impl CrashDumpHooker {
    pub fn new(log: Arc<ModuleLog>) -> Self {
        Self { log }
    }
}

impl Hooker for CrashDumpHooker {
    fn name(&self) -> &str {
        "crash-dump"
    }

    fn before(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        match ctx.arg(0).and_then(Value::as_throwable) {
            Some(t) => {
                self.log
                    .log(format!("Crash unexpectedly: {}", t.stack_trace()));
            }
            None => debug!("Crash point of {} called without a throwable", ctx.method()),
        }
        Ok(())
    }
}
