use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use log::{debug, info};
use xhook_intercept::{CallContext, Hooker, Value};
use xhook_protocol::ModuleArguments;

use crate::bootstrap::Branch;

/// Loads the modules enabled for this process into the attached application.
pub trait ModuleLoader: Send + Sync {
    /// Returns the number of modules loaded.
    fn load_modules(&self, app: &Value, args: &ModuleArguments) -> anyhow::Result<usize>;
}

/// Loads modules once the application object has attached.
///
/// Inert unless this process took the module-loading branch.
pub struct AttachHooker {
    loader: Arc<dyn ModuleLoader>,
    args: ModuleArguments,
    branch: Arc<OnceLock<Branch>>,
}

impl AttachHooker {
    pub fn new(loader: Arc<dyn ModuleLoader>, args: ModuleArguments, branch: Arc<OnceLock<Branch>>) -> Self {
        Self { loader, args, branch }
    }
}

impl Hooker for AttachHooker {
    fn name(&self) -> &str {
        "attach"
    }

    fn after(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        if self.branch.get() != Some(&Branch::Modules) {
            debug!("Skipping module load: branch is {:?}", self.branch.get());
            return Ok(());
        }
        let app = ctx
            .this()
            .ok_or_else(|| anyhow!("{} attached without an application object", ctx.method()))?;
        let loaded = self.loader.load_modules(app, &self.args)?;
        info!("Loaded {} module(s)", loaded);
        Ok(())
    }
}
