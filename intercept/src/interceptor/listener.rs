use crate::interceptor::invocation::CallContext;

/// Before/after logic attached to a target method.
///
/// Every adapter has the same two entry points. The dispatcher never assumes
/// either is failure-free: an `Err` or a panic is recorded as an adapter
/// fault and the remaining adapters still run.
pub trait Hooker: Send + Sync {
    /// Name used in fault logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn after(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

pub type BeforeCallback = Box<dyn Fn(&mut CallContext) -> anyhow::Result<()> + Send + Sync>;
pub type AfterCallback = Box<dyn Fn(&mut CallContext) -> anyhow::Result<()> + Send + Sync>;

/// A `Hooker` assembled from closures.
pub struct CallListener {
    name: String,
    on_before: Option<BeforeCallback>,
    on_after: Option<AfterCallback>,
}

impl CallListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_before: None,
            on_after: None,
        }
    }

    pub fn on_before<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut CallContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_before = Some(Box::new(f));
        self
    }

    pub fn on_after<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut CallContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_after = Some(Box::new(f));
        self
    }
}

impl Hooker for CallListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        match &self.on_before {
            Some(cb) => cb(ctx),
            None => Ok(()),
        }
    }

    fn after(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        match &self.on_after {
            Some(cb) => cb(ctx),
            None => Ok(()),
        }
    }
}
