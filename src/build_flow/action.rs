//! Build actions
//!
//! The scheduler decides *when* a component builds; a [`BuildAction`] decides
//! *what* building means (invoking a compiler, running tests, packaging).

use async_trait::async_trait;
use std::sync::Arc;

/// Context handed to a build action (immutable, clonable)
#[derive(Debug, Clone)]
pub struct BuildCtx {
    /// Identifier of the build run this invocation belongs to
    pub run_id: String,
    /// Component being built
    pub component: String,
    /// Its direct dependencies, in declaration order
    pub dependencies: Arc<[String]>,
}

impl BuildCtx {
    pub fn new(
        run_id: impl Into<String>,
        component: impl Into<String>,
        dependencies: impl Into<Arc<[String]>>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            component: component.into(),
            dependencies: dependencies.into(),
        }
    }
}

/// The per-component build step.
///
/// Returning an error marks the component as failed; under the default
/// failure policy its dependents are then reported as blocked.
#[async_trait]
pub trait BuildAction: Send + Sync {
    /// Get the name of this action
    fn name(&self) -> &str;

    /// Build one component
    async fn perform_build(&self, ctx: &BuildCtx) -> anyhow::Result<()>;
}

/// Default action: records that the component was built and does nothing else.
pub struct LoggingBuildAction;

#[async_trait]
impl BuildAction for LoggingBuildAction {
    fn name(&self) -> &str {
        "log"
    }

    async fn perform_build(&self, ctx: &BuildCtx) -> anyhow::Result<()> {
        tracing::info!(
            "Simulating changes for files associated with: {}",
            ctx.component
        );
        Ok(())
    }
}

/// Wraps a plain closure as a build action.
pub struct FnBuildAction<F> {
    name: String,
    func: F,
}

impl<F> FnBuildAction<F>
where
    F: Fn(&BuildCtx) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> BuildAction for FnBuildAction<F>
where
    F: Fn(&BuildCtx) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_build(&self, ctx: &BuildCtx) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}
