//! Build scheduler
//!
//! `build(name)` walks the graph depth-first with fork-join at every node:
//!
//! 1. Gate: an unchanged component is skipped (and, under
//!    [`TraversalPolicy::GateFirst`], so is everything beneath it)
//! 2. Fork: every direct dependency is submitted to the worker pool
//! 3. Join: wait for all of them
//! 4. Build: run the [`BuildAction`] for the component under a pool permit,
//!    unless a dependency failed and the policy is [`FailurePolicy::Block`]
//! 5. Clear: drop the component's change mark, whatever the outcome
//!
//! Each call is one *pass*. Within a pass every component is visited at most
//! once; a component reached through several paths (a diamond) is built by
//! the first visitor and the others wait on its outcome.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::action::{BuildAction, BuildCtx, LoggingBuildAction};
use super::changes::ChangeTracker;
use super::component::Component;
use super::events::{BuildEvent, BuildEventEnvelope, EventSink, LoggingEventSink};
use super::graph::DependencyGraph;
use super::pool::{ShutdownStatus, WorkerPool};
use crate::core::config::{BuildConfig, FailurePolicy, TraversalPolicy};
use crate::core::errors::{BuildError, Result};

/// Result of visiting one component during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The build action ran and succeeded
    Built,
    /// The component was not marked changed
    Skipped,
    /// The build action returned an error or panicked
    Failed { error: String },
    /// A dependency did not build, so the action was not run
    Blocked { dependency: String },
    /// The work never ran to completion (pool shut down, task cancelled)
    Interrupted { reason: String },
}

impl NodeOutcome {
    /// Whether dependents may safely build on top of this component.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built | Self::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub component: String,
    pub outcome: NodeOutcome,
    pub duration_ms: u64,
}

/// Everything that happened during one pass, in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: String,
    pub targets: Vec<String>,
    pub nodes: Vec<NodeReport>,
    pub overall_success: bool,
}

impl BuildReport {
    pub fn outcome_of(&self, component: &str) -> Option<&NodeOutcome> {
        self.nodes
            .iter()
            .find(|n| n.component == component)
            .map(|n| &n.outcome)
    }

    /// Components whose build action ran successfully, in completion order.
    pub fn built(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.outcome == NodeOutcome::Built)
            .map(|n| n.component.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&NodeReport> {
        self.nodes
            .iter()
            .filter(|n| !n.outcome.is_success())
            .collect()
    }
}

/// Per-call bookkeeping.
struct BuildPass {
    run_id: String,
    visits: DashMap<String, Arc<OnceCell<NodeOutcome>>>,
    reports: Mutex<Vec<NodeReport>>,
}

impl BuildPass {
    fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            visits: DashMap::new(),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, component: String, outcome: NodeOutcome, started: Instant) -> NodeOutcome {
        self.reports.lock().push(NodeReport {
            component,
            outcome: outcome.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        outcome
    }

    /// Record an outcome the component's own visit never got to record.
    fn record_missing(&self, component: &str, outcome: NodeOutcome, started: Instant) {
        let mut reports = self.reports.lock();
        if reports.iter().any(|r| r.component == component) {
            return;
        }
        reports.push(NodeReport {
            component: component.to_string(),
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    fn into_report(self, targets: Vec<String>) -> BuildReport {
        let nodes = self.reports.into_inner();
        let overall_success = nodes.iter().all(|n| n.outcome.is_success());
        BuildReport {
            run_id: self.run_id,
            targets,
            nodes,
            overall_success,
        }
    }
}

struct SchedulerInner {
    graph: DependencyGraph,
    changes: ChangeTracker,
    pool: WorkerPool,
    action: Arc<dyn BuildAction>,
    config: BuildConfig,
    event_sinks: Vec<Arc<dyn EventSink>>,
}

impl SchedulerInner {
    fn emit(&self, pass: &BuildPass, event: BuildEvent) {
        let envelope = BuildEventEnvelope::new(pass.run_id.clone(), event);
        for sink in &self.event_sinks {
            sink.emit(&envelope);
        }
    }

    /// Visit `name` once per pass; later visitors share the first outcome.
    fn visit(self: Arc<Self>, pass: Arc<BuildPass>, name: String) -> BoxFuture<'static, NodeOutcome> {
        async move {
            let cell = pass.visits.entry(name.clone()).or_default().clone();
            cell.get_or_init(|| self.build_node(pass.clone(), name))
                .await
                .clone()
        }
        .boxed()
    }

    async fn build_node(self: Arc<Self>, pass: Arc<BuildPass>, name: String) -> NodeOutcome {
        let started = Instant::now();

        let Some(dependencies) = self.graph.dependencies_of(&name).map(<[String]>::to_vec) else {
            warn!("Component '{}' disappeared from the graph", name);
            let outcome = NodeOutcome::Failed {
                error: BuildError::not_found(&name).to_string(),
            };
            return pass.record(name, outcome, started);
        };

        let changed = self.changes.is_changed(&name);
        if !changed && self.config.traversal == TraversalPolicy::GateFirst {
            debug!("'{}' is unchanged; skipping it and its dependencies", name);
            self.emit(&pass, BuildEvent::Skipped { component: name.clone() });
            return pass.record(name, NodeOutcome::Skipped, started);
        }

        let children = self.clone().build_dependencies(&pass, &name, &dependencies).await;
        let blocking = children
            .iter()
            .find(|(_, outcome)| !outcome.is_success())
            .map(|(dep, _)| dep.clone());

        let outcome = match blocking {
            Some(dependency) if !changed || self.config.on_failure == FailurePolicy::Block => {
                self.emit(
                    &pass,
                    BuildEvent::Blocked {
                        component: name.clone(),
                        dependency: dependency.clone(),
                    },
                );
                NodeOutcome::Blocked { dependency }
            }
            _ if !changed => {
                self.emit(&pass, BuildEvent::Skipped { component: name.clone() });
                NodeOutcome::Skipped
            }
            _ => self.perform(&pass, &name, dependencies).await,
        };

        self.changes.clear_changed(&name);
        pass.record(name, outcome, started)
    }

    /// Fork every direct dependency onto the pool and join them.
    async fn build_dependencies(
        self: Arc<Self>,
        pass: &Arc<BuildPass>,
        name: &str,
        dependencies: &[String],
    ) -> Vec<(String, NodeOutcome)> {
        if dependencies.is_empty() {
            return Vec::new();
        }

        let forked = Instant::now();
        let tasks: Vec<BoxFuture<'static, NodeOutcome>> = dependencies
            .iter()
            .map(|dep| self.clone().visit(pass.clone(), dep.clone()))
            .collect();

        match self.pool.submit(tasks).await {
            Ok(results) => dependencies
                .iter()
                .cloned()
                .zip(results)
                .map(|(dep, result)| match result {
                    Ok(outcome) => (dep, outcome),
                    Err(join_err) => {
                        warn!(
                            "Build of dependency '{}' of '{}' was interrupted: {}",
                            dep, name, join_err
                        );
                        let outcome = NodeOutcome::Interrupted {
                            reason: join_err.to_string(),
                        };
                        pass.record_missing(&dep, outcome.clone(), forked);
                        (dep, outcome)
                    }
                })
                .collect(),
            Err(err) => {
                warn!("Could not schedule dependencies of '{}': {}", name, err);
                dependencies
                    .iter()
                    .map(|dep| {
                        let outcome = NodeOutcome::Interrupted {
                            reason: err.to_string(),
                        };
                        pass.record_missing(dep, outcome.clone(), forked);
                        (dep.clone(), outcome)
                    })
                    .collect()
            }
        }
    }

    /// Run the build action for one component under a pool permit.
    async fn perform(&self, pass: &BuildPass, name: &str, dependencies: Vec<String>) -> NodeOutcome {
        let ctx = BuildCtx::new(pass.run_id.clone(), name, dependencies);
        self.emit(pass, BuildEvent::Started { component: name.to_string() });

        let started = Instant::now();
        let result = self
            .pool
            .run(AssertUnwindSafe(self.action.perform_build(&ctx)).catch_unwind())
            .await;

        let outcome = match result {
            Ok(Ok(Ok(()))) => NodeOutcome::Built,
            Ok(Ok(Err(err))) => {
                error!("Build of '{}' failed: {:#}", name, err);
                NodeOutcome::Failed {
                    error: format!("{:#}", err),
                }
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!("Build action for '{}' panicked: {}", name, message);
                NodeOutcome::Failed {
                    error: format!("build action panicked: {}", message),
                }
            }
            Err(err) => {
                warn!("Build of '{}' did not run: {}", name, err);
                NodeOutcome::Interrupted {
                    reason: err.to_string(),
                }
            }
        };

        self.emit(
            pass,
            BuildEvent::Finished {
                component: name.to_string(),
                success: outcome == NodeOutcome::Built,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builds components of a validated, acyclic graph.
#[derive(Clone)]
pub struct BuildScheduler {
    inner: Arc<SchedulerInner>,
}

impl BuildScheduler {
    pub fn builder(graph: DependencyGraph) -> BuildSchedulerBuilder {
        BuildSchedulerBuilder::new(graph)
    }

    /// Scheduler with the default config, logging action and logging sink.
    pub fn new(graph: DependencyGraph) -> Result<Self> {
        Self::builder(graph).build()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Owned snapshot of the graph's components, for display.
    pub fn get_nodes(&self) -> Vec<Component> {
        self.inner.graph.get_nodes()
    }

    pub fn changes(&self) -> &ChangeTracker {
        &self.inner.changes
    }

    pub fn config(&self) -> &BuildConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn mark_changed(&self, name: &str) {
        self.inner.changes.mark_changed(name);
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.inner.changes.is_changed(name)
    }

    pub fn clear_changed(&self, name: &str) {
        self.inner.changes.clear_changed(name);
    }

    /// Build `name` after recursively building its dependencies.
    pub async fn build(&self, name: &str) -> Result<BuildReport> {
        if !self.inner.graph.contains(name) {
            return Err(BuildError::not_found(name));
        }
        if self.inner.pool.is_shut_down() {
            return Err(BuildError::PoolShutdown);
        }

        let pass = Arc::new(BuildPass::new());
        info!("Build {} started for '{}'", pass.run_id, name);

        self.inner
            .clone()
            .visit(pass.clone(), name.to_string())
            .await;

        Ok(self.finish(pass, vec![name.to_string()]))
    }

    /// Build every changed component that no other changed component
    /// directly depends on, in one pass.
    pub async fn build_all_changed(&self) -> Result<BuildReport> {
        if self.inner.pool.is_shut_down() {
            return Err(BuildError::PoolShutdown);
        }

        let graph = &self.inner.graph;
        let changed: Vec<String> = graph
            .get_nodes()
            .into_iter()
            .map(|c| c.name().to_string())
            .filter(|n| self.inner.changes.is_changed(n))
            .collect();
        let targets: Vec<String> = changed
            .iter()
            .filter(|name| {
                !changed.iter().any(|other| {
                    graph
                        .dependencies_of(other)
                        .is_some_and(|deps| deps.iter().any(|d| d == *name))
                })
            })
            .cloned()
            .collect();

        let pass = Arc::new(BuildPass::new());
        info!(
            "Build {} started for {} changed target(s)",
            pass.run_id,
            targets.len()
        );

        let tasks: Vec<BoxFuture<'static, NodeOutcome>> = targets
            .iter()
            .map(|t| self.inner.clone().visit(pass.clone(), t.clone()))
            .collect();
        let forked = Instant::now();
        for (target, result) in targets.iter().zip(self.inner.pool.submit(tasks).await?) {
            if let Err(join_err) = result {
                warn!("Build of '{}' was interrupted: {}", target, join_err);
                pass.record_missing(
                    target,
                    NodeOutcome::Interrupted {
                        reason: join_err.to_string(),
                    },
                    forked,
                );
            }
        }

        Ok(self.finish(pass, targets))
    }

    fn finish(&self, pass: Arc<BuildPass>, targets: Vec<String>) -> BuildReport {
        // Child tasks have all been joined, so this is the last reference.
        let report = match Arc::try_unwrap(pass) {
            Ok(pass) => pass.into_report(targets),
            Err(shared) => {
                let nodes = shared.reports.lock().clone();
                let overall_success = nodes.iter().all(|n| n.outcome.is_success());
                BuildReport {
                    run_id: shared.run_id.clone(),
                    targets,
                    nodes,
                    overall_success,
                }
            }
        };

        info!(
            "Build {} finished: {} node(s), success: {}",
            report.run_id,
            report.nodes.len(),
            report.overall_success
        );
        report
    }

    /// Release the worker pool. Call once after the last build.
    pub async fn shutdown(&self) -> ShutdownStatus {
        self.inner.pool.shutdown().await
    }
}

/// Builder for [`BuildScheduler`]
pub struct BuildSchedulerBuilder {
    graph: DependencyGraph,
    config: BuildConfig,
    changes: ChangeTracker,
    action: Arc<dyn BuildAction>,
    event_sinks: Vec<Arc<dyn EventSink>>,
}

impl BuildSchedulerBuilder {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            graph,
            config: BuildConfig::default(),
            changes: ChangeTracker::new(),
            action: Arc::new(LoggingBuildAction),
            event_sinks: vec![Arc::new(LoggingEventSink) as Arc<dyn EventSink>],
        }
    }

    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing change set instead of starting empty.
    pub fn with_changes(mut self, changes: ChangeTracker) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_action(mut self, action: Arc<dyn BuildAction>) -> Self {
        self.action = action;
        self
    }

    /// Add a sink alongside the default logging sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }

    /// Validate the config and the graph, then start the worker pool.
    pub fn build(self) -> Result<BuildScheduler> {
        self.config.validate()?;
        self.graph.validate()?;

        let pool = WorkerPool::new(self.config.max_workers, self.config.shutdown_grace());
        info!(
            "Build scheduler ready: {} component(s), {} worker(s), action '{}'",
            self.graph.len(),
            pool.capacity(),
            self.action.name()
        );

        Ok(BuildScheduler {
            inner: Arc::new(SchedulerInner {
                graph: self.graph,
                changes: self.changes,
                pool,
                action: self.action,
                config: self.config,
                event_sinks: self.event_sinks,
            }),
        })
    }
}
