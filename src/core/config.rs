use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::{BuildError, Result};

/// What a component does when one of its dependencies did not build cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    /// Skip the component's own action and report it as blocked
    #[default]
    Block,
    /// Run the component's action anyway
    Continue,
}

/// How the change gate interacts with dependency traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TraversalPolicy {
    /// An unchanged component is skipped together with everything under it
    #[default]
    GateFirst,
    /// Dependencies are always visited; the gate only decides the component's own action
    AlwaysDescend,
}

/// Configuration for build execution behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum number of build actions running at once (default: 3)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// How long shutdown waits for in-flight work, in seconds (default: 5)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// What to do when a dependency fails
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Whether unchanged components stop traversal
    #[serde(default)]
    pub traversal: TraversalPolicy,
}

fn default_max_workers() -> usize {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            on_failure: FailurePolicy::default(),
            traversal: TraversalPolicy::default(),
        }
    }
}

impl BuildConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(BuildError::configuration_field(
                "max_workers must be greater than 0",
                "max_workers",
            ));
        }
        if self.max_workers > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(BuildError::configuration_field(
                "max_workers exceeds the semaphore permit limit",
                "max_workers",
            ));
        }
        if self.shutdown_grace_secs == 0 {
            return Err(BuildError::configuration_field(
                "shutdown_grace_secs must be greater than 0",
                "shutdown_grace_secs",
            ));
        }
        if self.shutdown_grace_secs > 3600 {
            return Err(BuildError::configuration_field(
                "shutdown_grace_secs cannot exceed 1 hour",
                "shutdown_grace_secs",
            ));
        }
        Ok(())
    }

    /// Applies `overrides` on top of `base`. Only fields the override sets
    /// are taken from it; the result is validated.
    pub fn merge(base: &Self, overrides: &BuildConfigOverrides) -> Result<Self> {
        let merged = Self {
            max_workers: overrides.max_workers.unwrap_or(base.max_workers),
            shutdown_grace_secs: overrides
                .shutdown_grace_secs
                .unwrap_or(base.shutdown_grace_secs),
            on_failure: overrides.on_failure.unwrap_or(base.on_failure),
            traversal: overrides.traversal.unwrap_or(base.traversal),
        };

        merged.validate()?;
        Ok(merged)
    }
}

/// A partial [`BuildConfig`], as written in a manifest. Absent fields keep
/// the base value when merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traversal: Option<TraversalPolicy>,
}
