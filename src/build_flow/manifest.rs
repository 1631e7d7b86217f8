//! Declarative build manifests
//!
//! A manifest describes a graph in YAML or JSON:
//!
//! ```yaml
//! config:
//!   max_workers: 2
//! components:
//!   - name: Compile Java
//!     dependencies: [Run Tests]
//!   - name: Run Tests
//! changed: [Compile Java]
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use super::changes::ChangeTracker;
use super::graph::DependencyGraph;
use super::scheduler::BuildScheduler;
use crate::core::config::{BuildConfig, BuildConfigOverrides};
use crate::core::errors::{BuildError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Settings to apply over the caller's config; absent fields are kept
    #[serde(default)]
    pub config: Option<BuildConfigOverrides>,
    pub components: Vec<ComponentSpec>,
    /// Components to mark changed once the graph is built
    #[serde(default)]
    pub changed: Vec<String>,
}

/// A graph, its initial change set and the effective config.
pub struct ManifestParts {
    pub graph: DependencyGraph,
    pub changes: ChangeTracker,
    pub config: BuildConfig,
}

impl BuildManifest {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a manifest, picking the format from the file extension.
    /// Anything other than `.json` is read as YAML.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| BuildError::io(format!("open {}", path.display()), e))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| BuildError::io(format!("read {}", path.display()), e))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let manifest = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        info!(
            "Loaded manifest {} with {} component(s)",
            path.display(),
            manifest.components.len()
        );
        Ok(manifest)
    }

    /// Build the graph: every component is registered before any edge, so
    /// declaration order does not matter.
    pub fn into_parts(self) -> Result<ManifestParts> {
        self.into_parts_with(&BuildConfig::default())
    }

    /// Like [`into_parts`](Self::into_parts), with the fields the manifest's
    /// config sets applied over `base`.
    pub fn into_parts_with(self, base: &BuildConfig) -> Result<ManifestParts> {
        let config = match &self.config {
            Some(own) => BuildConfig::merge(base, own)?,
            None => {
                base.validate()?;
                base.clone()
            }
        };

        let mut graph = DependencyGraph::new();
        for spec in &self.components {
            graph.add_node(&spec.name)?;
        }
        for spec in &self.components {
            for dep in &spec.dependencies {
                graph.add_dependency(&spec.name, dep)?;
            }
        }
        graph.validate()?;

        let changes = ChangeTracker::new();
        for name in &self.changed {
            if !graph.contains(name) {
                return Err(BuildError::not_found(name.as_str()));
            }
            changes.mark_changed(name);
        }

        debug!(
            "Manifest produced {} component(s), {} edge(s), {} changed",
            graph.len(),
            graph.edge_count(),
            changes.len()
        );
        Ok(ManifestParts {
            graph,
            changes,
            config,
        })
    }
}

impl BuildScheduler {
    /// Scheduler for a manifest, using the default action and event sink.
    pub fn from_manifest(manifest: BuildManifest) -> Result<Self> {
        let parts = manifest.into_parts()?;
        BuildScheduler::builder(parts.graph)
            .with_config(parts.config)
            .with_changes(parts.changes)
            .build()
    }
}
