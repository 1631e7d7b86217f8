//! Build graph components
//!
//! A component is one named build stage. It owns nothing but its name and the
//! ordered list of components it depends on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node in the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    name: String,
    /// Names of the components this one depends on, in declaration order.
    /// Duplicates are kept.
    #[serde(default)]
    dependencies: Vec<String>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub(crate) fn push_dependency(&mut self, name: impl Into<String>) {
        self.dependencies.push(name.into());
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node: {}", self.name)?;
        if self.dependencies.is_empty() {
            write!(f, "Dependencies: None")
        } else {
            write!(f, "Dependencies: {}", self.dependencies.join(", "))
        }
    }
}
