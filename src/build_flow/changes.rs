//! Change tracking
//!
//! A concurrent set of component names with pending changes. Sibling build
//! tasks read and clear marks in parallel, so the set is a `DashSet` rather
//! than a plain `HashSet` behind call-site locks.

use dashmap::DashSet;
use std::sync::Arc;
use tracing::debug;

/// Names of components that should be built on the next pass.
///
/// Cloning is cheap and every clone shares the same underlying set.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    changed: Arc<DashSet<String>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as changed. Marking twice has no further effect.
    pub fn mark_changed(&self, name: &str) {
        if self.changed.insert(name.to_string()) {
            debug!("Marked '{}' as changed", name);
        }
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// Remove the mark for `name`; clearing an unmarked name is a no-op.
    pub fn clear_changed(&self, name: &str) {
        if self.changed.remove(name).is_some() {
            debug!("Cleared change mark for '{}'", name);
        }
    }

    /// Currently marked names, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.changed.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn clear_all(&self) {
        self.changed.clear();
    }
}

impl<S: AsRef<str>> FromIterator<S> for ChangeTracker {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let tracker = Self::new();
        for name in iter {
            tracker.mark_changed(name.as_ref());
        }
        tracker
    }
}
