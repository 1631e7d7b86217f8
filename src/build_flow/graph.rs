//! Dependency graph
//!
//! Owns every [`Component`] of a build and the edges between them. An edge
//! `from -> to` means "`from` depends on `to`": `to` must be built first.
//!
//! Components live as node weights of a `petgraph` [`DiGraph`], so insertion
//! order is the node index order and acyclicity can be checked with the usual
//! graph algorithms. The ordered dependency list on each component is kept
//! alongside the petgraph edges because petgraph does not preserve edge order.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

use super::component::Component;
use crate::core::errors::{BuildError, Result};

/// Node-link export of the graph, the shape a force-directed viewer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphDataNode>,
    pub links: Vec<GraphDataLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDataNode {
    pub id: usize,
    pub name: String,
}

/// `source` depends on `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDataLink {
    pub source: usize,
    pub target: usize,
}

/// The set of components that make up a build.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<Component, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new component with no dependencies.
    ///
    /// Names are unique: registering an existing name fails with
    /// [`BuildError::DuplicateComponent`] and leaves the graph untouched.
    pub fn add_node(&mut self, name: &str) -> Result<&Component> {
        if self.index.contains_key(name) {
            warn!("Rejecting duplicate registration of component '{}'", name);
            return Err(BuildError::DuplicateComponent {
                name: name.to_string(),
            });
        }

        let idx = self.graph.add_node(Component::new(name));
        self.index.insert(name.to_string(), idx);
        debug!("Registered component '{}'", name);
        Ok(&self.graph[idx])
    }

    /// Record that `from` depends on `to`.
    ///
    /// Both components must already be registered. If either is missing no
    /// edge is added and [`BuildError::UnknownComponent`] names the missing one.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        let (from_idx, to_idx) = match (self.index.get(from), self.index.get(to)) {
            (Some(&f), Some(&t)) => (f, t),
            (None, _) => return Err(Self::dangling(from, to, from)),
            (_, None) => return Err(Self::dangling(from, to, to)),
        };

        self.graph.add_edge(from_idx, to_idx, ());
        self.graph[from_idx].push_dependency(to);
        debug!("Added dependency {} -> {}", from, to);
        Ok(())
    }

    fn dangling(from: &str, to: &str, missing: &str) -> BuildError {
        BuildError::UnknownComponent {
            from: from.to_string(),
            to: to.to_string(),
            missing: missing.to_string(),
        }
    }

    /// Look up a component by name.
    pub fn get_node(&self, name: &str) -> Option<&Component> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Owned snapshot of every component in registration order.
    pub fn get_nodes(&self) -> Vec<Component> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of `name`, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.get_node(name).map(Component::dependencies)
    }

    /// Components that directly depend on `name`, in registration order.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        dependents.sort();
        dependents
            .into_iter()
            .map(|i| self.graph[i].name().to_string())
            .collect()
    }

    /// Check that the graph is acyclic.
    ///
    /// On failure the error carries one offending cycle as a closed path,
    /// e.g. `["a", "b", "a"]`; a self-dependency reports `["a", "a"]`.
    pub fn validate(&self) -> Result<()> {
        self.topo_order().map(|_| ())
    }

    /// Components ordered so every dependency precedes its dependents.
    pub fn build_order(&self) -> Result<Vec<String>> {
        let mut order = self.topo_order()?;
        // Edges point at dependencies, so petgraph's order is dependents-first.
        order.reverse();
        Ok(order
            .into_iter()
            .map(|idx| self.graph[idx].name().to_string())
            .collect())
    }

    fn topo_order(&self) -> Result<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|cycle| {
            let path = self.cycle_through(cycle.node_id());
            warn!("Dependency cycle detected: {}", path.join(" -> "));
            BuildError::CircularDependency { cycle: path }
        })
    }

    /// Breadth-first search from `start` back to itself.
    fn cycle_through(&self, start: NodeIndex) -> Vec<String> {
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::new();

        for next in self.graph.neighbors(start) {
            if !parent.contains_key(&next) {
                parent.insert(next, start);
                queue.push_back(next);
            }
        }
        while let Some(current) = queue.pop_front() {
            if current == start {
                break;
            }
            for next in self.graph.neighbors(current) {
                if !parent.contains_key(&next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let start_name = self.graph[start].name().to_string();
        if !parent.contains_key(&start) {
            return vec![start_name];
        }

        let mut backwards = Vec::new();
        let mut cursor = start;
        while let Some(&prev) = parent.get(&cursor) {
            if prev == start {
                break;
            }
            backwards.push(prev);
            cursor = prev;
        }

        let mut path = vec![start_name.clone()];
        path.extend(
            backwards
                .into_iter()
                .rev()
                .map(|idx| self.graph[idx].name().to_string()),
        );
        path.push(start_name);
        path
    }

    /// Group components by depth: level 0 has no dependencies, level `n`
    /// depends on at least one component at level `n - 1`.
    pub fn levels(&self) -> Result<Vec<(usize, Vec<String>)>> {
        let mut order = self.topo_order()?;
        order.reverse();

        let mut node_levels: HashMap<NodeIndex, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|dep| node_levels.get(&dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            node_levels.insert(idx, level);

            while levels.len() <= level {
                levels.push(Vec::new());
            }
            levels[level].push(self.graph[idx].name().to_string());
        }

        Ok(levels
            .into_iter()
            .enumerate()
            .filter(|(_, names)| !names.is_empty())
            .map(|(level, mut names)| {
                names.sort_by_key(|n| self.index.get(n).copied());
                (level, names)
            })
            .collect())
    }

    /// Node-link export; ids are registration positions.
    pub fn to_graph_data(&self) -> GraphData {
        let nodes = self
            .graph
            .node_indices()
            .map(|idx| GraphDataNode {
                id: idx.index(),
                name: self.graph[idx].name().to_string(),
            })
            .collect();

        let links = self
            .graph
            .node_indices()
            .flat_map(|idx| {
                self.graph[idx]
                    .dependencies()
                    .iter()
                    .filter_map(|dep| self.index.get(dep))
                    .map(move |target| GraphDataLink {
                        source: idx.index(),
                        target: target.index(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        GraphData { nodes, links }
    }

    /// Graphviz rendering with edges pointing from dependent to dependency.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph BuildGraph {\n");
        dot.push_str("  graph [rankdir=LR];\n");
        dot.push_str("  node [shape=box, style=rounded, fontname=\"Helvetica\"];\n\n");

        for idx in self.graph.node_indices() {
            dot.push_str(&format!(
                "  n{} [label=\"{}\"];\n",
                idx.index(),
                escape_dot_label(self.graph[idx].name())
            ));
        }
        dot.push('\n');
        for link in self.to_graph_data().links {
            dot.push_str(&format!("  n{} -> n{};\n", link.source, link.target));
        }
        dot.push_str("}\n");
        dot
    }

    /// Human-readable listing of every component and its dependencies.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

fn escape_dot_label(name: &str) -> String {
    name.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for idx in self.graph.node_indices() {
            writeln!(f, "{}", self.graph[idx])?;
            writeln!(f)?;
        }
        Ok(())
    }
}
