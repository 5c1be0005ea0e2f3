//! Task graph model and validation.

use indexmap::IndexMap;
use oao_runtime::AgentAdapter;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Graph validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share a name
    DuplicateNode {
        /// The contested name
        name: String,
    },
    /// A node depends on a name not present in the graph
    UnknownDependency {
        /// The depending node
        node: String,
        /// The missing dependency
        dependency: String,
    },
    /// The dependency relation contains a cycle
    CycleDetected {
        /// A node on the cycle
        involving: String,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { name } => write!(f, "Duplicate node: {}", name),
            Self::UnknownDependency { node, dependency } => {
                write!(f, "Node '{}' depends on unknown '{}'", node, dependency)
            }
            Self::CycleDetected { involving } => {
                write!(f, "Cycle detected involving '{}'", involving)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// One task in a workflow graph
#[derive(Clone)]
pub struct TaskNode {
    /// Unique node name
    pub name: String,
    /// The agent that executes this node
    pub agent: Arc<dyn AgentAdapter>,
    /// The node's task payload
    pub task: Value,
    /// Names of nodes that must complete first
    pub dependencies: BTreeSet<String>,
}

impl TaskNode {
    /// Create a node with no dependencies
    #[must_use]
    pub fn new(name: impl Into<String>, agent: Arc<dyn AgentAdapter>, task: Value) -> Self {
        Self {
            name: name.into(),
            agent,
            task,
            dependencies: BTreeSet::new(),
        }
    }

    /// Declare dependencies
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("agent", &self.agent.name())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A directed acyclic graph of task nodes
#[derive(Default)]
pub struct TaskGraph {
    nodes: IndexMap<String, TaskNode>,
}

impl TaskGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn add_node(&mut self, node: TaskNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode { name: node.name });
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Validate structure: every dependency exists and the relation is
    /// acyclic.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.topological_levels().map(|_| ())
    }

    /// Kahn's algorithm: level-by-level topological order, where nodes in
    /// the same level have no mutual dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] when not all nodes can be
    /// ordered.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: IndexMap<&str, usize> = self
            .nodes
            .keys()
            .map(|name| (name.as_str(), 0))
            .collect();
        let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();

        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if self.nodes.contains_key(dep) {
                    *in_degree.entry(node.name.as_str()).or_insert(0) += 1;
                    dependents
                        .entry(dep.as_str())
                        .or_default()
                        .push(node.name.as_str());
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut levels = Vec::new();
        let mut processed = 0usize;
        while !queue.is_empty() {
            let mut level = Vec::new();
            for _ in 0..queue.len() {
                let Some(name) = queue.pop_front() else {
                    break;
                };
                level.push(name.to_string());
                processed += 1;
                if let Some(children) = dependents.get(name) {
                    for child in children.clone() {
                        if let Some(degree) = in_degree.get_mut(child) {
                            *degree -= 1;
                            if *degree == 0 {
                                queue.push_back(child);
                            }
                        }
                    }
                }
            }
            levels.push(level);
        }

        if processed != self.nodes.len() {
            let stuck = self
                .nodes
                .keys()
                .find(|name| !levels.iter().flatten().any(|done| done == *name))
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::CycleDetected { involving: stuck });
        }
        Ok(levels)
    }

    /// Look up a node by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    /// All nodes in insertion order
    #[must_use]
    pub fn nodes(&self) -> &IndexMap<String, TaskNode> {
        &self.nodes
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
