//! OAO DAG Executor
//!
//! Dependency-ordered execution of multiple engines. Graphs are acyclic
//! by construction (checked at submission), independent nodes run
//! concurrently under a configurable bound, and a node never starts until
//! every declared dependency has a terminal success event.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod executor;
pub mod graph;

pub use executor::{FailurePolicy, GraphConfig, GraphExecutor, GraphReport, NodeResult, NodeStatus};
pub use graph::{GraphError, TaskGraph, TaskNode};
