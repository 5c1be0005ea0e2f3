//! OAO Execution Engine
//!
//! Drives an agent through the fixed lifecycle, enforcing policy at every
//! step and appending every state transition to the event log before the
//! in-memory state advances. The engine never reads the log mid-run; its
//! derived state matches the log by construction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod engine;
pub mod lifecycle;
pub mod report;

pub use adapter::{AdapterError, AdapterRegistry, AgentAdapter, StepContext, StepOutcome};
pub use engine::ExecutionEngine;
pub use lifecycle::{InvalidTransition, Lifecycle};
pub use report::{ExecutionReport, FailureDetail, ReportStatus};
