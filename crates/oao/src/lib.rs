//! OAO: a deterministic execution runtime for AI agents.
//!
//! Wraps opaque, stochastic agent computations in a reproducible,
//! event-sourced, governed execution envelope: a strict lifecycle driven
//! entirely by appended events, policy budgets enforced before every step
//! and tool call, hash-keyed tool idempotency, replay and resume with
//! integrity guarantees, a DAG executor, and a distributed scheduler.
//!
//! The [`Runtime`] type is the front door; everything else re-exports the
//! component crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handler;
pub mod runtime;

pub use config::{BackendKind, ConfigError, RuntimeConfig};
pub use handler::RuntimeJobHandler;
pub use runtime::{Runtime, RuntimeBuilder, RuntimeError};

pub use oao_core::{CancelFlag, Digest, EventId, ExecutionId, JobId, NodeId, WorkerId};
pub use oao_dag::{
    FailurePolicy, GraphConfig, GraphError, GraphExecutor, GraphReport, NodeResult, NodeStatus,
    TaskGraph, TaskNode,
};
pub use oao_log::{
    Event, EventBus, EventDraft, EventKind, EventLog, EventPayload, ExecutionState,
    ExecutionStatus, ExecutionTimeline, FailureKind, LifecycleState, MemoryEventLog,
    ToolCallRecord, TraceContext, ViolationKind,
};
pub use oao_policy::{
    PolicyConfig, PolicyEngine, PolicyRegistry, RetryClass, RetryConfig, Violation,
};
pub use oao_replay::{AuditOptions, AuditReport, ReplayError};
pub use oao_runtime::{
    AdapterError, AdapterRegistry, AgentAdapter, ExecutionReport, FailureDetail, ReportStatus,
    StepContext, StepOutcome,
};
pub use oao_sched::{
    DistributedScheduler, Job, JobHandler, JobQueue, JobStatus, MemoryJobQueue, Worker,
    WorkerConfig,
};
pub use oao_store::{AgentIdentity, ExecutionSnapshot, MemorySnapshotStore, SnapshotStore};
pub use oao_tool::{arg_hash, InterceptError, Tool, ToolError, ToolOutput, ToolRegistry};
