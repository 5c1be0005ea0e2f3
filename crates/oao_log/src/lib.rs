//! OAO Event Log
//!
//! Append-only, densely sequenced event structures and the log backends
//! that persist them. The log is the write-ahead record of every
//! execution: no state transition counts until its event append has
//! returned success, and all runtime state is derived by folding events.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod event;
pub mod state;
pub mod store;

pub use bus::{EventBus, ExecutionEvents};
pub use event::{
    Event, EventDraft, EventKind, EventPayload, FailureKind, LifecycleState, ToolCallRecord,
    TraceContext, ViolationKind,
};
pub use state::{ExecutionState, ExecutionStatus, ExecutionTimeline, TimelineEntry};
pub use store::{append_applying, EventLog, LogError, MemoryEventLog, DEFAULT_RETENTION};
