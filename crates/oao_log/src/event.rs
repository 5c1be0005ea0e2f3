//! Event types for the execution log.
//!
//! The payload is a tagged enum with one variant per event kind; the kind
//! is always derived from the payload, so the two cannot disagree.

use oao_core::{Digest, EventId, ExecutionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kind, the wire-visible discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Execution admitted, snapshot frozen (always sequence 0)
    ExecutionStarted,
    /// Lifecycle state entered
    StateEnter,
    /// Step started
    StepStarted,
    /// Step finished with output and token accounting
    StepCompleted,
    /// Real tool invocation about to run
    ToolCallStarted,
    /// Tool invocation succeeded (the deduplication anchor)
    ToolCallSuccess,
    /// Tool invocation failed terminally
    ToolCallFailed,
    /// A retry is about to run after backoff
    RetryAttempted,
    /// Policy hard-stop
    PolicyViolation,
    /// Terminal success
    ExecutionCompleted,
    /// Terminal failure
    ExecutionFailed,
}

impl EventKind {
    /// Whether this kind terminates the execution's log
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ExecutionCompleted | Self::ExecutionFailed)
    }
}

/// Lifecycle states of the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Construction, before the first step
    Init,
    /// Step loop head
    Plan,
    /// Adapter invocation in progress
    Execute,
    /// Step result accounting
    Review,
    /// Terminal success state
    Terminate,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Plan => "PLAN",
            Self::Execute => "EXECUTE",
            Self::Review => "REVIEW",
            Self::Terminate => "TERMINATE",
        };
        write!(f, "{}", name)
    }
}

/// Policy violation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Step budget reached
    MaxSteps,
    /// Token budget exceeded
    MaxTokens,
    /// Tool-call budget reached
    MaxToolCalls,
    /// Wall-clock deadline passed
    Timeout,
    /// Tool not on the allowlist
    ToolNotAllowed,
}

/// Terminal failure kinds, the `{kind, detail}` taxonomy surfaced by reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// A policy hard-stop
    PolicyViolation,
    /// A tool failed terminally
    ToolFailure,
    /// The adapter failed fatally
    AdapterError,
    /// Resume refused: configuration hash diverged
    ExecutionHashMismatch,
    /// Forced re-execution diverged from the historical log
    DeterminismViolation,
    /// Cancelled by request
    Cancelled,
    /// Execution deadline passed
    TimedOut,
    /// Runtime defect (invalid transition, log corruption)
    Internal,
}

/// Span/trace identifiers carried for external tracing correlation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace id, stable across resume and replay
    pub trace_id: String,
    /// Span id of the emitting scope, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// Payload of a `TOOL_CALL_SUCCESS` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name
    pub tool_name: String,
    /// SHA-256 over the canonical (tool_name, args) pair
    pub arg_hash: Digest,
    /// The tool's result, replayed verbatim on deduplicated calls
    pub result: Value,
    /// Tokens attributed to this call, if the tool reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cost: Option<u64>,
}

/// Event-type-specific structured data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// Execution admitted
    ExecutionStarted {
        /// The task payload
        task: Value,
        /// Hash of the frozen configuration
        execution_hash: Digest,
        /// Adapter identity
        agent_name: String,
    },
    /// Lifecycle state entered
    StateEnter {
        /// The state being entered
        state: LifecycleState,
    },
    /// Step started
    StepStarted {
        /// Step number, dense from 0
        step: u64,
    },
    /// Step completed
    StepCompleted {
        /// Step number
        step: u64,
        /// Step output
        output: Value,
        /// Tokens consumed by this step
        step_tokens: u64,
        /// Cumulative tokens after this step (authoritative accumulator)
        cumulative_tokens: u64,
    },
    /// Real tool invocation about to run
    ToolCallStarted {
        /// Tool name
        tool_name: String,
        /// Canonical argument hash
        arg_hash: Digest,
    },
    /// Tool invocation succeeded
    ToolCallSuccess(ToolCallRecord),
    /// Tool invocation failed terminally
    ToolCallFailed {
        /// Tool name
        tool_name: String,
        /// Canonical argument hash
        arg_hash: Digest,
        /// Error classification as reported by the tool
        error_kind: String,
        /// Human-readable detail
        detail: String,
    },
    /// Retry about to run
    RetryAttempted {
        /// 1-based attempt counter
        attempt: u32,
        /// Backoff applied before this attempt, in milliseconds
        delay_ms: u64,
    },
    /// Policy hard-stop
    PolicyViolation {
        /// Which budget or rule was breached
        kind: ViolationKind,
        /// Human-readable detail
        detail: String,
    },
    /// Terminal success
    ExecutionCompleted {
        /// Final output of the last step
        final_output: Value,
        /// Steps completed
        total_steps: u64,
        /// Cumulative token usage
        token_usage: u64,
    },
    /// Terminal failure
    ExecutionFailed {
        /// Failure taxonomy kind
        kind: FailureKind,
        /// Human-readable detail
        detail: String,
    },
}

impl EventPayload {
    /// The kind this payload belongs to
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ExecutionStarted { .. } => EventKind::ExecutionStarted,
            Self::StateEnter { .. } => EventKind::StateEnter,
            Self::StepStarted { .. } => EventKind::StepStarted,
            Self::StepCompleted { .. } => EventKind::StepCompleted,
            Self::ToolCallStarted { .. } => EventKind::ToolCallStarted,
            Self::ToolCallSuccess(_) => EventKind::ToolCallSuccess,
            Self::ToolCallFailed { .. } => EventKind::ToolCallFailed,
            Self::RetryAttempted { .. } => EventKind::RetryAttempted,
            Self::PolicyViolation { .. } => EventKind::PolicyViolation,
            Self::ExecutionCompleted { .. } => EventKind::ExecutionCompleted,
            Self::ExecutionFailed { .. } => EventKind::ExecutionFailed,
        }
    }
}

/// An appended, immutable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub event_id: EventId,
    /// Owning execution
    pub execution_id: ExecutionId,
    /// Dense position within the execution's log, assigned on append
    pub sequence: u64,
    /// Step number for step- and tool-scoped events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u64>,
    /// Wire-visible discriminant, always equal to `payload.kind()`
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// Wall-clock append time (informational; ordering authority is `sequence`)
    pub timestamp: Timestamp,
    /// Event-type-specific data
    #[serde(rename = "data")]
    pub payload: EventPayload,
    /// Optional tracing correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<TraceContext>,
}

impl Event {
    /// Whether this event terminates the execution
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// An event awaiting append: everything but the log-assigned fields
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// Step number for step- and tool-scoped events
    pub step_number: Option<u64>,
    /// Event-type-specific data
    pub payload: EventPayload,
    /// Optional tracing correlation
    pub trace_context: Option<TraceContext>,
}

impl EventDraft {
    /// Create a draft from a payload
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            step_number: None,
            payload,
            trace_context: None,
        }
    }

    /// Scope the draft to a step
    #[must_use]
    pub fn with_step(mut self, step: u64) -> Self {
        self.step_number = Some(step);
        self
    }

    /// Attach tracing correlation
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace_context = Some(trace);
        self
    }
}
