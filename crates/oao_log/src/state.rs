//! Derived execution state.
//!
//! State is never stored; it is a pure fold over the event log. The
//! engine's in-memory copy matches this fold by construction because every
//! mutation it makes is the consequence of a successful append.

use crate::event::{
    Event, EventKind, EventPayload, FailureKind, LifecycleState, ViolationKind,
};
use oao_core::{ExecutionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution lifecycle status, derived from the log's tail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// No events yet
    Pending,
    /// Started, no terminal event
    Running,
    /// Terminal success recorded
    Completed,
    /// Terminal failure recorded
    Failed,
}

/// State reconstructed from an execution's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Owning execution
    pub execution_id: ExecutionId,
    /// Derived status
    pub status: ExecutionStatus,
    /// Most recently entered lifecycle state
    pub current_state: Option<LifecycleState>,
    /// All lifecycle states entered, in order
    pub state_history: Vec<LifecycleState>,
    /// Number of completed steps; also the next step number to run
    pub steps_completed: u64,
    /// Cumulative token usage (authoritative value from the last step)
    pub token_usage: u64,
    /// Number of real tool invocations attempted
    pub tool_calls: u64,
    /// Number of retries performed
    pub retries: u64,
    /// Output of the most recent completed step
    pub last_output: Option<Value>,
    /// Final output, present once completed
    pub final_output: Option<Value>,
    /// Timestamp of `EXECUTION_STARTED`
    pub started_at: Option<Timestamp>,
    /// Timestamp of the terminal event
    pub finished_at: Option<Timestamp>,
    /// Recorded policy violation, if any
    pub violation: Option<(ViolationKind, String)>,
    /// Recorded terminal failure, if any
    pub failure: Option<(FailureKind, String)>,
    /// A step that was started but never completed (crash artifact)
    pub open_step: Option<u64>,
    /// Number of events folded
    pub events_folded: u64,
}

impl ExecutionState {
    /// Empty state for an execution with no events
    #[must_use]
    pub fn empty(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Pending,
            current_state: None,
            state_history: Vec::new(),
            steps_completed: 0,
            token_usage: 0,
            tool_calls: 0,
            retries: 0,
            last_output: None,
            final_output: None,
            started_at: None,
            finished_at: None,
            violation: None,
            failure: None,
            open_step: None,
            events_folded: 0,
        }
    }

    /// Reconstruct state by folding an ordered event slice.
    ///
    /// Pure and deterministic: folding the same events twice produces
    /// equal states.
    #[must_use]
    pub fn fold(execution_id: ExecutionId, events: &[Event]) -> Self {
        let mut state = Self::empty(execution_id);
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Apply a single event in sequence order
    pub fn apply(&mut self, event: &Event) {
        self.events_folded += 1;
        match &event.payload {
            EventPayload::ExecutionStarted { .. } => {
                self.status = ExecutionStatus::Running;
                self.started_at = Some(event.timestamp);
            }
            EventPayload::StateEnter { state } => {
                self.current_state = Some(*state);
                self.state_history.push(*state);
            }
            EventPayload::StepStarted { step } => {
                self.open_step = Some(*step);
            }
            EventPayload::StepCompleted {
                step,
                output,
                cumulative_tokens,
                ..
            } => {
                self.steps_completed = step + 1;
                self.token_usage = *cumulative_tokens;
                self.last_output = Some(output.clone());
                self.open_step = None;
            }
            EventPayload::ToolCallStarted { .. } => {
                self.tool_calls += 1;
            }
            EventPayload::ToolCallSuccess(_) | EventPayload::ToolCallFailed { .. } => {}
            EventPayload::RetryAttempted { .. } => {
                self.retries += 1;
            }
            EventPayload::PolicyViolation { kind, detail } => {
                self.violation = Some((*kind, detail.clone()));
            }
            EventPayload::ExecutionCompleted { final_output, .. } => {
                self.status = ExecutionStatus::Completed;
                self.final_output = Some(final_output.clone());
                self.finished_at = Some(event.timestamp);
            }
            EventPayload::ExecutionFailed { kind, detail } => {
                self.status = ExecutionStatus::Failed;
                self.failure = Some((*kind, detail.clone()));
                self.finished_at = Some(event.timestamp);
            }
        }
    }

    /// The smallest step that was started but not completed, if any.
    ///
    /// Resume re-runs this step; its trailing events are ignored rather
    /// than truncated.
    #[must_use]
    pub const fn first_incomplete_step(&self) -> Option<u64> {
        self.open_step
    }

    /// The step number resume should continue from
    #[must_use]
    pub fn resume_step(&self) -> u64 {
        self.open_step.unwrap_or(self.steps_completed)
    }

    /// Whether a terminal event has been recorded
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        )
    }
}

/// One row of a derived timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Event sequence
    pub sequence: u64,
    /// Event kind
    pub kind: EventKind,
    /// Step scope, if any
    pub step_number: Option<u64>,
    /// Append time
    pub timestamp: Timestamp,
}

/// Human-readable execution summary for debugging and dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTimeline {
    /// Owning execution
    pub execution_id: ExecutionId,
    /// Derived status
    pub status: ExecutionStatus,
    /// Total events in the log
    pub total_events: u64,
    /// Per-event rows in sequence order
    pub entries: Vec<TimelineEntry>,
}

impl ExecutionTimeline {
    /// Build a timeline from an ordered event slice
    #[must_use]
    pub fn from_events(execution_id: ExecutionId, events: &[Event]) -> Self {
        let status = ExecutionState::fold(execution_id, events).status;
        let entries = events
            .iter()
            .map(|e| TimelineEntry {
                sequence: e.sequence,
                kind: e.kind,
                step_number: e.step_number,
                timestamp: e.timestamp,
            })
            .collect();
        Self {
            execution_id,
            status,
            total_events: events.len() as u64,
            entries,
        }
    }
}
