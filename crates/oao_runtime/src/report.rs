//! Terminal execution summary.
//!
//! Reports are derived from folded state, so a report generated from a
//! live run and one generated later from the log are identical.

use oao_log::{ExecutionState, ExecutionStatus, FailureKind, LifecycleState};
use oao_core::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// The execution completed
    Success,
    /// The execution failed
    Failed,
}

/// Structured cause carried by failed reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Failure taxonomy kind
    pub kind: FailureKind,
    /// Human-readable detail
    pub detail: String,
}

/// The user-visible summary of one execution.
///
/// Every failure surfaces in this same shape; no error kind leaks through
/// as an uncaught fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Owning execution
    pub execution_id: ExecutionId,
    /// Terminal status
    pub status: ReportStatus,
    /// Adapter name
    pub agent_name: String,
    /// Steps completed
    pub total_steps: u64,
    /// Cumulative token usage
    pub token_usage: u64,
    /// Real tool invocations attempted
    pub tool_calls: u64,
    /// Lifecycle states entered, in order
    pub state_history: Vec<LifecycleState>,
    /// Wall-clock duration of this run
    pub execution_time_seconds: f64,
    /// Final output, present on success
    pub final_output: Option<Value>,
    /// Structured cause, present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl ExecutionReport {
    /// Derive a report from folded state.
    ///
    /// A non-terminal state reports as an internal failure; the engine
    /// always reaches a terminal event before generating a report, so
    /// that path only fires when the log itself was cut short.
    #[must_use]
    pub fn from_state(
        state: &ExecutionState,
        agent_name: impl Into<String>,
        execution_time_seconds: f64,
    ) -> Self {
        let (status, failure) = match state.status {
            ExecutionStatus::Completed => (ReportStatus::Success, None),
            ExecutionStatus::Failed => {
                let (kind, detail) = state
                    .failure
                    .clone()
                    .unwrap_or((FailureKind::Internal, "failure cause missing".to_string()));
                (ReportStatus::Failed, Some(FailureDetail { kind, detail }))
            }
            ExecutionStatus::Pending | ExecutionStatus::Running => (
                ReportStatus::Failed,
                Some(FailureDetail {
                    kind: FailureKind::Internal,
                    detail: "execution did not reach a terminal event".to_string(),
                }),
            ),
        };

        Self {
            execution_id: state.execution_id,
            status,
            agent_name: agent_name.into(),
            total_steps: state.steps_completed,
            token_usage: state.token_usage,
            tool_calls: state.tool_calls,
            state_history: state.state_history.clone(),
            execution_time_seconds,
            final_output: state.final_output.clone(),
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_from_completed_state() {
        let mut state = ExecutionState::empty(ExecutionId::new());
        state.status = ExecutionStatus::Completed;
        state.steps_completed = 3;
        state.token_usage = 42;
        state.final_output = Some(json!("answer"));
        state.state_history = vec![LifecycleState::Plan, LifecycleState::Terminate];

        let report = ExecutionReport::from_state(&state, "echo_agent", 0.5);
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.total_steps, 3);
        assert_eq!(report.token_usage, 42);
        assert_eq!(report.final_output, Some(json!("answer")));
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_report_from_failed_state() {
        let mut state = ExecutionState::empty(ExecutionId::new());
        state.status = ExecutionStatus::Failed;
        state.failure = Some((FailureKind::PolicyViolation, "over budget".to_string()));

        let report = ExecutionReport::from_state(&state, "a", 0.0);
        assert_eq!(report.status, ReportStatus::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::PolicyViolation);
        assert_eq!(failure.detail, "over budget");
    }

    #[test]
    fn test_non_terminal_state_reports_internal_failure() {
        let state = ExecutionState::empty(ExecutionId::new());
        let report = ExecutionReport::from_state(&state, "a", 0.0);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, FailureKind::Internal);
    }

    #[test]
    fn test_status_wire_encoding() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&ReportStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }
}
