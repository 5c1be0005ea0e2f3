//! Replay error types.

use oao_core::ExecutionId;
use oao_log::LogError;
use std::fmt;

/// Errors refusing or aborting a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// No snapshot stored for the execution
    SnapshotMissing {
        /// The requested execution
        execution_id: ExecutionId,
    },
    /// The recomputed configuration hash diverges from the stored one
    ExecutionHashMismatch {
        /// The requested execution
        execution_id: ExecutionId,
        /// Hash stored at execution start (hex)
        expected: String,
        /// Hash computed from current configuration (hex)
        actual: String,
    },
    /// Forced re-execution would touch non-idempotent tools
    NonIdempotentTools {
        /// The offending tool names
        tools: Vec<String>,
    },
    /// Snapshot store failure
    Store {
        /// What went wrong
        reason: String,
    },
    /// Event log failure
    Log(LogError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotMissing { execution_id } => {
                write!(f, "No snapshot stored for {}", execution_id)
            }
            Self::ExecutionHashMismatch {
                execution_id,
                expected,
                actual,
            } => write!(
                f,
                "Execution hash mismatch for {}: stored {}, recomputed {}",
                execution_id, expected, actual
            ),
            Self::NonIdempotentTools { tools } => write!(
                f,
                "Forced re-execution refused: non-idempotent tools in history: {}",
                tools.join(", ")
            ),
            Self::Store { reason } => write!(f, "Snapshot store error: {}", reason),
            Self::Log(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<LogError> for ReplayError {
    fn from(err: LogError) -> Self {
        Self::Log(err)
    }
}

impl From<oao_store::StoreError> for ReplayError {
    fn from(err: oao_store::StoreError) -> Self {
        Self::Store {
            reason: err.to_string(),
        }
    }
}
