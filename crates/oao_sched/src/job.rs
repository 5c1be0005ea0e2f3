//! Queued units of work.

use oao_core::{ExecutionId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting on the pending list
    Pending,
    /// Claimed by a worker
    Running,
    /// Processed, execution succeeded
    Success,
    /// Processed, execution failed
    Failed,
}

/// One queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id
    pub job_id: JobId,
    /// The execution this job drives; the scheduler's affinity key
    pub execution_id: ExecutionId,
    /// Task details for the worker (task, agent name, policy overrides)
    pub payload: Value,
    /// Delivery attempt, incremented on every re-queue
    pub attempt: u32,
    /// When the job was first enqueued
    pub enqueued_at: Timestamp,
    /// Until when the current claim is expected to make progress;
    /// stamped at claim time, cleared on re-queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_deadline: Option<Timestamp>,
}

impl Job {
    /// Create a first-attempt job
    #[must_use]
    pub fn new(execution_id: ExecutionId, payload: Value) -> Self {
        Self {
            job_id: JobId::new(),
            execution_id,
            payload,
            attempt: 0,
            enqueued_at: Timestamp::now(),
            visibility_deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_roundtrip() {
        let job = Job::new(ExecutionId::new(), json!({"task": "echo"}));
        let encoded = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(job, back);
        assert_eq!(back.attempt, 0);
    }
}
