//! The scheduler façade over a job queue.
//!
//! Adds execution-log observability to the raw queue: every dead-worker
//! re-queue appends a `RETRY_ATTEMPTED` event to the affected execution.

use crate::job::{Job, JobStatus};
use crate::queue::{JobQueue, QueueError};
use oao_core::{ExecutionId, JobId, Timestamp, WorkerId};
use oao_log::{EventDraft, EventLog, EventPayload, LogError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default liveness bound before a worker is considered dead
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue plus event-log observability
pub struct DistributedScheduler {
    queue: Arc<dyn JobQueue>,
    log: Arc<dyn EventLog>,
    worker_timeout: Duration,
}

impl DistributedScheduler {
    /// Create a scheduler over a queue and the shared event log
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, log: Arc<dyn EventLog>) -> Self {
        Self {
            queue,
            log,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    /// Override the worker liveness bound
    #[must_use]
    pub fn with_worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.worker_timeout = worker_timeout;
        self
    }

    /// The configured worker liveness bound
    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }

    /// The underlying queue
    #[must_use]
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Submit a job for an execution.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the store is unavailable.
    pub fn submit(&self, execution_id: ExecutionId, payload: Value) -> Result<JobId, QueueError> {
        let job = Job::new(execution_id, payload);
        let job_id = job.job_id;
        self.queue.enqueue(job)?;
        tracing::info!(%execution_id, %job_id, "job submitted");
        Ok(job_id)
    }

    /// Claim one job for a worker.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the store is unavailable.
    pub fn claim(&self, worker_id: WorkerId) -> Result<Option<Job>, QueueError> {
        self.queue.claim(worker_id)
    }

    /// Acknowledge a processed job.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the worker does not hold the job.
    pub fn ack(&self, worker_id: WorkerId, job_id: JobId) -> Result<(), QueueError> {
        self.queue.ack(worker_id, job_id)
    }

    /// Record worker liveness.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the store is unavailable.
    pub fn heartbeat(&self, worker_id: WorkerId) -> Result<(), QueueError> {
        self.queue.heartbeat(worker_id, Timestamp::now())
    }

    /// Re-queue every job held by dead workers, appending a
    /// `RETRY_ATTEMPTED` event per affected execution.
    ///
    /// Executions that reached a terminal event between the claim and the
    /// crash refuse further appends; the re-queue still happens, and the
    /// worker that picks the job up will find the terminal log and stop.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the store is unavailable.
    pub fn recover(&self) -> Result<Vec<Job>, QueueError> {
        let requeued = self.queue.recover(Timestamp::now(), self.worker_timeout)?;
        for job in &requeued {
            tracing::warn!(
                execution_id = %job.execution_id,
                job_id = %job.job_id,
                attempt = job.attempt,
                "dead worker detected, job re-queued"
            );
            let draft = EventDraft::new(EventPayload::RetryAttempted {
                attempt: job.attempt,
                delay_ms: 0,
            });
            match self.log.append(job.execution_id, draft) {
                Ok(_) | Err(LogError::TerminalAlreadyRecorded { .. }) => {}
                Err(err) => {
                    tracing::error!(
                        execution_id = %job.execution_id,
                        error = %err,
                        "failed to record re-queue event"
                    );
                }
            }
        }
        Ok(requeued)
    }

    /// Read a job's status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] for unknown jobs.
    pub fn status(&self, job_id: JobId) -> Result<JobStatus, QueueError> {
        self.queue.status(job_id)
    }

    /// Fetch a job's result, waiting up to `timeout` for it to appear.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the store is unavailable.
    pub async fn fetch_result(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<Option<Value>, QueueError> {
        let deadline = Timestamp::now().plus(timeout);
        loop {
            if let Some(result) = self.queue.fetch_result(job_id)? {
                return Ok(Some(result));
            }
            if Timestamp::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
