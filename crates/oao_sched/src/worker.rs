//! Worker loop.
//!
//! A worker claims jobs, hands them to a handler, stores the result and
//! acks. Shutdown is graceful: the flag is checked between claims, and an
//! in-flight job always finishes first.

use crate::job::{Job, JobStatus};
use crate::scheduler::DistributedScheduler;
use async_trait::async_trait;
use oao_core::{CancelFlag, WorkerId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Worker identity
    pub worker_id: WorkerId,
    /// Wait between claim attempts when the queue is empty
    pub poll_interval: Duration,
}

impl WorkerConfig {
    /// Config with a fresh worker id
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_id: WorkerId::new(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Override the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Processes one claimed job into a result value.
///
/// Implementations run the execution engine (or resume it); re-delivery
/// of a job is safe because execution is re-entrant via the event log.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a job into its serialized result.
    ///
    /// # Errors
    ///
    /// Returns a message describing the processing failure; the worker
    /// records it as a failed result.
    async fn handle(&self, job: &Job) -> Result<Value, String>;
}

/// Background worker polling the scheduler
pub struct Worker {
    scheduler: Arc<DistributedScheduler>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    shutdown: CancelFlag,
}

impl Worker {
    /// Create a worker
    #[must_use]
    pub fn new(
        scheduler: Arc<DistributedScheduler>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            scheduler,
            handler,
            config,
            shutdown: CancelFlag::new(),
        }
    }

    /// Worker identity
    #[must_use]
    pub const fn worker_id(&self) -> WorkerId {
        self.config.worker_id
    }

    /// Handle for requesting graceful shutdown
    #[must_use]
    pub fn shutdown_flag(&self) -> CancelFlag {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    ///
    /// Every loop iteration heartbeats, claims at most one job, processes
    /// it to a stored result and acks. Queue errors back off for one poll
    /// interval instead of killing the worker.
    pub async fn run(&self) {
        let worker_id = self.config.worker_id;
        tracing::info!(%worker_id, "worker starting");

        while !self.shutdown.is_cancelled() {
            if let Err(err) = self.scheduler.heartbeat(worker_id) {
                tracing::error!(%worker_id, error = %err, "heartbeat failed");
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            let job = match self.scheduler.claim(worker_id) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                Err(err) => {
                    tracing::error!(%worker_id, error = %err, "claim failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            self.process(&job).await;
        }

        tracing::info!(%worker_id, "worker stopped");
    }

    async fn process(&self, job: &Job) {
        let worker_id = self.config.worker_id;
        tracing::info!(%worker_id, job_id = %job.job_id, attempt = job.attempt, "processing job");

        let (result, status) = match self.handler.handle(job).await {
            Ok(result) => {
                let status = if result.get("status").and_then(Value::as_str) == Some("FAILED") {
                    JobStatus::Failed
                } else {
                    JobStatus::Success
                };
                (result, status)
            }
            Err(detail) => (
                json!({
                    "status": "FAILED",
                    "error": detail,
                    "job_id": job.job_id.to_string(),
                }),
                JobStatus::Failed,
            ),
        };

        let queue = self.scheduler.queue();
        if let Err(err) = queue.store_result(job.job_id, result) {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to store result");
        }
        if let Err(err) = queue.set_status(job.job_id, status) {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to set status");
        }
        if let Err(err) = self.scheduler.ack(worker_id, job.job_id) {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to ack job");
        }
        tracing::info!(%worker_id, job_id = %job.job_id, status = ?status, "job finished");
    }
}
