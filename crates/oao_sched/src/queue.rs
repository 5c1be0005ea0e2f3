//! Job queue backends.
//!
//! Reference persisted layout is Redis-shaped: a pending list
//! `oao:q:pending`, one in-flight list `oao:q:inflight:{worker_id}` per
//! worker, a heartbeat key `oao:hb:{worker_id}` with TTL, and result keys
//! with a one-hour TTL. A claim is an atomic pop-push from pending to the
//! claimer's in-flight list; the in-memory backend provides the same
//! semantics under one lock.

use crate::job::{Job, JobStatus};
use oao_core::{ExecutionId, JobId, Timestamp, WorkerId};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Job not found where it was expected
    #[error("Job not found: {job_id}")]
    JobNotFound {
        /// The missing job
        job_id: JobId,
    },

    /// Backing store failure
    #[error("Queue backend error: {reason}")]
    Backend {
        /// What went wrong
        reason: String,
    },
}

/// The scheduler's backing queue.
///
/// All operations are atomic with respect to each other. At most one
/// worker holds a given execution id in flight at any time (affinity);
/// `claim` skips jobs whose execution is already held.
pub trait JobQueue: Send + Sync {
    /// Push a job onto the pending list.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Atomically move one claimable job from pending to the worker's
    /// in-flight list. Returns `None` when no work is claimable.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn claim(&self, worker_id: WorkerId) -> Result<Option<Job>, QueueError>;

    /// Remove a processed job from the worker's in-flight list.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if the worker does not hold
    /// the job.
    fn ack(&self, worker_id: WorkerId, job_id: JobId) -> Result<(), QueueError>;

    /// Record worker liveness.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn heartbeat(&self, worker_id: WorkerId, now: Timestamp) -> Result<(), QueueError>;

    /// Re-queue every job held by workers whose heartbeat age exceeds
    /// `worker_timeout`, incrementing each job's attempt. Returns the
    /// re-queued jobs. Atomic per worker.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn recover(&self, now: Timestamp, worker_timeout: Duration) -> Result<Vec<Job>, QueueError>;

    /// Number of jobs on the pending list.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn pending_len(&self) -> Result<usize, QueueError>;

    /// Jobs currently held by a worker.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn in_flight(&self, worker_id: WorkerId) -> Result<Vec<Job>, QueueError>;

    /// Update a job's status.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), QueueError>;

    /// Read a job's status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] for unknown jobs.
    fn status(&self, job_id: JobId) -> Result<JobStatus, QueueError>;

    /// Store a job's result (the serialized execution report).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn store_result(&self, job_id: JobId, result: Value) -> Result<(), QueueError>;

    /// Fetch a job's result, if ready.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn fetch_result(&self, job_id: JobId) -> Result<Option<Value>, QueueError>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    in_flight: HashMap<WorkerId, Vec<Job>>,
    heartbeats: HashMap<WorkerId, Timestamp>,
    statuses: HashMap<JobId, JobStatus>,
    results: HashMap<JobId, Value>,
}

impl QueueState {
    fn held_executions(&self) -> HashSet<ExecutionId> {
        self.in_flight
            .values()
            .flatten()
            .map(|job| job.execution_id)
            .collect()
    }
}

/// Default visibility window stamped onto claimed jobs
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// In-memory job queue
pub struct MemoryJobQueue {
    inner: Mutex<QueueState>,
    visibility_timeout: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState::default()),
            visibility_timeout: DEFAULT_VISIBILITY,
        }
    }

    /// Override the visibility window stamped onto claimed jobs
    #[must_use]
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.inner.lock().map_err(|_| QueueError::Backend {
            reason: "queue mutex poisoned".to_string(),
        })
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.statuses.insert(job.job_id, JobStatus::Pending);
        state.pending.push_back(job);
        Ok(())
    }

    fn claim(&self, worker_id: WorkerId) -> Result<Option<Job>, QueueError> {
        let mut state = self.lock()?;
        let held = state.held_executions();
        let Some(position) = state
            .pending
            .iter()
            .position(|job| !held.contains(&job.execution_id))
        else {
            return Ok(None);
        };
        let Some(mut job) = state.pending.remove(position) else {
            return Ok(None);
        };
        job.visibility_deadline = Some(Timestamp::now().plus(self.visibility_timeout));
        state.statuses.insert(job.job_id, JobStatus::Running);
        state
            .in_flight
            .entry(worker_id)
            .or_default()
            .push(job.clone());
        Ok(Some(job))
    }

    fn ack(&self, worker_id: WorkerId, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let Some(jobs) = state.in_flight.get_mut(&worker_id) else {
            return Err(QueueError::JobNotFound { job_id });
        };
        let Some(position) = jobs.iter().position(|job| job.job_id == job_id) else {
            return Err(QueueError::JobNotFound { job_id });
        };
        jobs.remove(position);
        Ok(())
    }

    fn heartbeat(&self, worker_id: WorkerId, now: Timestamp) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.heartbeats.insert(worker_id, now);
        Ok(())
    }

    fn recover(&self, now: Timestamp, worker_timeout: Duration) -> Result<Vec<Job>, QueueError> {
        let mut state = self.lock()?;
        let dead: Vec<WorkerId> = state
            .in_flight
            .iter()
            .filter(|(worker_id, jobs)| {
                if jobs.is_empty() {
                    return false;
                }
                let last = state.heartbeats.get(worker_id).copied();
                match last {
                    Some(ts) => now.since(ts) > worker_timeout,
                    None => true,
                }
            })
            .map(|(worker_id, _)| *worker_id)
            .collect();

        let mut requeued = Vec::new();
        for worker_id in dead {
            let Some(jobs) = state.in_flight.remove(&worker_id) else {
                continue;
            };
            for mut job in jobs {
                job.attempt += 1;
                job.visibility_deadline = None;
                state.statuses.insert(job.job_id, JobStatus::Pending);
                state.pending.push_back(job.clone());
                requeued.push(job);
            }
        }
        Ok(requeued)
    }

    fn pending_len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.pending.len())
    }

    fn in_flight(&self, worker_id: WorkerId) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .lock()?
            .in_flight
            .get(&worker_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), QueueError> {
        self.lock()?.statuses.insert(job_id, status);
        Ok(())
    }

    fn status(&self, job_id: JobId) -> Result<JobStatus, QueueError> {
        self.lock()?
            .statuses
            .get(&job_id)
            .copied()
            .ok_or(QueueError::JobNotFound { job_id })
    }

    fn store_result(&self, job_id: JobId, result: Value) -> Result<(), QueueError> {
        self.lock()?.results.insert(job_id, result);
        Ok(())
    }

    fn fetch_result(&self, job_id: JobId) -> Result<Option<Value>, QueueError> {
        Ok(self.lock()?.results.get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job() -> Job {
        Job::new(ExecutionId::new(), json!({"task": "t"}))
    }

    #[test]
    fn test_claim_is_an_atomic_move() {
        let queue = MemoryJobQueue::new();
        let worker = WorkerId::new();
        let job = make_job();
        queue.enqueue(job.clone()).unwrap();
        assert_eq!(queue.pending_len().unwrap(), 1);

        let claimed = queue.claim(worker).unwrap().unwrap();
        assert_eq!(claimed.job_id, job.job_id);
        assert!(claimed.visibility_deadline.is_some());
        assert_eq!(queue.pending_len().unwrap(), 0);
        assert_eq!(queue.in_flight(worker).unwrap().len(), 1);
        assert_eq!(queue.status(job.job_id).unwrap(), JobStatus::Running);

        assert!(queue.claim(worker).unwrap().is_none());
    }

    #[test]
    fn test_ack_removes_from_in_flight() {
        let queue = MemoryJobQueue::new();
        let worker = WorkerId::new();
        let job = make_job();
        queue.enqueue(job.clone()).unwrap();
        queue.claim(worker).unwrap().unwrap();

        queue.ack(worker, job.job_id).unwrap();
        assert!(queue.in_flight(worker).unwrap().is_empty());

        let err = queue.ack(worker, job.job_id).unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound { .. }));
    }

    #[test]
    fn test_execution_affinity_excludes_concurrent_holders() {
        let queue = MemoryJobQueue::new();
        let execution_id = ExecutionId::new();
        let first = Job::new(execution_id, json!(1));
        let second = Job::new(execution_id, json!(2));
        let other = make_job();
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second).unwrap();
        queue.enqueue(other.clone()).unwrap();

        let w1 = WorkerId::new();
        let w2 = WorkerId::new();
        assert_eq!(queue.claim(w1).unwrap().unwrap().job_id, first.job_id);

        // The second job for the same execution is skipped; the unrelated
        // job is handed out instead.
        assert_eq!(queue.claim(w2).unwrap().unwrap().job_id, other.job_id);
        assert!(queue.claim(w2).unwrap().is_none());

        // Once the first is acked, the execution is claimable again.
        queue.ack(w1, first.job_id).unwrap();
        assert!(queue.claim(w2).unwrap().is_some());
    }

    #[test]
    fn test_recover_requeues_dead_workers_jobs() {
        let queue = MemoryJobQueue::new();
        let worker = WorkerId::new();
        let job = make_job();
        queue.enqueue(job.clone()).unwrap();

        queue.heartbeat(worker, Timestamp::from_millis(0)).unwrap();
        queue.claim(worker).unwrap().unwrap();

        // Heartbeat still fresh: nothing to recover.
        let requeued = queue
            .recover(Timestamp::from_millis(1_000), Duration::from_secs(5))
            .unwrap();
        assert!(requeued.is_empty());

        // Heartbeat expired: the job returns to pending with attempt+1.
        let requeued = queue
            .recover(Timestamp::from_millis(10_000), Duration::from_secs(5))
            .unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].job_id, job.job_id);
        assert_eq!(requeued[0].attempt, 1);
        assert!(requeued[0].visibility_deadline.is_none());
        assert_eq!(queue.pending_len().unwrap(), 1);
        assert!(queue.in_flight(worker).unwrap().is_empty());
        assert_eq!(queue.status(job.job_id).unwrap(), JobStatus::Pending);
    }

    #[test]
    fn test_recover_ignores_live_workers() {
        let queue = MemoryJobQueue::new();
        let live = WorkerId::new();
        let dead = WorkerId::new();
        queue.enqueue(make_job()).unwrap();
        queue.enqueue(make_job()).unwrap();

        queue.heartbeat(live, Timestamp::from_millis(9_500)).unwrap();
        queue.heartbeat(dead, Timestamp::from_millis(0)).unwrap();
        queue.claim(live).unwrap().unwrap();
        queue.claim(dead).unwrap().unwrap();

        let requeued = queue
            .recover(Timestamp::from_millis(10_000), Duration::from_secs(5))
            .unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(queue.in_flight(live).unwrap().len(), 1);
    }

    #[test]
    fn test_results_and_status() {
        let queue = MemoryJobQueue::new();
        let job = make_job();
        queue.enqueue(job.clone()).unwrap();

        assert!(queue.fetch_result(job.job_id).unwrap().is_none());
        queue
            .store_result(job.job_id, json!({"status": "SUCCESS"}))
            .unwrap();
        queue.set_status(job.job_id, JobStatus::Success).unwrap();

        assert_eq!(
            queue.fetch_result(job.job_id).unwrap().unwrap()["status"],
            "SUCCESS"
        );
        assert_eq!(queue.status(job.job_id).unwrap(), JobStatus::Success);
    }
}
