//! OAO Distributed Scheduler
//!
//! A persistent queue of jobs keyed by execution id, claimed atomically
//! by workers under heartbeat liveness. Delivery is at-least-once: a
//! dead worker's in-flight jobs return to the pending list, and
//! idempotent re-delivery is safe because execution is re-entrant via
//! the event log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod job;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use job::{Job, JobStatus};
pub use queue::{JobQueue, MemoryJobQueue, QueueError};
pub use scheduler::DistributedScheduler;
pub use worker::{JobHandler, Worker, WorkerConfig};
