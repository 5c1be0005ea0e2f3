//! OAO Snapshot Store
//!
//! The immutable configuration captured at execution start and the store
//! that owns it. Nothing in the runtime mutates a snapshot after creation;
//! resume verifies the stored execution hash against a recomputation from
//! current configuration before continuing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot;
pub mod store;

pub use snapshot::{AgentIdentity, ExecutionSnapshot};
pub use store::{MemorySnapshotStore, SnapshotStore, StoreError};
