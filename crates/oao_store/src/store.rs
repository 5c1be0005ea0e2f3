//! Snapshot store backends.
//!
//! Reference persisted layout: one key `oao:snapshot:{execution_id}` per
//! execution, written once. Re-submission with an identical hash is
//! idempotent; any other hash for an existing id is a conflict.

use crate::snapshot::ExecutionSnapshot;
use oao_core::ExecutionId;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Snapshot store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An execution id exists with a different configuration hash
    HashConflict {
        /// The contested execution
        execution_id: ExecutionId,
        /// Stored hash (hex)
        existing: String,
        /// Newly submitted hash (hex)
        submitted: String,
    },
    /// Backing store failure
    Backend {
        /// What went wrong
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashConflict {
                execution_id,
                existing,
                submitted,
            } => write!(
                f,
                "Snapshot hash conflict for {}: stored {}, submitted {}",
                execution_id, existing, submitted
            ),
            Self::Backend { reason } => write!(f, "Snapshot store backend error: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

/// Store of immutable execution snapshots
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot.
    ///
    /// Idempotent for identical hashes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HashConflict`] if the id exists with a
    /// different hash.
    fn put(&self, snapshot: ExecutionSnapshot) -> Result<(), StoreError>;

    /// Fetch the snapshot an engine must use to resume.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn get(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>, StoreError>;
}

/// In-memory snapshot store
pub struct MemorySnapshotStore {
    inner: RwLock<HashMap<ExecutionId, ExecutionSnapshot>>,
}

impl MemorySnapshotStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, snapshot: ExecutionSnapshot) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Backend {
            reason: "snapshot store lock poisoned".to_string(),
        })?;
        if let Some(existing) = inner.get(&snapshot.execution_id) {
            if existing.execution_hash != snapshot.execution_hash {
                return Err(StoreError::HashConflict {
                    execution_id: snapshot.execution_id,
                    existing: existing.execution_hash.to_hex(),
                    submitted: snapshot.execution_hash.to_hex(),
                });
            }
            return Ok(());
        }
        inner.insert(snapshot.execution_id, snapshot);
        Ok(())
    }

    fn get(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Backend {
            reason: "snapshot store lock poisoned".to_string(),
        })?;
        Ok(inner.get(&execution_id).cloned())
    }
}
