//! Runtime configuration.
//!
//! The full recognized option set from the submission surface. Policy
//! budgets live in [`PolicyConfig`]; this adds the backend selectors and
//! the scheduler/retention knobs.

use oao_policy::PolicyConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage backend selector.
///
/// The Redis layout is the reference encoding (`oao:events:{id}` sorted
/// sets, `oao:snapshot:{id}` keys, `oao:q:*` lists, `oao:hb:*` heartbeat
/// keys); a deployment provides the client-backed stores for it. Without
/// one registered, selecting `Redis` is a configuration error and the
/// in-memory backends, which keep the same observable semantics, are the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process stores, not durable across restarts
    #[default]
    Memory,
    /// Redis-backed stores (requires a registered backend)
    Redis,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The selected backend has no registered implementation
    #[error("Backend '{backend}' is not available in this build")]
    BackendUnavailable {
        /// The selected backend
        backend: String,
    },
}

/// The recognized runtime options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default governance budgets for submissions that carry none
    pub policy: PolicyConfig,
    /// Snapshot/job persistence backend
    pub persistence_backend: BackendKind,
    /// Event log backend
    pub event_store_backend: BackendKind,
    /// Heartbeat age after which a worker counts as dead
    pub worker_timeout: Duration,
    /// Event retention, re-extended on every append
    pub event_retention: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            persistence_backend: BackendKind::Memory,
            event_store_backend: BackendKind::Memory,
            worker_timeout: Duration::from_secs(30),
            event_retention: oao_log::DEFAULT_RETENTION,
        }
    }
}

impl RuntimeConfig {
    /// Override the default policy
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Override the worker liveness bound
    #[must_use]
    pub fn with_worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.worker_timeout = worker_timeout;
        self
    }

    /// Override event retention
    #[must_use]
    pub fn with_event_retention(mut self, event_retention: Duration) -> Self {
        self.event_retention = event_retention;
        self
    }
}
