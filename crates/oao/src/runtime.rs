//! The runtime facade: submission, resume, replay, cancellation.
//!
//! One `Runtime` owns the shared substrate (event log, snapshot store,
//! tool registry, event bus, scheduler) and hands every execution to a
//! fresh engine. Nothing here mutates execution state directly; the only
//! cross-component channel is the log.

use crate::config::{BackendKind, ConfigError, RuntimeConfig};
use oao_core::{CancelFlag, ExecutionId};
use oao_log::{EventBus, EventLog, ExecutionState, ExecutionTimeline, LogError, MemoryEventLog};
use oao_policy::{PolicyConfig, PolicyEngine, PolicyRegistry};
use oao_replay::{audit_replay, prepare_resume, rehydrate, timeline, AuditOptions, AuditReport, ReplayError, Resumption};
use oao_runtime::{AdapterRegistry, AgentAdapter, ExecutionEngine, ExecutionReport};
use oao_sched::{DistributedScheduler, MemoryJobQueue};
use oao_store::{AgentIdentity, ExecutionSnapshot, MemorySnapshotStore, SnapshotStore, StoreError};
use oao_dag::{GraphConfig, GraphExecutor};
use oao_tool::{RegistryError, ToolRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Errors from the submission surface
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Snapshot store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Event log failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Replay or resume refusal
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tool registration problem
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Assembles a [`Runtime`]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    tools: ToolRegistry,
    adapters: AdapterRegistry,
    policies: PolicyRegistry,
}

impl RuntimeBuilder {
    /// Start from the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            tools: ToolRegistry::new(),
            adapters: AdapterRegistry::new(),
            policies: PolicyRegistry::with_defaults(),
        }
    }

    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn register_tool(&mut self, tool: Arc<dyn oao_tool::Tool>) -> Result<(), RegistryError> {
        self.tools.register(tool)
    }

    /// Register an adapter for name-based resolution (scheduler jobs,
    /// recovery)
    pub fn register_adapter(&mut self, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.register(adapter);
    }

    /// Register a named policy preset
    pub fn register_policy(&mut self, name: impl Into<String>, policy: PolicyConfig) {
        self.policies.register(name, policy);
    }

    /// Build the runtime, constructing the configured backends.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BackendUnavailable`] when a selected
    /// backend has no registered implementation.
    pub fn build(self) -> Result<Runtime, ConfigError> {
        let bus = EventBus::new();

        let log: Arc<dyn EventLog> = match self.config.event_store_backend {
            BackendKind::Memory => Arc::new(
                MemoryEventLog::with_retention(self.config.event_retention)
                    .with_bus(bus.clone()),
            ),
            BackendKind::Redis => {
                return Err(ConfigError::BackendUnavailable {
                    backend: "redis".to_string(),
                })
            }
        };
        let (snapshots, scheduler): (Arc<dyn SnapshotStore>, DistributedScheduler) =
            match self.config.persistence_backend {
                BackendKind::Memory => (
                    Arc::new(MemorySnapshotStore::new()),
                    DistributedScheduler::new(Arc::new(MemoryJobQueue::new()), log.clone())
                        .with_worker_timeout(self.config.worker_timeout),
                ),
                BackendKind::Redis => {
                    return Err(ConfigError::BackendUnavailable {
                        backend: "redis".to_string(),
                    })
                }
            };

        Ok(Runtime {
            config: self.config,
            log,
            snapshots,
            tools: Arc::new(self.tools),
            adapters: Arc::new(self.adapters),
            policies: self.policies,
            bus,
            scheduler: Arc::new(scheduler),
            active: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

/// The deterministic execution runtime
pub struct Runtime {
    config: RuntimeConfig,
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    tools: Arc<ToolRegistry>,
    adapters: Arc<AdapterRegistry>,
    policies: PolicyRegistry,
    bus: EventBus,
    scheduler: Arc<DistributedScheduler>,
    active: Mutex<HashMap<ExecutionId, CancelFlag>>,
}

impl Runtime {
    /// Builder entry point
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The shared event log
    #[must_use]
    pub fn log(&self) -> Arc<dyn EventLog> {
        self.log.clone()
    }

    /// The shared snapshot store
    #[must_use]
    pub fn snapshots(&self) -> Arc<dyn SnapshotStore> {
        self.snapshots.clone()
    }

    /// The shared tool registry
    #[must_use]
    pub fn tools(&self) -> Arc<ToolRegistry> {
        self.tools.clone()
    }

    /// The adapter registry for name-based resolution
    #[must_use]
    pub fn adapters(&self) -> Arc<AdapterRegistry> {
        self.adapters.clone()
    }

    /// The event bus the log publishes every append to
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The distributed scheduler over the configured queue backend
    #[must_use]
    pub fn scheduler(&self) -> Arc<DistributedScheduler> {
        self.scheduler.clone()
    }

    /// The default policy applied to submissions without one
    #[must_use]
    pub fn default_policy(&self) -> PolicyConfig {
        self.config.policy.clone()
    }

    /// The named policy presets
    #[must_use]
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Run a task under the default policy.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when admission fails; failures during
    /// the run surface in the report.
    pub async fn run(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        task: Value,
    ) -> Result<ExecutionReport, RuntimeError> {
        let policy = self.default_policy();
        self.run_execution(adapter, ExecutionId::new(), task, policy)
            .await
    }

    /// Run a task under an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when admission fails.
    pub async fn run_with_policy(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        task: Value,
        policy: PolicyConfig,
    ) -> Result<ExecutionReport, RuntimeError> {
        self.run_execution(adapter, ExecutionId::new(), task, policy)
            .await
    }

    /// Run without waiting: returns the execution id and a handle to the
    /// eventual report.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when admission fails.
    pub fn run_detached(
        self: &Arc<Self>,
        adapter: Arc<dyn AgentAdapter>,
        task: Value,
        policy: Option<PolicyConfig>,
    ) -> Result<(ExecutionId, JoinHandle<ExecutionReport>), RuntimeError> {
        let policy = policy.unwrap_or_else(|| self.default_policy());
        let execution_id = ExecutionId::new();
        let mut engine = self.admit(adapter, execution_id, task, policy)?;

        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let report = engine.run().await;
            runtime.deregister(execution_id);
            report
        });
        Ok((execution_id, handle))
    }

    pub(crate) async fn run_execution(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        execution_id: ExecutionId,
        task: Value,
        policy: PolicyConfig,
    ) -> Result<ExecutionReport, RuntimeError> {
        let mut engine = self.admit(adapter, execution_id, task, policy)?;
        let report = engine.run().await;
        self.deregister(execution_id);
        Ok(report)
    }

    /// Freeze the snapshot, store it, and build a registered engine.
    fn admit(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        execution_id: ExecutionId,
        task: Value,
        policy: PolicyConfig,
    ) -> Result<ExecutionEngine, RuntimeError> {
        let snapshot = ExecutionSnapshot::create(
            execution_id,
            task,
            policy.to_value(),
            AgentIdentity::new(adapter.name(), adapter.version()),
            self.tools.identities(),
        );
        self.snapshots.put(snapshot.clone())?;

        let engine = ExecutionEngine::new(
            snapshot,
            adapter,
            self.tools.clone(),
            self.log.clone(),
            PolicyEngine::new(policy),
        );
        self.register(execution_id, engine.cancel_flag());
        Ok(engine)
    }

    /// Resume an execution under the default policy.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] carrying the refusal (missing snapshot,
    /// hash mismatch) when the resume cannot start.
    pub async fn resume(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        execution_id: ExecutionId,
    ) -> Result<ExecutionReport, RuntimeError> {
        let policy = self.default_policy();
        self.resume_with_policy(adapter, execution_id, policy).await
    }

    /// Resume an execution under an explicit policy.
    ///
    /// Hash continuity is verified against the stored snapshot before
    /// anything touches the log.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] carrying the refusal.
    pub async fn resume_with_policy(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        execution_id: ExecutionId,
        policy: PolicyConfig,
    ) -> Result<ExecutionReport, RuntimeError> {
        let resumption = prepare_resume(
            self.log.clone(),
            self.snapshots.as_ref(),
            adapter,
            self.tools.clone(),
            policy,
            execution_id,
        )?;
        match resumption {
            Resumption::AlreadyTerminal(report) => Ok(*report),
            Resumption::Engine(mut engine) => {
                self.register(execution_id, engine.cancel_flag());
                let report = engine.run().await;
                self.deregister(execution_id);
                Ok(report)
            }
        }
    }

    /// Rehydrate an execution's state from its log (side-effect-free).
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] if the log is unavailable.
    pub fn rehydrate(&self, execution_id: ExecutionId) -> Result<ExecutionState, RuntimeError> {
        Ok(rehydrate(self.log.as_ref(), execution_id)?)
    }

    /// Derive a human-readable timeline of an execution.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] if the log is unavailable.
    pub fn timeline(&self, execution_id: ExecutionId) -> Result<ExecutionTimeline, RuntimeError> {
        Ok(timeline(self.log.as_ref(), execution_id)?)
    }

    /// Forced re-execution audit under the default policy.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] carrying the refusal (hash mismatch,
    /// non-idempotent tools).
    pub async fn audit(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        execution_id: ExecutionId,
        options: AuditOptions,
    ) -> Result<AuditReport, RuntimeError> {
        Ok(audit_replay(
            self.log.as_ref(),
            self.snapshots.as_ref(),
            adapter,
            self.tools.clone(),
            self.default_policy(),
            execution_id,
            options,
        )
        .await?)
    }

    /// Request cancellation of a running execution.
    ///
    /// Returns `false` when the execution is not currently active here.
    /// The engine observes the flag at its next pre-step or pre-tool
    /// check; in-flight tool calls finish first.
    pub fn cancel(&self, execution_id: ExecutionId) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.get(&execution_id) {
            Some(flag) => {
                tracing::info!(%execution_id, "cancellation requested");
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// A graph executor over this runtime's substrate
    #[must_use]
    pub fn graph_executor(&self) -> GraphExecutor {
        GraphExecutor::new(
            self.log.clone(),
            self.snapshots.clone(),
            self.tools.clone(),
            self.default_policy(),
        )
    }

    /// A graph executor with explicit policy and configuration
    #[must_use]
    pub fn graph_executor_with(&self, policy: PolicyConfig, config: GraphConfig) -> GraphExecutor {
        GraphExecutor::new(
            self.log.clone(),
            self.snapshots.clone(),
            self.tools.clone(),
            policy,
        )
        .with_config(config)
    }

    fn register(&self, execution_id: ExecutionId, flag: CancelFlag) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(execution_id, flag);
        }
    }

    fn deregister(&self, execution_id: ExecutionId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&execution_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_runtime() {
        let runtime = Runtime::builder().build().unwrap();
        assert!(runtime.tools().is_empty());
        assert_eq!(runtime.default_policy(), PolicyConfig::default());
    }

    #[test]
    fn test_redis_backend_requires_registration() {
        let config = RuntimeConfig {
            event_store_backend: BackendKind::Redis,
            ..Default::default()
        };
        let err = Runtime::builder().with_config(config).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BackendUnavailable {
                backend: "redis".to_string()
            }
        );
    }

    #[test]
    fn test_cancel_unknown_execution() {
        let runtime = Runtime::builder().build().unwrap();
        assert!(!runtime.cancel(ExecutionId::new()));
    }
}
