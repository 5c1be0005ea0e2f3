//! Resume: continue an execution from its first incomplete step.

use crate::error::ReplayError;
use crate::rehydrate::rehydrate;
use oao_core::{ExecutionId, RUNTIME_VERSION};
use oao_log::EventLog;
use oao_policy::{PolicyConfig, PolicyEngine};
use oao_runtime::{AgentAdapter, ExecutionEngine, ExecutionReport};
use oao_store::{AgentIdentity, ExecutionSnapshot, SnapshotStore};
use oao_tool::ToolRegistry;
use std::sync::Arc;

/// Outcome of preparing a resume
pub enum Resumption {
    /// The log already holds a terminal event; nothing to run
    AlreadyTerminal(Box<ExecutionReport>),
    /// An engine positioned at the first incomplete step
    Engine(Box<ExecutionEngine>),
}

/// Verify hash continuity: the hash recomputed from current configuration
/// must equal the one frozen at execution start.
///
/// # Errors
///
/// Returns [`ReplayError::ExecutionHashMismatch`] on divergence.
pub(crate) fn verify_continuity(
    snapshot: &ExecutionSnapshot,
    adapter: &dyn AgentAdapter,
    registry: &ToolRegistry,
    policy: &PolicyConfig,
) -> Result<(), ReplayError> {
    let recomputed = ExecutionSnapshot::compute_hash(
        &snapshot.task,
        &policy.to_value(),
        &AgentIdentity::new(adapter.name(), adapter.version()),
        &registry.identities(),
        RUNTIME_VERSION,
    );
    if recomputed != snapshot.execution_hash {
        return Err(ReplayError::ExecutionHashMismatch {
            execution_id: snapshot.execution_id,
            expected: snapshot.execution_hash.to_hex(),
            actual: recomputed.to_hex(),
        });
    }
    Ok(())
}

/// Rehydrate and position an engine at the first incomplete step.
///
/// No events are appended here; a hash mismatch refuses the resume before
/// anything touches the log. A trailing `STEP_STARTED` without its
/// completion is ignored (never truncated) and that step is re-run, with
/// the interception layer deduplicating any tool calls it already made.
///
/// # Errors
///
/// Returns a [`ReplayError`] when the snapshot is missing, continuity is
/// broken, or a store is unavailable.
pub fn prepare_resume(
    log: Arc<dyn EventLog>,
    snapshots: &dyn SnapshotStore,
    adapter: Arc<dyn AgentAdapter>,
    registry: Arc<ToolRegistry>,
    policy: PolicyConfig,
    execution_id: ExecutionId,
) -> Result<Resumption, ReplayError> {
    let snapshot = snapshots
        .get(execution_id)?
        .ok_or(ReplayError::SnapshotMissing { execution_id })?;

    verify_continuity(&snapshot, adapter.as_ref(), &registry, &policy)?;

    let state = rehydrate(log.as_ref(), execution_id)?;
    if state.is_terminal() {
        tracing::info!(
            execution_id = %execution_id,
            "resume requested for terminal execution, returning recorded report"
        );
        let report = ExecutionReport::from_state(&state, adapter.name(), 0.0);
        return Ok(Resumption::AlreadyTerminal(Box::new(report)));
    }

    tracing::info!(
        execution_id = %execution_id,
        resume_step = state.resume_step(),
        events_folded = state.events_folded,
        "resuming execution"
    );

    // A resumed execution keeps its original trace identity.
    let original_trace = log
        .read(execution_id, 0)?
        .iter()
        .find_map(|event| event.trace_context.clone());

    let mut engine = ExecutionEngine::from_state(
        snapshot,
        adapter,
        registry,
        log,
        PolicyEngine::new(policy),
        state,
    );
    if let Some(trace) = original_trace {
        engine = engine.with_trace(trace);
    }
    Ok(Resumption::Engine(Box::new(engine)))
}

/// Resume an execution to its terminal event and report.
///
/// # Errors
///
/// Returns a [`ReplayError`] when the resume is refused; failures during
/// the continued run surface in the report, not here.
pub async fn resume(
    log: Arc<dyn EventLog>,
    snapshots: &dyn SnapshotStore,
    adapter: Arc<dyn AgentAdapter>,
    registry: Arc<ToolRegistry>,
    policy: PolicyConfig,
    execution_id: ExecutionId,
) -> Result<ExecutionReport, ReplayError> {
    match prepare_resume(log, snapshots, adapter, registry, policy, execution_id)? {
        Resumption::AlreadyTerminal(report) => Ok(*report),
        Resumption::Engine(mut engine) => Ok(engine.run().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oao_core::Digest;
    use oao_log::{
        EventDraft, EventKind, EventPayload, LifecycleState, MemoryEventLog, ToolCallRecord,
    };
    use oao_runtime::{AdapterError, ReportStatus, StepContext, StepOutcome};
    use oao_store::MemorySnapshotStore;
    use oao_tool::{arg_hash, Tool, ToolError, ToolOutput};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Calls `search("x")` and finishes with its result.
    struct SearchAdapter;

    #[async_trait]
    impl AgentAdapter for SearchAdapter {
        fn name(&self) -> &str {
            "search_agent"
        }

        async fn invoke(&self, ctx: StepContext) -> Result<StepOutcome, AdapterError> {
            let found = ctx.call_tool("search", json!("x")).await?;
            Ok(StepOutcome::finished(found).with_tokens(4))
        }
    }

    struct SearchTool {
        invocations: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for SearchTool {
        fn name(&self) -> &str {
            "search"
        }

        async fn invoke(&self, _args: Value) -> Result<ToolOutput, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::new(json!("fresh result")))
        }
    }

    struct Fixture {
        log: Arc<MemoryEventLog>,
        snapshots: MemorySnapshotStore,
        adapter: Arc<SearchAdapter>,
        registry: Arc<ToolRegistry>,
        policy: PolicyConfig,
        invocations: Arc<AtomicU32>,
        execution_id: ExecutionId,
    }

    fn make_fixture(policy: PolicyConfig) -> Fixture {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(SearchTool {
                invocations: invocations.clone(),
            }))
            .unwrap();
        let registry = Arc::new(registry);
        let adapter = Arc::new(SearchAdapter);

        let execution_id = ExecutionId::new();
        let snapshot = ExecutionSnapshot::create(
            execution_id,
            json!("find x"),
            policy.to_value(),
            AgentIdentity::new(adapter.name(), adapter.version()),
            registry.identities(),
        );
        let snapshots = MemorySnapshotStore::new();
        snapshots.put(snapshot).unwrap();

        Fixture {
            log: Arc::new(MemoryEventLog::new()),
            snapshots,
            adapter,
            registry,
            policy,
            invocations,
            execution_id,
        }
    }

    /// Write the log of a run that crashed mid-step 0, after its tool
    /// call succeeded but before STEP_COMPLETED.
    fn write_crashed_history(fixture: &Fixture) {
        let id = fixture.execution_id;
        let hash = arg_hash("search", &json!("x"));
        let snapshot = fixture.snapshots.get(id).unwrap().unwrap();

        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::ExecutionStarted {
                    task: snapshot.task.clone(),
                    execution_hash: snapshot.execution_hash,
                    agent_name: "search_agent".to_string(),
                }),
            )
            .unwrap();
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::StateEnter {
                    state: LifecycleState::Plan,
                }),
            )
            .unwrap();
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::StepStarted { step: 0 }).with_step(0),
            )
            .unwrap();
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::ToolCallStarted {
                    tool_name: "search".to_string(),
                    arg_hash: hash,
                })
                .with_step(0),
            )
            .unwrap();
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::ToolCallSuccess(ToolCallRecord {
                    tool_name: "search".to_string(),
                    arg_hash: hash,
                    result: json!("R"),
                    token_cost: None,
                }))
                .with_step(0),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_resume_reruns_incomplete_step_with_tool_dedup() {
        let fixture = make_fixture(PolicyConfig::unlimited());
        write_crashed_history(&fixture);

        let report = resume(
            fixture.log.clone(),
            &fixture.snapshots,
            fixture.adapter.clone(),
            fixture.registry.clone(),
            fixture.policy.clone(),
            fixture.execution_id,
        )
        .await
        .unwrap();

        assert_eq!(report.status, ReportStatus::Success);
        // The historical result was replayed; the real tool never ran.
        assert_eq!(fixture.invocations.load(Ordering::SeqCst), 0);
        assert_eq!(report.final_output, Some(json!("R")));

        // Exactly one TOOL_CALL_SUCCESS in the whole log.
        let events = fixture.log.read(fixture.execution_id, 0).unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| e.kind == EventKind::ToolCallSuccess)
                .count(),
            1
        );
        // Dense sequences survive the crash/resume boundary.
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i as u64);
        }
    }

    #[tokio::test]
    async fn test_resume_with_changed_policy_is_refused() {
        let fixture = make_fixture(PolicyConfig::unlimited().with_max_tokens(100));
        write_crashed_history(&fixture);
        let before = fixture.log.count(fixture.execution_id).unwrap();

        let err = resume(
            fixture.log.clone(),
            &fixture.snapshots,
            fixture.adapter.clone(),
            fixture.registry.clone(),
            PolicyConfig::unlimited().with_max_tokens(200),
            fixture.execution_id,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ReplayError::ExecutionHashMismatch { .. }));
        // Refusal appends nothing.
        assert_eq!(fixture.log.count(fixture.execution_id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_resume_of_terminal_execution_is_idempotent() {
        let fixture = make_fixture(PolicyConfig::unlimited());
        let id = fixture.execution_id;
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::ExecutionStarted {
                    task: json!("find x"),
                    execution_hash: Digest::empty(),
                    agent_name: "search_agent".to_string(),
                }),
            )
            .unwrap();
        fixture
            .log
            .append(
                id,
                EventDraft::new(EventPayload::ExecutionCompleted {
                    final_output: json!("done"),
                    total_steps: 1,
                    token_usage: 4,
                }),
            )
            .unwrap();
        let before = fixture.log.count(id).unwrap();

        let report = resume(
            fixture.log.clone(),
            &fixture.snapshots,
            fixture.adapter.clone(),
            fixture.registry.clone(),
            fixture.policy.clone(),
            id,
        )
        .await
        .unwrap();

        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.final_output, Some(json!("done")));
        assert_eq!(fixture.log.count(id).unwrap(), before);
        assert_eq!(fixture.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_without_snapshot_is_refused() {
        let fixture = make_fixture(PolicyConfig::unlimited());
        let err = resume(
            fixture.log.clone(),
            &fixture.snapshots,
            fixture.adapter.clone(),
            fixture.registry.clone(),
            fixture.policy.clone(),
            ExecutionId::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReplayError::SnapshotMissing { .. }));
    }
}
