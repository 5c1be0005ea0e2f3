//! Forced re-execution audit.
//!
//! Re-runs a completed execution against a scratch log and compares the
//! produced event stream with the historical one. Divergence in
//! `(event_type, step_number, arg_hash, token_usage)` is a determinism
//! violation. The historical log is never written to.

use crate::error::ReplayError;
use crate::resume::verify_continuity;
use oao_core::{Digest, ExecutionId};
use oao_log::{Event, EventLog, EventPayload, FailureKind, MemoryEventLog};
use oao_policy::{PolicyConfig, PolicyEngine};
use oao_runtime::{AgentAdapter, ExecutionEngine, ExecutionReport, FailureDetail, ReportStatus};
use oao_store::SnapshotStore;
use oao_tool::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Options for forced re-execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditOptions {
    /// Re-run even when the history touched non-idempotent tools.
    ///
    /// Off by default: re-invoking such tools repeats their side effects.
    pub allow_side_effects: bool,
}

/// The compared projection of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFingerprint {
    /// Event kind
    pub kind: oao_log::EventKind,
    /// Step scope
    pub step_number: Option<u64>,
    /// Canonical argument hash for tool events
    pub arg_hash: Option<Digest>,
    /// Cumulative token usage for accounting events
    pub token_usage: Option<u64>,
}

impl EventFingerprint {
    fn of(event: &Event) -> Self {
        let arg_hash = match &event.payload {
            EventPayload::ToolCallStarted { arg_hash, .. }
            | EventPayload::ToolCallFailed { arg_hash, .. } => Some(*arg_hash),
            EventPayload::ToolCallSuccess(record) => Some(record.arg_hash),
            _ => None,
        };
        let token_usage = match &event.payload {
            EventPayload::StepCompleted {
                cumulative_tokens, ..
            } => Some(*cumulative_tokens),
            EventPayload::ExecutionCompleted { token_usage, .. } => Some(*token_usage),
            _ => None,
        };
        Self {
            kind: event.kind,
            step_number: event.step_number,
            arg_hash,
            token_usage,
        }
    }
}

/// One point where the replayed stream diverged from history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Position in the event stream
    pub sequence: u64,
    /// What history recorded (`None` when the replay ran longer)
    pub historical: Option<EventFingerprint>,
    /// What the re-execution produced (`None` when it ran shorter)
    pub replayed: Option<EventFingerprint>,
}

/// Result of a forced re-execution
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    /// The audited execution
    pub execution_id: ExecutionId,
    /// Whether the replayed stream matched history exactly
    pub deterministic: bool,
    /// Every divergence point, in sequence order
    pub divergences: Vec<Divergence>,
    /// Report of the re-executed run (marked failed on divergence)
    pub replay_report: ExecutionReport,
}

/// Re-run an execution from step 0 against a scratch log and compare.
///
/// # Errors
///
/// Refused with [`ReplayError::NonIdempotentTools`] when history touched
/// tools that declare themselves non-deterministic, unless
/// `options.allow_side_effects` is set. Hash continuity is verified the
/// same way as resume.
pub async fn audit_replay(
    log: &dyn EventLog,
    snapshots: &dyn SnapshotStore,
    adapter: Arc<dyn AgentAdapter>,
    registry: Arc<ToolRegistry>,
    policy: PolicyConfig,
    execution_id: ExecutionId,
    options: AuditOptions,
) -> Result<AuditReport, ReplayError> {
    let snapshot = snapshots
        .get(execution_id)?
        .ok_or(ReplayError::SnapshotMissing { execution_id })?;
    verify_continuity(&snapshot, adapter.as_ref(), &registry, &policy)?;

    let historical = log.read(execution_id, 0)?;

    if !options.allow_side_effects {
        let touched: BTreeSet<&str> = historical
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::ToolCallStarted { tool_name, .. } => Some(tool_name.as_str()),
                EventPayload::ToolCallSuccess(record) => Some(record.tool_name.as_str()),
                _ => None,
            })
            .collect();
        let offending: Vec<String> = touched
            .into_iter()
            .filter(|name| {
                registry
                    .get(name)
                    .is_some_and(|tool| !tool.is_deterministic())
            })
            .map(String::from)
            .collect();
        if !offending.is_empty() {
            return Err(ReplayError::NonIdempotentTools { tools: offending });
        }
    }

    // Re-execute against a scratch log; the historical log stays untouched
    // and tool deduplication finds nothing to skip.
    let scratch = Arc::new(MemoryEventLog::new());
    let mut engine = ExecutionEngine::new(
        snapshot,
        adapter,
        registry,
        scratch.clone(),
        PolicyEngine::new(policy),
    );
    let mut replay_report = engine.run().await;
    let replayed = scratch.read(execution_id, 0)?;

    let mut divergences = Vec::new();
    let len = historical.len().max(replayed.len());
    for i in 0..len {
        let historical_fp = historical.get(i).map(EventFingerprint::of);
        let replayed_fp = replayed.get(i).map(EventFingerprint::of);
        if historical_fp != replayed_fp {
            divergences.push(Divergence {
                sequence: i as u64,
                historical: historical_fp,
                replayed: replayed_fp,
            });
        }
    }

    let deterministic = divergences.is_empty();
    if !deterministic {
        tracing::warn!(
            execution_id = %execution_id,
            divergences = divergences.len(),
            "forced re-execution diverged from history"
        );
        replay_report.status = ReportStatus::Failed;
        replay_report.failure = Some(FailureDetail {
            kind: FailureKind::DeterminismViolation,
            detail: format!(
                "{} divergence(s) from historical event stream, first at sequence {}",
                divergences.len(),
                divergences[0].sequence
            ),
        });
    }

    Ok(AuditReport {
        execution_id,
        deterministic,
        divergences,
        replay_report,
    })
}
