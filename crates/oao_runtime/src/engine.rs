//! The execution engine.
//!
//! One engine instance drives one execution. Progress is entirely
//! event-sourced: every transition is appended to the log first, and the
//! in-memory state is advanced by folding the event that came back. A
//! crashed engine is replaced by constructing a new one from the same
//! snapshot and the rehydrated state.

use crate::adapter::{AdapterError, AgentAdapter, StepContext, StepOutcome};
use crate::lifecycle::Lifecycle;
use crate::report::ExecutionReport;
use oao_core::{CancelFlag, ExecutionId, Timestamp};
use oao_log::{
    append_applying, EventDraft, EventLog, EventPayload, ExecutionState, FailureKind,
    LifecycleState, LogError, TraceContext, ViolationKind,
};
use oao_policy::{PolicyEngine, RetryClass, Violation};
use oao_tool::{InterceptError, ToolInterceptor, ToolRegistry};
use oao_store::ExecutionSnapshot;
use serde_json::Value;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Unrecoverable substrate failure; all domain failures are recorded as
/// events instead of surfacing here.
#[derive(Debug)]
enum DriveError {
    Log(LogError),
    Lock,
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log(err) => write!(f, "{}", err),
            Self::Lock => write!(f, "execution state mutex poisoned"),
        }
    }
}

impl From<LogError> for DriveError {
    fn from(err: LogError) -> Self {
        Self::Log(err)
    }
}

/// Drives one execution through the lifecycle
pub struct ExecutionEngine {
    snapshot: ExecutionSnapshot,
    log: Arc<dyn EventLog>,
    policy: PolicyEngine,
    adapter: Arc<dyn AgentAdapter>,
    state: Arc<Mutex<ExecutionState>>,
    tools: Arc<ToolInterceptor>,
    lifecycle: Lifecycle,
    cancel: CancelFlag,
    trace: Option<TraceContext>,
    dependencies: Value,
    fresh: bool,
}

impl ExecutionEngine {
    /// Create an engine for a fresh execution
    #[must_use]
    pub fn new(
        snapshot: ExecutionSnapshot,
        adapter: Arc<dyn AgentAdapter>,
        registry: Arc<ToolRegistry>,
        log: Arc<dyn EventLog>,
        policy: PolicyEngine,
    ) -> Self {
        let state = ExecutionState::empty(snapshot.execution_id);
        Self::build(snapshot, adapter, registry, log, policy, state, true)
    }

    /// Create an engine continuing from rehydrated state.
    ///
    /// The caller (the replay layer) is responsible for hash continuity;
    /// the engine trusts the state it is given and continues from the
    /// first incomplete step.
    #[must_use]
    pub fn from_state(
        snapshot: ExecutionSnapshot,
        adapter: Arc<dyn AgentAdapter>,
        registry: Arc<ToolRegistry>,
        log: Arc<dyn EventLog>,
        policy: PolicyEngine,
        state: ExecutionState,
    ) -> Self {
        Self::build(snapshot, adapter, registry, log, policy, state, false)
    }

    fn build(
        snapshot: ExecutionSnapshot,
        adapter: Arc<dyn AgentAdapter>,
        registry: Arc<ToolRegistry>,
        log: Arc<dyn EventLog>,
        policy: PolicyEngine,
        state: ExecutionState,
        fresh: bool,
    ) -> Self {
        let state = Arc::new(Mutex::new(state));
        let cancel = CancelFlag::new();
        let tools = Arc::new(ToolInterceptor::new(
            log.clone(),
            policy.clone(),
            registry,
            snapshot.execution_id,
            state.clone(),
            cancel.clone(),
        ));
        Self {
            snapshot,
            log,
            policy,
            adapter,
            state,
            tools,
            lifecycle: Lifecycle::new(),
            cancel,
            trace: None,
            dependencies: Value::Null,
            fresh,
        }
    }

    /// Inject dependency outputs (used by the graph executor)
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Value) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Attach tracing correlation to every appended event
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// The execution this engine drives
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.snapshot.execution_id
    }

    /// The frozen snapshot
    #[must_use]
    pub const fn snapshot(&self) -> &ExecutionSnapshot {
        &self.snapshot
    }

    /// Handle for requesting cancellation of this execution
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Snapshot of the current derived state
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| ExecutionState::empty(self.snapshot.execution_id))
    }

    /// Run the execution to its terminal event and report.
    ///
    /// Every failure path is mapped to a `FAILED` report with a
    /// structured cause; nothing escapes as a raw error.
    pub async fn run(&mut self) -> ExecutionReport {
        let started = Instant::now();
        tracing::info!(
            execution_id = %self.snapshot.execution_id,
            agent = self.adapter.name(),
            fresh = self.fresh,
            "engine run starting"
        );

        let drive_result = self.drive().await;
        let mut report = ExecutionReport::from_state(
            &self.state(),
            self.adapter.name(),
            started.elapsed().as_secs_f64(),
        );

        if let Err(err) = drive_result {
            tracing::error!(
                execution_id = %self.snapshot.execution_id,
                error = %err,
                "engine halted on substrate failure"
            );
            report.status = crate::report::ReportStatus::Failed;
            report.failure = Some(crate::report::FailureDetail {
                kind: FailureKind::Internal,
                detail: format!("event log failure: {}", err),
            });
        }

        tracing::info!(
            execution_id = %self.snapshot.execution_id,
            status = ?report.status,
            total_steps = report.total_steps,
            token_usage = report.token_usage,
            "engine run finished"
        );
        report
    }

    async fn drive(&mut self) -> Result<(), DriveError> {
        if self.fresh {
            self.append(EventDraft::new(EventPayload::ExecutionStarted {
                task: self.snapshot.task.clone(),
                execution_hash: self.snapshot.execution_hash,
                agent_name: self.snapshot.agent.name.clone(),
            }))?;
        } else if self.locked()?.is_terminal() {
            return Ok(());
        }

        loop {
            // Cancellation and policy share the same check point: before
            // the step, never inside it.
            if self.cancel.is_cancelled() {
                self.append_failure(FailureKind::Cancelled, "cancellation requested")?;
                return Ok(());
            }

            let verdict = {
                let state = self.locked()?;
                self.policy.validate_step(&state, Timestamp::now())
            };
            if let Err(violation) = verdict {
                self.append_violation(&violation)?;
                return Ok(());
            }

            if self.enter(LifecycleState::Plan, true)?.is_break() {
                return Ok(());
            }
            let step = self.locked()?.resume_step();
            self.append(EventDraft::new(EventPayload::StepStarted { step }).with_step(step))?;
            if self.enter(LifecycleState::Execute, false)?.is_break() {
                return Ok(());
            }

            let Some(outcome) = self.invoke_step(step).await? else {
                return Ok(()); // failure already recorded
            };

            if self.enter(LifecycleState::Review, false)?.is_break() {
                return Ok(());
            }
            let cumulative_tokens = self.locked()?.token_usage + outcome.tokens;
            self.append(
                EventDraft::new(EventPayload::StepCompleted {
                    step,
                    output: outcome.output.clone(),
                    step_tokens: outcome.tokens,
                    cumulative_tokens,
                })
                .with_step(step),
            )?;

            if outcome.done {
                if self.enter(LifecycleState::Terminate, true)?.is_break() {
                    return Ok(());
                }
                let (total_steps, token_usage) = {
                    let state = self.locked()?;
                    (state.steps_completed, state.token_usage)
                };
                self.append(EventDraft::new(EventPayload::ExecutionCompleted {
                    final_output: outcome.output,
                    total_steps,
                    token_usage,
                }))?;
                return Ok(());
            }
        }
    }

    /// Invoke the adapter for one step, retrying transient errors in
    /// place so the step is never restarted with a second `STEP_STARTED`.
    async fn invoke_step(&self, step: u64) -> Result<Option<StepOutcome>, DriveError> {
        let retry = self.policy.config().retry.clone();
        let mut attempt: u32 = 0;
        loop {
            let ctx = {
                let state = self.locked()?;
                StepContext::new(
                    self.snapshot.task.clone(),
                    step,
                    state.last_output.clone(),
                    self.dependencies.clone(),
                    self.tools.clone(),
                )
            };

            let error = match self.adapter.invoke(ctx).await {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(error) => error,
            };

            match error {
                AdapterError::Tool(InterceptError::Policy(violation)) => {
                    self.append_violation(&violation)?;
                    return Ok(None);
                }
                AdapterError::Tool(InterceptError::Cancelled) => {
                    self.append_failure(FailureKind::Cancelled, "cancellation requested")?;
                    return Ok(None);
                }
                AdapterError::Tool(InterceptError::Log(err)) => {
                    return Err(DriveError::Log(err));
                }
                AdapterError::Tool(InterceptError::Tool { name, error }) => {
                    self.append_failure(
                        FailureKind::ToolFailure,
                        &format!("tool '{}': {}", name, error),
                    )?;
                    return Ok(None);
                }
                other => {
                    let retryable =
                        matches!(self.policy.classify(&other), RetryClass::Retryable);
                    if retryable && attempt < retry.max_retries {
                        let delay = retry.delay_for(attempt);
                        attempt += 1;
                        tracing::warn!(
                            execution_id = %self.snapshot.execution_id,
                            step,
                            attempt,
                            error = %other,
                            "transient adapter failure, re-entering step"
                        );
                        self.append(
                            EventDraft::new(EventPayload::RetryAttempted {
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            })
                            .with_step(step),
                        )?;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.append_failure(FailureKind::AdapterError, &other.to_string())?;
                    return Ok(None);
                }
            }
        }
    }

    fn enter(
        &mut self,
        to: LifecycleState,
        emit: bool,
    ) -> Result<ControlFlow<()>, DriveError> {
        if let Err(err) = self.lifecycle.transition(to) {
            tracing::error!(
                execution_id = %self.snapshot.execution_id,
                error = %err,
                "lifecycle defect"
            );
            self.append_failure(FailureKind::Internal, &err.to_string())?;
            return Ok(ControlFlow::Break(()));
        }
        if emit {
            self.append(EventDraft::new(EventPayload::StateEnter { state: to }))?;
        }
        Ok(ControlFlow::Continue(()))
    }

    fn append_violation(&self, violation: &Violation) -> Result<(), DriveError> {
        self.append(EventDraft::new(EventPayload::PolicyViolation {
            kind: violation.kind,
            detail: violation.detail.clone(),
        }))?;
        let kind = if violation.kind == ViolationKind::Timeout {
            FailureKind::TimedOut
        } else {
            FailureKind::PolicyViolation
        };
        self.append_failure(kind, &violation.detail)
    }

    fn append_failure(&self, kind: FailureKind, detail: &str) -> Result<(), DriveError> {
        self.append(EventDraft::new(EventPayload::ExecutionFailed {
            kind,
            detail: detail.to_string(),
        }))
    }

    fn append(&self, draft: EventDraft) -> Result<(), DriveError> {
        let draft = match (&self.trace, &draft.trace_context) {
            (Some(trace), None) => draft.with_trace(trace.clone()),
            _ => draft,
        };
        let mut state = self.locked()?;
        append_applying(self.log.as_ref(), &mut state, self.snapshot.execution_id, draft)?;
        Ok(())
    }

    fn locked(&self) -> Result<MutexGuard<'_, ExecutionState>, DriveError> {
        self.state.lock().map_err(|_| DriveError::Lock)
    }
}
