//! Tool interception: hash-keyed idempotency for every tool call.
//!
//! Every invocation routed by an adapter passes through here. A call
//! whose canonical argument hash already has a `TOOL_CALL_SUCCESS` in the
//! log is answered from history without re-invoking the tool; everything
//! else is invoked under the policy's retry config with each transition
//! appended to the log before in-memory state advances.

use crate::registry::ToolRegistry;
use crate::trait_::ToolError;
use oao_core::{canonical_digest, CancelFlag, Digest, ExecutionId, Timestamp};
use oao_log::{
    append_applying, EventDraft, EventLog, EventPayload, ExecutionState, LogError, ToolCallRecord,
};
use oao_policy::{PolicyEngine, RetryClass, Violation};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Canonical argument hash: SHA-256 over the canonical rendering of the
/// tool name and its arguments.
///
/// Mapping keys inside `args` are sorted recursively, so argument
/// construction order never affects deduplication.
#[must_use]
pub fn arg_hash(tool_name: &str, args: &Value) -> Digest {
    canonical_digest(&json!({"tool": tool_name, "args": args}))
}

/// Errors surfaced by an intercepted call
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptError {
    /// Policy hard-stop; the execution must fail without retry
    Policy(Violation),
    /// The tool failed terminally (after any retries)
    Tool {
        /// Tool name
        name: String,
        /// The final error
        error: ToolError,
    },
    /// Cancellation was requested before the call started
    Cancelled,
    /// The event log refused an append
    Log(LogError),
}

impl fmt::Display for InterceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(violation) => write!(f, "{}", violation),
            Self::Tool { name, error } => write!(f, "Tool '{}' failed: {}", name, error),
            Self::Cancelled => write!(f, "Cancelled before tool call"),
            Self::Log(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for InterceptError {}

impl From<LogError> for InterceptError {
    fn from(err: LogError) -> Self {
        Self::Log(err)
    }
}

/// The idempotency wrapper around a registry of tools.
///
/// Shares the engine's derived state so budget checks and counters stay
/// in lock-step with the log.
pub struct ToolInterceptor {
    log: Arc<dyn EventLog>,
    policy: PolicyEngine,
    registry: Arc<ToolRegistry>,
    execution_id: ExecutionId,
    state: Arc<Mutex<ExecutionState>>,
    cancel: CancelFlag,
}

impl ToolInterceptor {
    /// Create an interceptor for one execution
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        policy: PolicyEngine,
        registry: Arc<ToolRegistry>,
        execution_id: ExecutionId,
        state: Arc<Mutex<ExecutionState>>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            log,
            policy,
            registry,
            execution_id,
            state,
            cancel,
        }
    }

    /// Invoke a tool with at-least-once-but-deduplicated semantics.
    ///
    /// # Errors
    ///
    /// Returns an [`InterceptError`] carrying the policy violation, the
    /// terminal tool error, a cancellation marker, or a log failure.
    pub async fn call(
        &self,
        step: u64,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, InterceptError> {
        let hash = arg_hash(tool_name, &args);

        // A completed call replays from history: nothing appended, no side
        // effect repeated.
        if let Some(record) = self.log.exists_tool_success(self.execution_id, &hash)? {
            tracing::debug!(
                execution_id = %self.execution_id,
                tool = tool_name,
                arg_hash = %hash,
                "tool call deduplicated from log"
            );
            return Ok(record.result);
        }

        if self.cancel.is_cancelled() {
            return Err(InterceptError::Cancelled);
        }

        {
            let state = self.lock_state()?;
            self.policy
                .validate_tool(&state, tool_name, Timestamp::now())
                .map_err(InterceptError::Policy)?;
        }

        let Some(tool) = self.registry.get(tool_name).cloned() else {
            let error = ToolError::NotFound {
                name: tool_name.to_string(),
            };
            self.append(
                EventDraft::new(EventPayload::ToolCallFailed {
                    tool_name: tool_name.to_string(),
                    arg_hash: hash,
                    error_kind: error.kind().to_string(),
                    detail: error.to_string(),
                })
                .with_step(step),
            )?;
            return Err(InterceptError::Tool {
                name: tool_name.to_string(),
                error,
            });
        };

        self.append(
            EventDraft::new(EventPayload::ToolCallStarted {
                tool_name: tool_name.to_string(),
                arg_hash: hash,
            })
            .with_step(step),
        )?;

        let retry = self.policy.config().retry.clone();
        let mut attempt: u32 = 0;
        loop {
            match tool.invoke(args.clone()).await {
                Ok(output) => {
                    self.append(
                        EventDraft::new(EventPayload::ToolCallSuccess(ToolCallRecord {
                            tool_name: tool_name.to_string(),
                            arg_hash: hash,
                            result: output.result.clone(),
                            token_cost: output.token_cost,
                        }))
                        .with_step(step),
                    )?;
                    return Ok(output.result);
                }
                Err(error) => {
                    let retryable =
                        matches!(self.policy.classify(&error), RetryClass::Retryable);
                    if retryable && attempt < retry.max_retries {
                        let delay = retry.delay_for(attempt);
                        attempt += 1;
                        tracing::warn!(
                            execution_id = %self.execution_id,
                            tool = tool_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient tool failure, retrying"
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

                    self.append(
                        EventDraft::new(EventPayload::ToolCallFailed {
                            tool_name: tool_name.to_string(),
                            arg_hash: hash,
                            error_kind: error.kind().to_string(),
                            detail: error.to_string(),
                        })
                        .with_step(step),
                    )?;
                    return Err(InterceptError::Tool {
                        name: tool_name.to_string(),
                        error,
                    });
                }
            }
        }
    }

    fn append(&self, draft: EventDraft) -> Result<(), InterceptError> {
        let mut state = self.lock_state()?;
        append_applying(self.log.as_ref(), &mut state, self.execution_id, draft)?;
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ExecutionState>, InterceptError> {
        self.state.lock().map_err(|_| {
            InterceptError::Log(LogError::Backend {
                reason: "execution state mutex poisoned".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::{Tool, ToolOutput};
    use async_trait::async_trait;
    use oao_core::ExecutionId;
    use oao_log::{EventKind, MemoryEventLog};
    use oao_policy::{PolicyConfig, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::new(args).with_token_cost(1))
        }
    }

    struct FlakyTool {
        failures: AtomicU32,
        invocations: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok()
            {
                return Err(ToolError::Transient {
                    reason: "connection reset".to_string(),
                });
            }
            Ok(ToolOutput::new(args))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        async fn invoke(&self, _args: Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Fatal {
                reason: "unsupported operation".to_string(),
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    fn make_interceptor(
        tools: Vec<Arc<dyn Tool>>,
        policy: PolicyConfig,
    ) -> (ToolInterceptor, Arc<MemoryEventLog>, ExecutionId) {
        let log = Arc::new(MemoryEventLog::new());
        let id = ExecutionId::new();
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        let mut state = ExecutionState::empty(id);
        state.started_at = Some(Timestamp::now());
        let interceptor = ToolInterceptor::new(
            log.clone(),
            PolicyEngine::new(policy),
            Arc::new(registry),
            id,
            Arc::new(Mutex::new(state)),
            CancelFlag::new(),
        );
        (interceptor, log, id)
    }

    fn kinds(log: &MemoryEventLog, id: ExecutionId) -> Vec<EventKind> {
        log.read(id, 0).unwrap().iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_arg_hash_ignores_key_order() {
        let a = json!({"q": "x", "limit": 5});
        let b: Value = serde_json::from_str(r#"{"limit":5,"q":"x"}"#).unwrap();
        assert_eq!(arg_hash("search", &a), arg_hash("search", &b));
        assert_ne!(arg_hash("search", &a), arg_hash("fetch", &a));
    }

    #[tokio::test]
    async fn test_call_appends_started_and_success() {
        let (interceptor, log, id) =
            make_interceptor(vec![Arc::new(EchoTool)], PolicyConfig::unlimited());

        let result = interceptor.call(0, "echo", json!({"v": 1})).await.unwrap();
        assert_eq!(result, json!({"v": 1}));
        assert_eq!(
            kinds(&log, id),
            vec![EventKind::ToolCallStarted, EventKind::ToolCallSuccess]
        );
    }

    #[tokio::test]
    async fn test_duplicate_call_is_deduplicated() {
        let (interceptor, log, id) =
            make_interceptor(vec![Arc::new(EchoTool)], PolicyConfig::unlimited());

        interceptor.call(0, "echo", json!(5)).await.unwrap();
        let before = log.count(id).unwrap();

        // Same arguments: answered from history, nothing new appended.
        let result = interceptor.call(1, "echo", json!(5)).await.unwrap();
        assert_eq!(result, json!(5));
        assert_eq!(log.count(id).unwrap(), before);

        // Different arguments: a real second call.
        interceptor.call(1, "echo", json!(10)).await.unwrap();
        assert_eq!(log.count(id).unwrap(), before + 2);

        let state_calls = interceptor.lock_state().unwrap().tool_calls;
        assert_eq!(state_calls, 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let invocations = Arc::new(AtomicU32::new(0));
        let tool = Arc::new(FlakyTool {
            failures: AtomicU32::new(2),
            invocations: invocations.clone(),
        });
        let (interceptor, log, id) = make_interceptor(
            vec![tool],
            PolicyConfig::unlimited().with_retry(fast_retry()),
        );

        let result = interceptor.call(0, "flaky", json!("x")).await.unwrap();
        assert_eq!(result, json!("x"));
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(
            kinds(&log, id),
            vec![
                EventKind::ToolCallStarted,
                EventKind::RetryAttempted,
                EventKind::RetryAttempted,
                EventKind::ToolCallSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_terminally() {
        let invocations = Arc::new(AtomicU32::new(0));
        let tool = Arc::new(FlakyTool {
            failures: AtomicU32::new(10),
            invocations: invocations.clone(),
        });
        let (interceptor, log, id) = make_interceptor(
            vec![tool],
            PolicyConfig::unlimited().with_retry(fast_retry()),
        );

        let err = interceptor.call(0, "flaky", json!("x")).await.unwrap_err();
        assert!(matches!(err, InterceptError::Tool { .. }));
        // First attempt plus three retries
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert_eq!(*kinds(&log, id).last().unwrap(), EventKind::ToolCallFailed);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let (interceptor, log, id) = make_interceptor(
            vec![Arc::new(BrokenTool)],
            PolicyConfig::unlimited().with_retry(fast_retry()),
        );

        let err = interceptor.call(0, "broken", json!(1)).await.unwrap_err();
        assert!(matches!(
            err,
            InterceptError::Tool {
                error: ToolError::Fatal { .. },
                ..
            }
        ));
        assert_eq!(
            kinds(&log, id),
            vec![EventKind::ToolCallStarted, EventKind::ToolCallFailed]
        );
    }

    #[tokio::test]
    async fn test_disallowed_tool_is_a_hard_stop() {
        let (interceptor, log, id) = make_interceptor(
            vec![Arc::new(EchoTool)],
            PolicyConfig::unlimited().with_allowed_tools(["search"]),
        );

        let err = interceptor.call(0, "echo", json!(1)).await.unwrap_err();
        assert!(matches!(err, InterceptError::Policy(_)));
        // Hard stop happens before anything is appended for this call.
        assert_eq!(log.count(id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_terminally() {
        let (interceptor, log, id) =
            make_interceptor(vec![Arc::new(EchoTool)], PolicyConfig::unlimited());

        let err = interceptor.call(0, "missing", json!(1)).await.unwrap_err();
        assert!(matches!(
            err,
            InterceptError::Tool {
                error: ToolError::NotFound { .. },
                ..
            }
        ));
        assert_eq!(kinds(&log, id), vec![EventKind::ToolCallFailed]);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let log = Arc::new(MemoryEventLog::new());
        let id = ExecutionId::new();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let cancel = CancelFlag::new();
        let interceptor = ToolInterceptor::new(
            log.clone(),
            PolicyEngine::new(PolicyConfig::unlimited()),
            Arc::new(registry),
            id,
            Arc::new(Mutex::new(ExecutionState::empty(id))),
            cancel.clone(),
        );

        cancel.cancel();
        let err = interceptor.call(0, "echo", json!(1)).await.unwrap_err();
        assert_eq!(err, InterceptError::Cancelled);
        assert_eq!(log.count(id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_success_hashes_are_distinct() {
        let (interceptor, log, id) =
            make_interceptor(vec![Arc::new(EchoTool)], PolicyConfig::unlimited());

        interceptor.call(0, "echo", json!(1)).await.unwrap();
        interceptor.call(0, "echo", json!(2)).await.unwrap();
        interceptor.call(0, "echo", json!(1)).await.unwrap(); // deduplicated

        let mut hashes = Vec::new();
        for event in log.read(id, 0).unwrap() {
            if let EventPayload::ToolCallSuccess(record) = &event.payload {
                hashes.push(record.arg_hash);
            }
        }
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
    }
}
