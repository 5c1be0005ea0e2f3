//! Pre-step and pre-tool policy validation.
//!
//! Checks use the observed cumulative counters from the previous step, so
//! a step may overshoot the token budget by at most one step before the
//! next pre-check fires.

use crate::config::PolicyConfig;
use oao_log::{ExecutionState, ViolationKind};
use oao_core::Timestamp;
use std::fmt;

/// A policy breach: which rule and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Which budget or rule was breached
    pub kind: ViolationKind,
    /// Human-readable detail
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, detail: String) -> Self {
        Self { kind, detail }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy violation ({:?}): {}", self.kind, self.detail)
    }
}

impl std::error::Error for Violation {}

/// Retry classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; retry under the retry config
    Retryable,
    /// Terminal; never retried
    Fatal,
}

/// Errors that carry their own retry classification.
///
/// Tool and adapter errors implement this so the classification contract
/// is explicit at the boundary instead of inferred from error text.
pub trait Classifiable {
    /// This error's retry class
    fn retry_class(&self) -> RetryClass;
}

/// Validates execution state against a frozen policy
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    /// Create an engine for a frozen config
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// The frozen config
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Validate immediately before a step runs.
    ///
    /// # Errors
    ///
    /// Returns the violation that must hard-stop the execution.
    pub fn validate_step(
        &self,
        state: &ExecutionState,
        now: Timestamp,
    ) -> Result<(), Violation> {
        self.check_timeout(state, now)?;

        if let Some(max_steps) = self.config.max_steps {
            if state.steps_completed >= max_steps {
                return Err(Violation::new(
                    ViolationKind::MaxSteps,
                    format!(
                        "{} steps completed, limit {}",
                        state.steps_completed, max_steps
                    ),
                ));
            }
        }

        if let Some(max_tokens) = self.config.max_tokens {
            if state.token_usage > max_tokens {
                return Err(Violation::new(
                    ViolationKind::MaxTokens,
                    format!("token usage {} over limit {}", state.token_usage, max_tokens),
                ));
            }
        }

        Ok(())
    }

    /// Validate immediately before a tool call runs.
    ///
    /// # Errors
    ///
    /// Returns the violation that must hard-stop the execution.
    pub fn validate_tool(
        &self,
        state: &ExecutionState,
        tool_name: &str,
        now: Timestamp,
    ) -> Result<(), Violation> {
        self.check_timeout(state, now)?;

        if let Some(allowed) = &self.config.allowed_tools {
            if !allowed.contains(tool_name) {
                return Err(Violation::new(
                    ViolationKind::ToolNotAllowed,
                    format!("tool '{}' is not on the allowlist", tool_name),
                ));
            }
        }

        if let Some(max_tool_calls) = self.config.max_tool_calls {
            if state.tool_calls >= max_tool_calls {
                return Err(Violation::new(
                    ViolationKind::MaxToolCalls,
                    format!("{} tool calls made, limit {}", state.tool_calls, max_tool_calls),
                ));
            }
        }

        Ok(())
    }

    /// Classify an error for retry handling.
    ///
    /// Policy violations themselves never reach this path; they hard-stop
    /// before any retry machinery runs.
    #[must_use]
    pub fn classify<E: Classifiable>(&self, error: &E) -> RetryClass {
        error.retry_class()
    }

    fn check_timeout(&self, state: &ExecutionState, now: Timestamp) -> Result<(), Violation> {
        let (Some(timeout), Some(started_at)) = (self.config.execution_timeout, state.started_at)
        else {
            return Ok(());
        };
        let elapsed = now.since(started_at);
        if elapsed > timeout {
            tracing::warn!(
                execution_id = %state.execution_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "execution deadline passed"
            );
            return Err(Violation::new(
                ViolationKind::Timeout,
                format!(
                    "elapsed {}ms over timeout {}ms",
                    elapsed.as_millis(),
                    timeout.as_millis()
                ),
            ));
        }
        Ok(())
    }
}
