//! Tool trait for intercepted tool execution.

use async_trait::async_trait;
use oao_policy::{Classifiable, RetryClass};
use serde_json::Value;
use std::fmt;

/// Output from a tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// The tool's result
    pub result: Value,
    /// Tokens attributed to this call, if the tool reports them
    pub token_cost: Option<u64>,
}

impl ToolOutput {
    /// Create an output without token accounting
    #[must_use]
    pub fn new(result: Value) -> Self {
        Self {
            result,
            token_cost: None,
        }
    }

    /// Attach a token cost
    #[must_use]
    pub fn with_token_cost(mut self, tokens: u64) -> Self {
        self.token_cost = Some(tokens);
        self
    }
}

/// Error from tool execution.
///
/// The variant is the retry classification: `Transient` and `Timeout` are
/// retried under the policy's retry config, everything else is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool not registered
    NotFound {
        /// Requested tool name
        name: String,
    },
    /// Arguments rejected by the tool
    InvalidArgs {
        /// Why they were rejected
        reason: String,
    },
    /// Transient failure (I/O, rate limit)
    Transient {
        /// What went wrong
        reason: String,
    },
    /// The invocation timed out
    Timeout,
    /// Terminal failure
    Fatal {
        /// What went wrong
        reason: String,
    },
}

impl ToolError {
    /// Stable kind tag recorded in `TOOL_CALL_FAILED` payloads
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidArgs { .. } => "INVALID_ARGS",
            Self::Transient { .. } => "TRANSIENT",
            Self::Timeout => "TIMEOUT",
            Self::Fatal { .. } => "FATAL",
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "Tool not found: {}", name),
            Self::InvalidArgs { reason } => write!(f, "Invalid arguments: {}", reason),
            Self::Transient { reason } => write!(f, "Transient tool failure: {}", reason),
            Self::Timeout => write!(f, "Tool invocation timed out"),
            Self::Fatal { reason } => write!(f, "Tool failed: {}", reason),
        }
    }
}

impl std::error::Error for ToolError {}

impl Classifiable for ToolError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transient { .. } | Self::Timeout => RetryClass::Retryable,
            Self::NotFound { .. } | Self::InvalidArgs { .. } | Self::Fatal { .. } => {
                RetryClass::Fatal
            }
        }
    }
}

/// A callable tool.
///
/// Implementations are invoked only through the interception layer, never
/// directly, so every call is logged and deduplicated.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within a registry
    fn name(&self) -> &str;

    /// Tool version, part of the execution hash
    fn version(&self) -> &str {
        "1"
    }

    /// Whether repeating a call with equal arguments produces an equal
    /// result with no additional side effects.
    ///
    /// Forced re-execution refuses to touch tools that return `false`
    /// here unless explicitly overridden.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Invoke the tool.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ToolError`]; `Transient`/`Timeout` variants
    /// are retried by the interceptor.
    async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            ToolError::Transient {
                reason: "x".to_string()
            }
            .retry_class(),
            RetryClass::Retryable
        );
        assert_eq!(ToolError::Timeout.retry_class(), RetryClass::Retryable);
        assert_eq!(
            ToolError::Fatal {
                reason: "x".to_string()
            }
            .retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            ToolError::NotFound {
                name: "t".to_string()
            }
            .retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(ToolError::Timeout.kind(), "TIMEOUT");
        assert_eq!(
            ToolError::InvalidArgs {
                reason: "bad".to_string()
            }
            .kind(),
            "INVALID_ARGS"
        );
    }
}
