//! The agent adapter seam.
//!
//! The engine requires exactly one capability of an agent framework: a
//! per-step `invoke` that returns output, token usage and a done signal.
//! Everything framework-specific lives behind this trait.

use async_trait::async_trait;
use indexmap::IndexMap;
use oao_policy::{Classifiable, RetryClass};
use oao_tool::{InterceptError, ToolInterceptor};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Everything an adapter sees for one step
pub struct StepContext {
    /// The task payload from the snapshot
    pub task: Value,
    /// Current step number
    pub step: u64,
    /// Output of the previous completed step, if any
    pub last_output: Option<Value>,
    /// Dependency outputs injected by the graph executor (`Null` outside
    /// graph runs)
    pub dependencies: Value,
    tools: Arc<ToolInterceptor>,
}

impl StepContext {
    /// Create a context (called by the engine)
    #[must_use]
    pub fn new(
        task: Value,
        step: u64,
        last_output: Option<Value>,
        dependencies: Value,
        tools: Arc<ToolInterceptor>,
    ) -> Self {
        Self {
            task,
            step,
            last_output,
            dependencies,
            tools,
        }
    }

    /// Invoke a tool through the interception layer.
    ///
    /// Adapters must route every tool call through here and must surface
    /// the error via [`AdapterError::Tool`] unchanged, so hard stops and
    /// cancellation reach the engine.
    ///
    /// # Errors
    ///
    /// Propagates the interceptor's error.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<Value, InterceptError> {
        self.tools.call(self.step, tool_name, args).await
    }
}

/// What an adapter produced for one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step output
    pub output: Value,
    /// Tokens consumed by this step
    pub tokens: u64,
    /// Whether the task is finished
    pub done: bool,
}

impl StepOutcome {
    /// A step that finishes the task
    #[must_use]
    pub fn finished(output: Value) -> Self {
        Self {
            output,
            tokens: 0,
            done: true,
        }
    }

    /// A step that wants another iteration
    #[must_use]
    pub fn next(output: Value) -> Self {
        Self {
            output,
            tokens: 0,
            done: false,
        }
    }

    /// Attach token usage
    #[must_use]
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }
}

/// Error returned by an adapter step.
///
/// The variant is the classification: `Retryable` re-invokes the same
/// step under the retry config, `Fatal` fails the execution, and `Tool`
/// carries an interception-layer error whose handling (hard stop,
/// cancellation, step failure) the engine decides.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Transient adapter failure
    Retryable {
        /// What went wrong
        reason: String,
    },
    /// Terminal adapter failure
    Fatal {
        /// What went wrong
        reason: String,
    },
    /// A tool call failed inside the step
    Tool(InterceptError),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable { reason } => write!(f, "Transient adapter failure: {}", reason),
            Self::Fatal { reason } => write!(f, "Adapter failed: {}", reason),
            Self::Tool(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<InterceptError> for AdapterError {
    fn from(err: InterceptError) -> Self {
        Self::Tool(err)
    }
}

impl Classifiable for AdapterError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Retryable { .. } => RetryClass::Retryable,
            // Tool errors were already retried inside the interceptor
            Self::Fatal { .. } | Self::Tool(_) => RetryClass::Fatal,
        }
    }
}

/// The capability set the engine requires of any agent
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Adapter name, part of the execution hash
    fn name(&self) -> &str;

    /// Adapter version, part of the execution hash
    fn version(&self) -> &str {
        "1"
    }

    /// Run one step.
    ///
    /// # Errors
    ///
    /// Returns a classified [`AdapterError`].
    async fn invoke(&self, ctx: StepContext) -> Result<StepOutcome, AdapterError>;
}

/// Name-keyed adapter registry.
///
/// Lets scheduler job payloads and recovery reference agents by name
/// instead of carrying live instances.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: IndexMap<String, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: IndexMap::new(),
        }
    }

    /// Register an adapter under its own name; replaces any previous
    /// registration of the same name
    pub fn register(&mut self, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up an adapter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered adapter names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}
