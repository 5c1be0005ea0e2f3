//! Policy configuration.
//!
//! The full recognized option set. The serialized form of this struct is
//! part of the execution hash, so field names and defaults are stable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Retry parameters for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// The backoff delay before retry `attempt` (0-based):
    /// `initial_delay * backoff_multiplier^attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64((self.initial_delay.as_secs_f64() * factor).max(0.0))
    }

    /// A config that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// The frozen governance parameters of one execution.
///
/// `None` means unlimited for budgets and allow-all for `allowed_tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Step budget
    pub max_steps: Option<u64>,
    /// Token budget
    pub max_tokens: Option<u64>,
    /// Tool-call budget
    pub max_tool_calls: Option<u64>,
    /// Wall-clock bound from `EXECUTION_STARTED`
    pub execution_timeout: Option<Duration>,
    /// Permitted tool names; `None` allows every registered tool
    pub allowed_tools: Option<BTreeSet<String>>,
    /// Retry parameters for transient failures
    pub retry: RetryConfig,
}

impl PolicyConfig {
    /// A policy with every budget unlimited
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_steps: None,
            max_tokens: None,
            max_tool_calls: None,
            execution_timeout: None,
            allowed_tools: None,
            retry: RetryConfig::default(),
        }
    }

    /// Set the step budget
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Set the token budget
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the tool-call budget
    #[must_use]
    pub fn with_max_tool_calls(mut self, max_tool_calls: u64) -> Self {
        self.max_tool_calls = Some(max_tool_calls);
        self
    }

    /// Set the wall-clock bound
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Restrict tool calls to an allowlist
    #[must_use]
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Set the retry parameters
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Serialized form used for snapshot hashing
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_steps: Some(10),
            max_tokens: Some(4_000),
            max_tool_calls: Some(5),
            execution_timeout: Some(Duration::from_secs(30)),
            allowed_tools: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Name-keyed policy presets.
///
/// Lets job payloads and remote submissions reference governance
/// parameters by name instead of carrying full configurations.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    presets: BTreeMap<String, PolicyConfig>,
}

impl PolicyRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in presets: `strict` (the default
    /// budgets) and `unlimited`
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("strict", PolicyConfig::default());
        registry.register("unlimited", PolicyConfig::unlimited());
        registry
    }

    /// Register (or replace) a preset
    pub fn register(&mut self, name: impl Into<String>, config: PolicyConfig) {
        self.presets.insert(name.into(), config);
    }

    /// Look up a preset by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<PolicyConfig> {
        self.presets.get(name).cloned()
    }

    /// Registered preset names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_none() {
        let retry = RetryConfig::none();
        assert_eq!(retry.max_retries, 0);
        assert_eq!(retry.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_builder() {
        let policy = PolicyConfig::unlimited()
            .with_max_tokens(50)
            .with_allowed_tools(["search"]);
        assert_eq!(policy.max_tokens, Some(50));
        assert!(policy.allowed_tools.unwrap().contains("search"));
        assert_eq!(policy.max_steps, None);
    }

    #[test]
    fn test_preset_registry() {
        let registry = PolicyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["strict", "unlimited"]);
        assert_eq!(registry.get("strict"), Some(PolicyConfig::default()));
        assert!(registry.get("lenient").is_none());

        let mut registry = registry;
        registry.register("lenient", PolicyConfig::unlimited().with_max_steps(1_000));
        assert_eq!(
            registry.get("lenient").unwrap().max_steps,
            Some(1_000)
        );
    }

    #[test]
    fn test_to_value_is_stable() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.to_value(), policy.to_value());

        let other = PolicyConfig::default().with_max_tokens(8_000);
        assert_ne!(policy.to_value(), other.to_value());
    }
}
