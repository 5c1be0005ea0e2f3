//! The immutable execution snapshot.

use oao_core::{canonical_digest, Digest, ExecutionId, Timestamp, RUNTIME_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Adapter identity: name plus version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Adapter name
    pub name: String,
    /// Adapter version
    pub version: String,
}

impl AgentIdentity {
    /// Create an identity
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Frozen configuration for one execution.
///
/// Created once, never mutated. The `execution_hash` is a SHA-256 over the
/// canonical rendering of `{task, policy, agent, tools, version}` and is
/// stable across equivalent inputs; resuming with any other computed hash
/// is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Owning execution
    pub execution_id: ExecutionId,
    /// Digest of the frozen configuration
    pub execution_hash: Digest,
    /// The task payload (string or structured)
    pub task: Value,
    /// Serialized governance parameters
    pub policy_config: Value,
    /// Adapter identity
    pub agent: AgentIdentity,
    /// Sorted `name@version` identities of the registered tools
    pub tool_registry: Vec<String>,
    /// Runtime version that created this snapshot
    pub runtime_version: String,
    /// Creation wall-clock time
    pub created_at: Timestamp,
}

impl ExecutionSnapshot {
    /// Freeze a configuration into a snapshot, computing its hash.
    ///
    /// `tool_registry` is sorted so registration order never affects the
    /// hash.
    #[must_use]
    pub fn create(
        execution_id: ExecutionId,
        task: Value,
        policy_config: Value,
        agent: AgentIdentity,
        mut tool_registry: Vec<String>,
    ) -> Self {
        tool_registry.sort();
        let execution_hash = Self::compute_hash(
            &task,
            &policy_config,
            &agent,
            &tool_registry,
            RUNTIME_VERSION,
        );
        Self {
            execution_id,
            execution_hash,
            task,
            policy_config,
            agent,
            tool_registry,
            runtime_version: RUNTIME_VERSION.to_string(),
            created_at: Timestamp::now(),
        }
    }

    /// Compute the execution hash for a configuration.
    #[must_use]
    pub fn compute_hash(
        task: &Value,
        policy_config: &Value,
        agent: &AgentIdentity,
        tool_registry: &[String],
        runtime_version: &str,
    ) -> Digest {
        let data = json!({
            "task": task,
            "policy": policy_config,
            "agent": {"name": agent.name, "version": agent.version},
            "tools": tool_registry,
            "version": runtime_version,
        });
        canonical_digest(&data)
    }

    /// Verify that the stored hash still matches the snapshot's own fields
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(
            &self.task,
            &self.policy_config,
            &self.agent,
            &self.tool_registry,
            &self.runtime_version,
        ) == self.execution_hash
    }
}
