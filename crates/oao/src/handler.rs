//! Job handler wiring the scheduler to the runtime.
//!
//! Job payloads reference agents by name; the handler resolves them from
//! the adapter registry and either starts the execution or resumes it if
//! the log already has history. Re-delivered jobs are therefore safe:
//! completed work is skipped, not repeated.

use crate::runtime::Runtime;
use async_trait::async_trait;
use oao_policy::PolicyConfig;
use oao_sched::{Job, JobHandler};
use serde_json::Value;
use std::sync::Arc;

/// Processes scheduler jobs by running executions on a shared runtime.
///
/// Expected payload shape:
/// `{"agent": "<registered name>", "task": <value>, "policy": ...?}`,
/// where `policy` is either a preset name or a full configuration.
pub struct RuntimeJobHandler {
    runtime: Arc<Runtime>,
}

impl RuntimeJobHandler {
    /// Create a handler over a runtime
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl JobHandler for RuntimeJobHandler {
    async fn handle(&self, job: &Job) -> Result<Value, String> {
        let agent_name = job
            .payload
            .get("agent")
            .and_then(Value::as_str)
            .ok_or_else(|| "job payload missing 'agent'".to_string())?;
        let adapter = self
            .runtime
            .adapters()
            .get(agent_name)
            .ok_or_else(|| format!("unknown agent '{}'", agent_name))?;

        let policy = match job.payload.get("policy") {
            Some(Value::String(name)) => self
                .runtime
                .policies()
                .get(name)
                .ok_or_else(|| format!("unknown policy preset '{}'", name))?,
            Some(value) => serde_json::from_value::<PolicyConfig>(value.clone())
                .map_err(|err| format!("invalid policy in job payload: {}", err))?,
            None => self.runtime.default_policy(),
        };
        let task = job.payload.get("task").cloned().unwrap_or(Value::Null);

        // Re-entrancy: history in the log means this is a re-delivery or
        // a recovery; resume instead of restarting.
        let has_history = self
            .runtime
            .log()
            .count(job.execution_id)
            .map_err(|err| err.to_string())?
            > 0;

        let report = if has_history {
            self.runtime
                .resume_with_policy(adapter, job.execution_id, policy)
                .await
                .map_err(|err| err.to_string())?
        } else {
            self.runtime
                .run_execution(adapter, job.execution_id, task, policy)
                .await
                .map_err(|err| err.to_string())?
        };

        serde_json::to_value(&report).map_err(|err| err.to_string())
    }
}
