//! Concurrent graph execution.
//!
//! Ready-set scheduling: a node is scheduled the moment every dependency
//! has a terminal success, independent nodes run concurrently bounded by
//! a semaphore, and each node's execution id is derived deterministically
//! from `(run_id, node name)` so a resumed run finds its own history.

use crate::graph::{GraphError, TaskGraph, TaskNode};
use indexmap::IndexMap;
use oao_core::ExecutionId;
use oao_log::{EventLog, ExecutionState, ExecutionStatus, FailureKind};
use oao_policy::{PolicyConfig, PolicyEngine};
use oao_runtime::{ExecutionEngine, ExecutionReport, FailureDetail, ReportStatus};
use oao_store::{AgentIdentity, ExecutionSnapshot, SnapshotStore};
use oao_tool::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What the graph does when a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop scheduling new nodes; in-flight nodes finish (default)
    #[default]
    FailFast,
    /// Keep running branches that do not depend on the failure
    Isolate,
}

/// Graph executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum concurrently running nodes
    pub max_concurrency: usize,
    /// Failure handling policy
    pub failure_policy: FailurePolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

/// Terminal state of one node within a graph run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Ran and completed
    Completed,
    /// Ran and failed (or had failed in a prior run)
    Failed,
    /// Terminal success already in the log; not re-run
    Skipped,
    /// Never started: a dependency failed or fail-fast stopped scheduling
    Cancelled,
}

/// Per-node outcome of a graph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Node name
    pub node: String,
    /// The node's deterministic execution id
    pub execution_id: ExecutionId,
    /// Terminal status
    pub status: NodeStatus,
    /// The node's final output, when it has one
    pub final_output: Option<Value>,
    /// Full execution report, absent for cancelled nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ExecutionReport>,
}

/// Outcome of a whole graph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphReport {
    /// Caller-chosen run identifier (the resume key)
    pub run_id: String,
    /// `SUCCESS` only when every node completed or was skipped
    pub status: ReportStatus,
    /// Per-node results in graph insertion order
    pub nodes: IndexMap<String, NodeResult>,
    /// Detail of the first failed node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

/// Executes task graphs over the shared log and snapshot store
pub struct GraphExecutor {
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    registry: Arc<ToolRegistry>,
    policy: PolicyConfig,
    config: GraphConfig,
}

impl GraphExecutor {
    /// Create an executor with the default configuration
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
        registry: Arc<ToolRegistry>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            log,
            snapshots,
            registry,
            policy,
            config: GraphConfig::default(),
        }
    }

    /// Override the configuration
    #[must_use]
    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// The deterministic execution id of a node within a run
    #[must_use]
    pub fn node_execution_id(run_id: &str, node: &str) -> ExecutionId {
        ExecutionId::from_name(&format!("{}/{}", run_id, node))
    }

    /// Run (or resume) a graph to completion.
    ///
    /// Submitting the same `run_id` again skips nodes whose terminal
    /// `EXECUTION_COMPLETED` is already in the log and re-schedules the
    /// rest.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] when the graph is structurally invalid;
    /// node failures surface in the report instead.
    pub async fn submit(&self, graph: &TaskGraph, run_id: &str) -> Result<GraphReport, GraphError> {
        graph.validate()?;
        tracing::info!(run_id, nodes = graph.len(), "graph run starting");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set: JoinSet<NodeResult> = JoinSet::new();
        let mut pending: BTreeSet<String> = graph.nodes().keys().cloned().collect();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut finished: IndexMap<String, NodeResult> = IndexMap::new();
        let mut halt_scheduling = false;

        loop {
            if !halt_scheduling {
                let ready: Vec<String> = pending
                    .iter()
                    .filter(|name| {
                        graph.get(name).is_some_and(|node| {
                            node.dependencies.iter().all(|dep| {
                                matches!(
                                    finished.get(dep).map(|r| r.status),
                                    Some(NodeStatus::Completed | NodeStatus::Skipped)
                                )
                            })
                        })
                    })
                    .cloned()
                    .collect();

                for name in ready {
                    pending.remove(&name);
                    let Some(node) = graph.get(&name) else {
                        continue;
                    };
                    let dependencies = dependency_context(node, &outputs);
                    join_set.spawn(run_node(
                        self.log.clone(),
                        self.snapshots.clone(),
                        self.registry.clone(),
                        self.policy.clone(),
                        semaphore.clone(),
                        run_id.to_string(),
                        node.clone(),
                        dependencies,
                    ));
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(run_id, error = %err, "graph node task aborted");
                    continue;
                }
            };

            tracing::info!(
                run_id,
                node = %result.node,
                status = ?result.status,
                "graph node finished"
            );
            if result.status == NodeStatus::Failed
                && self.config.failure_policy == FailurePolicy::FailFast
            {
                halt_scheduling = true;
            }
            if let Some(output) = &result.final_output {
                outputs.insert(result.node.clone(), output.clone());
            }
            finished.insert(result.node.clone(), result);
        }

        // Whatever never became ready was blocked by a failure upstream
        // (or by fail-fast); record it as cancelled.
        for name in pending {
            finished.insert(
                name.clone(),
                NodeResult {
                    execution_id: Self::node_execution_id(run_id, &name),
                    node: name,
                    status: NodeStatus::Cancelled,
                    final_output: None,
                    report: None,
                },
            );
        }

        // Stable report order: graph insertion order.
        let mut nodes = IndexMap::new();
        for name in graph.nodes().keys() {
            if let Some(result) = finished.shift_remove(name) {
                nodes.insert(name.clone(), result);
            }
        }

        let failure = nodes
            .values()
            .find(|r| r.status == NodeStatus::Failed)
            .map(|r| {
                r.report
                    .as_ref()
                    .and_then(|report| report.failure.clone())
                    .unwrap_or(FailureDetail {
                        kind: FailureKind::Internal,
                        detail: format!("node '{}' failed without detail", r.node),
                    })
            });
        let status = if nodes.values().all(|r| {
            matches!(r.status, NodeStatus::Completed | NodeStatus::Skipped)
        }) {
            ReportStatus::Success
        } else {
            ReportStatus::Failed
        };

        tracing::info!(run_id, status = ?status, "graph run finished");
        Ok(GraphReport {
            run_id: run_id.to_string(),
            status,
            nodes,
            failure,
        })
    }
}

fn dependency_context(node: &TaskNode, outputs: &HashMap<String, Value>) -> Value {
    let mut map = Map::new();
    for dep in &node.dependencies {
        map.insert(
            dep.clone(),
            outputs.get(dep).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(map)
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    registry: Arc<ToolRegistry>,
    policy: PolicyConfig,
    semaphore: Arc<Semaphore>,
    run_id: String,
    node: TaskNode,
    dependencies: Value,
) -> NodeResult {
    let execution_id = GraphExecutor::node_execution_id(&run_id, &node.name);
    let failed = |detail: String| NodeResult {
        node: node.name.clone(),
        execution_id,
        status: NodeStatus::Failed,
        final_output: None,
        report: Some(ExecutionReport {
            execution_id,
            status: ReportStatus::Failed,
            agent_name: node.agent.name().to_string(),
            total_steps: 0,
            token_usage: 0,
            tool_calls: 0,
            state_history: Vec::new(),
            execution_time_seconds: 0.0,
            final_output: None,
            failure: Some(FailureDetail {
                kind: FailureKind::Internal,
                detail,
            }),
        }),
    };

    let Ok(_permit) = semaphore.acquire_owned().await else {
        return failed("graph semaphore closed".to_string());
    };

    let snapshot = ExecutionSnapshot::create(
        execution_id,
        node.task.clone(),
        policy.to_value(),
        AgentIdentity::new(node.agent.name(), node.agent.version()),
        registry.identities(),
    );
    if let Err(err) = snapshots.put(snapshot.clone()) {
        return failed(err.to_string());
    }

    let events = match log.read(execution_id, 0) {
        Ok(events) => events,
        Err(err) => return failed(err.to_string()),
    };
    let state = ExecutionState::fold(execution_id, &events);
    match state.status {
        ExecutionStatus::Completed => {
            tracing::debug!(run_id, node = %node.name, "node already completed, skipping");
            return NodeResult {
                node: node.name.clone(),
                execution_id,
                status: NodeStatus::Skipped,
                final_output: state.final_output.clone(),
                report: Some(ExecutionReport::from_state(&state, node.agent.name(), 0.0)),
            };
        }
        ExecutionStatus::Failed => {
            return NodeResult {
                node: node.name.clone(),
                execution_id,
                status: NodeStatus::Failed,
                final_output: None,
                report: Some(ExecutionReport::from_state(&state, node.agent.name(), 0.0)),
            };
        }
        ExecutionStatus::Pending | ExecutionStatus::Running => {}
    }

    let policy_engine = PolicyEngine::new(policy);
    let mut engine = if state.events_folded > 0 {
        ExecutionEngine::from_state(snapshot, node.agent.clone(), registry, log, policy_engine, state)
    } else {
        ExecutionEngine::new(snapshot, node.agent.clone(), registry, log, policy_engine)
    }
    .with_dependencies(dependencies);

    let report = engine.run().await;
    let status = match report.status {
        ReportStatus::Success => NodeStatus::Completed,
        ReportStatus::Failed => NodeStatus::Failed,
    };
    NodeResult {
        node: node.name.clone(),
        execution_id,
        status,
        final_output: report.final_output.clone(),
        report: Some(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oao_log::MemoryEventLog;
    use oao_runtime::{AdapterError, AgentAdapter, StepContext, StepOutcome};
    use oao_store::MemorySnapshotStore;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records its node name on invoke, then finishes with a marker.
    struct TracingAdapter {
        node: &'static str,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AgentAdapter for TracingAdapter {
        fn name(&self) -> &str {
            self.node
        }

        async fn invoke(&self, ctx: StepContext) -> Result<StepOutcome, AdapterError> {
            self.order.lock().unwrap().push(self.node.to_string());
            Ok(StepOutcome::finished(json!({
                "node": self.node,
                "saw": ctx.dependencies,
            }))
            .with_tokens(1))
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl AgentAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn invoke(&self, _ctx: StepContext) -> Result<StepOutcome, AdapterError> {
            Err(AdapterError::Fatal {
                reason: "node exploded".to_string(),
            })
        }
    }

    fn make_executor() -> GraphExecutor {
        GraphExecutor::new(
            Arc::new(MemoryEventLog::new()),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(ToolRegistry::new()),
            PolicyConfig::unlimited(),
        )
    }

    fn diamond(order: &Arc<Mutex<Vec<String>>>, failing: Option<&str>) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for (name, deps) in [
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ] {
            let agent: Arc<dyn AgentAdapter> = if failing == Some(name) {
                Arc::new(FailingAdapter)
            } else {
                let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
                Arc::new(TracingAdapter {
                    node: leaked,
                    order: order.clone(),
                })
            };
            graph
                .add_node(TaskNode::new(name, agent, json!(name)).with_dependencies(deps))
                .unwrap();
        }
        graph
    }

    #[tokio::test]
    async fn test_diamond_runs_in_dependency_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let graph = diamond(&order, None);
        let executor = make_executor();

        let report = executor.submit(&graph, "run-1").await.unwrap();
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.nodes.len(), 4);

        let observed = order.lock().unwrap().clone();
        assert_eq!(observed[0], "a");
        assert_eq!(observed[3], "d");

        // D received both dependency outputs as context.
        let d_output = report.nodes["d"].final_output.as_ref().unwrap();
        let saw = &d_output["saw"];
        assert!(saw.get("b").is_some());
        assert!(saw.get("c").is_some());
        assert_eq!(saw["b"]["node"], "b");
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_downstream() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let graph = diamond(&order, Some("b"));
        let executor = make_executor();

        let report = executor.submit(&graph, "run-2").await.unwrap();
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.nodes["b"].status, NodeStatus::Failed);
        // D is never scheduled; C was independent of B and finished.
        assert_eq!(report.nodes["d"].status, NodeStatus::Cancelled);
        assert_eq!(report.nodes["c"].status, NodeStatus::Completed);
        assert_eq!(report.failure.unwrap().detail, "node exploded");
    }

    #[tokio::test]
    async fn test_resume_skips_completed_nodes() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let graph = diamond(&order, None);
        let executor = make_executor();

        executor.submit(&graph, "run-3").await.unwrap();
        let invocations_after_first = order.lock().unwrap().len();
        assert_eq!(invocations_after_first, 4);

        // Same run id: everything is already terminal in the log.
        let report = executor.submit(&graph, "run-3").await.unwrap();
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(order.lock().unwrap().len(), invocations_after_first);
        for result in report.nodes.values() {
            assert_eq!(result.status, NodeStatus::Skipped);
        }

        // A different run id is a fresh run.
        let report = executor.submit(&graph, "run-4").await.unwrap();
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(order.lock().unwrap().len(), invocations_after_first + 4);
        assert!(report
            .nodes
            .values()
            .all(|r| r.status == NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_cycle_rejected_at_submission() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        graph
            .add_node(
                TaskNode::new(
                    "x",
                    Arc::new(TracingAdapter {
                        node: "x",
                        order: order.clone(),
                    }),
                    json!("x"),
                )
                .with_dependencies(["y"]),
            )
            .unwrap();
        graph
            .add_node(
                TaskNode::new(
                    "y",
                    Arc::new(TracingAdapter {
                        node: "y",
                        order: order.clone(),
                    }),
                    json!("y"),
                )
                .with_dependencies(["x"]),
            )
            .unwrap();

        let executor = make_executor();
        let err = executor.submit(&graph, "run-5").await.unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_execution_ids_are_deterministic() {
        assert_eq!(
            GraphExecutor::node_execution_id("run", "a"),
            GraphExecutor::node_execution_id("run", "a")
        );
        assert_ne!(
            GraphExecutor::node_execution_id("run", "a"),
            GraphExecutor::node_execution_id("run", "b")
        );
    }
}
