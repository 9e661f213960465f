//! Execution engine: walks a workflow graph for one execution.
//!
//! The engine owns graph logic. Node executors own side effects. Each call
//! to [`Engine::step`] is one unit of work that leaves the execution in a
//! persistable state, so consecutive steps may run on different workers.
//!
//! Traversal is depth-first in edge order over a frontier stored on the
//! execution. Delay nodes suspend the execution instead of running an
//! executor; [`Engine::resume`] picks it up again.

use crate::condition;
use crate::definition::Workflow;
use crate::error::{EngineError, NodeExecutionError};
use crate::execution::{
    ExecutionStatus, NodeResult, NodeResultStatus, ResumeData, WorkflowExecution,
};
use crate::node::{Node, NodeConfig, NodeId, NodeType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use rootcause::prelude::ResultExt;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a node executor reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node ran.
    Success {
        output: JsonValue,
        /// Output handle to leave through. Only branching nodes use it.
        branch: Option<String>,
        /// Values to merge into the execution context.
        context: Map<String, JsonValue>,
    },
    /// The node chose not to run. Traversal continues past it, unless it
    /// is a branching node, which then takes no branch.
    Skipped { reason: String },
}

impl NodeOutcome {
    #[must_use]
    pub fn success(output: JsonValue) -> Self {
        Self::Success {
            output,
            branch: None,
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn branch(output: JsonValue, handle: impl Into<String>) -> Self {
        Self::Success {
            output,
            branch: Some(handle.into()),
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Adds a context value. Has no effect on skipped outcomes.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        if let Self::Success { context, .. } = &mut self {
            context.insert(key.into(), value);
        }
        self
    }
}

/// Trait for node execution.
///
/// Implementations perform the node's work and report an outcome. They must
/// not touch the execution's state; the engine records results.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<NodeOutcome, NodeExecutionError>;
}

/// Trigger nodes pass the trigger payload through as their output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(
        &self,
        _node: &Node,
        execution: &WorkflowExecution,
        _now: DateTime<Utc>,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        Ok(NodeOutcome::success(execution.trigger_data.clone()))
    }
}

/// Evaluates condition nodes against `{trigger, context}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        execution: &WorkflowExecution,
        _now: DateTime<Utc>,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        let NodeConfig::Condition(config) = &node.config else {
            return Err(NodeExecutionError::InvalidConfig {
                message: format!("node '{}' is not a condition", node.id),
            });
        };
        let scope = execution.scope();
        let actual = condition::resolve(&scope, &config.field).cloned();
        let result = condition::evaluate(config, &scope);
        let handle = if result {
            crate::node::HANDLE_TRUE
        } else {
            crate::node::HANDLE_FALSE
        };
        Ok(NodeOutcome::branch(
            json!({ "field": config.field, "actual": actual, "result": result }),
            handle,
        ))
    }
}

/// Node executors keyed by node type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the trigger and condition executors.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with(NodeType::Trigger, TriggerExecutor)
            .with(NodeType::Condition, ConditionExecutor)
    }

    /// Registers an executor, replacing any previous one for the type.
    pub fn register(&mut self, node_type: NodeType, executor: impl NodeExecutor + 'static) {
        self.executors.insert(node_type, Arc::new(executor));
    }

    /// Registers an executor, builder style.
    #[must_use]
    pub fn with(mut self, node_type: NodeType, executor: impl NodeExecutor + 'static) -> Self {
        self.register(node_type, executor);
        self
    }

    #[must_use]
    pub fn get(&self, node_type: NodeType) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("node_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a single [`Engine::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The execution moved `pending -> running`.
    Started,
    /// A node was visited and its result recorded.
    Visited {
        node_id: NodeId,
        status: NodeResultStatus,
    },
    /// A delay node suspended the execution.
    Suspended {
        node_id: NodeId,
        resume_at: DateTime<Utc>,
    },
    /// The frontier emptied; the execution completed.
    Completed,
    /// The execution failed.
    Failed { message: String },
}

/// The execution engine.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: ExecutorRegistry,
}

impl Engine {
    #[must_use]
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self { registry }
    }

    /// Performs one unit of work on a pending or running execution.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, execution_id = %execution.id))]
    pub async fn step(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, Report<EngineError>> {
        ensure_same_workflow(workflow, execution)?;
        let execution_id = execution.id;

        match execution.status {
            ExecutionStatus::Pending => {
                execution
                    .start(now)
                    .context(EngineError::StateMachine { execution_id })?;
                let Some(trigger) = workflow.graph().trigger_nodes().next() else {
                    return fail(execution, "workflow has no trigger node", now);
                };
                execution.pending_nodes.push(trigger.id.clone());
                debug!(node_id = %trigger.id, "execution started");
                return Ok(StepOutcome::Started);
            }
            ExecutionStatus::Running => {}
            status => {
                return Err(Report::new(EngineError::NotRunnable {
                    execution_id,
                    status,
                }));
            }
        }

        let node_id = loop {
            match execution.pending_nodes.pop() {
                None => {
                    execution
                        .complete(now)
                        .context(EngineError::StateMachine { execution_id })?;
                    info!("execution completed");
                    return Ok(StepOutcome::Completed);
                }
                Some(node_id) if execution.has_result(&node_id) => continue,
                Some(node_id) => break node_id,
            }
        };

        let Some(node) = workflow.graph().get_node(&node_id) else {
            let message = format!("node '{node_id}' is not in the workflow graph");
            return fail(execution, &message, now);
        };
        execution.current_node_id = Some(node_id.clone());

        if let NodeConfig::Delay(delay) = &node.config {
            let resume_at = now + delay.duration();
            let next_nodes = successors(workflow, &node_id, None);
            execution
                .suspend(
                    resume_at,
                    ResumeData {
                        delay_node_id: node_id.clone(),
                        next_nodes,
                        suspended_at: now,
                    },
                )
                .context(EngineError::StateMachine { execution_id })?;
            info!(node_id = %node_id, %resume_at, "execution suspended");
            return Ok(StepOutcome::Suspended { node_id, resume_at });
        }

        let outcome = match self.registry.get(node.node_type()) {
            Some(executor) => executor.execute(node, execution, now).await,
            None => Err(NodeExecutionError::InvalidConfig {
                message: format!("no executor registered for {} nodes", node.node_type()),
            }),
        };

        match outcome {
            Ok(NodeOutcome::Success {
                output,
                branch,
                context,
            }) => {
                let next = if node.output_handles().is_some() {
                    let outgoing = workflow.graph().outgoing(&node_id);
                    let next = successors(workflow, &node_id, branch.as_deref());
                    if !outgoing.is_empty() && next.is_empty() {
                        let error = match &branch {
                            Some(handle) => format!("no outgoing edge for branch '{handle}'"),
                            None => "branching node chose no branch".to_string(),
                        };
                        return fail_node(execution, node_id, &error, now);
                    }
                    next
                } else {
                    successors(workflow, &node_id, None)
                };

                execution.merge_context(context);
                execution
                    .record_result(NodeResult::success(node_id.clone(), output, now))
                    .context(EngineError::StateMachine { execution_id })?;
                push_frontier(execution, next);
                debug!(node_id = %node_id, branch = ?branch, "node succeeded");
                Ok(StepOutcome::Visited {
                    node_id,
                    status: NodeResultStatus::Success,
                })
            }
            Ok(NodeOutcome::Skipped { reason }) => {
                debug!(node_id = %node_id, %reason, "node skipped");
                execution
                    .record_result(NodeResult::skipped(node_id.clone(), reason, now))
                    .context(EngineError::StateMachine { execution_id })?;
                // A skipped branching node takes no branch.
                if node.output_handles().is_none() {
                    push_frontier(execution, successors(workflow, &node_id, None));
                }
                Ok(StepOutcome::Visited {
                    node_id,
                    status: NodeResultStatus::Skipped,
                })
            }
            Err(error) => fail_node(execution, node_id, &error.to_string(), now),
        }
    }

    /// Steps until the execution is no longer pending or running.
    pub async fn run(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStatus, Report<EngineError>> {
        if !matches!(
            execution.status,
            ExecutionStatus::Pending | ExecutionStatus::Running
        ) {
            return Err(Report::new(EngineError::NotRunnable {
                execution_id: execution.id,
                status: execution.status,
            }));
        }
        while matches!(
            execution.status,
            ExecutionStatus::Pending | ExecutionStatus::Running
        ) {
            self.step(workflow, execution, now).await?;
        }
        Ok(execution.status)
    }

    /// Resumes a waiting execution and runs it on.
    ///
    /// The delay node's result is recorded here, then traversal continues
    /// with the delay node's successors.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, execution_id = %execution.id))]
    pub async fn resume(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStatus, Report<EngineError>> {
        ensure_same_workflow(workflow, execution)?;
        let execution_id = execution.id;

        let resume = execution
            .resume(now)
            .context(EngineError::StateMachine { execution_id })?;
        let output = json!({
            "suspended_at": resume.suspended_at,
            "resumed_at": now,
        });
        execution
            .record_result(NodeResult::success(
                resume.delay_node_id.clone(),
                output,
                now,
            ))
            .context(EngineError::StateMachine { execution_id })?;
        push_frontier(execution, resume.next_nodes);
        info!(node_id = %resume.delay_node_id, "execution resumed");

        self.run(workflow, execution, now).await
    }
}

fn ensure_same_workflow(
    workflow: &Workflow,
    execution: &WorkflowExecution,
) -> Result<(), Report<EngineError>> {
    if execution.workflow_id != workflow.id {
        return Err(Report::new(EngineError::WorkflowMismatch {
            execution_id: execution.id,
            workflow_id: workflow.id,
        }));
    }
    Ok(())
}

/// Targets of the edges leaving `node_id`, in edge order. With a branch,
/// only edges leaving through that handle count.
fn successors(workflow: &Workflow, node_id: &NodeId, branch: Option<&str>) -> Vec<NodeId> {
    workflow
        .graph()
        .outgoing(node_id)
        .into_iter()
        .filter(|edge| branch.is_none_or(|handle| edge.leaves_through(handle)))
        .map(|edge| edge.target.clone())
        .collect()
}

/// Pushes successors so the first one is visited next.
fn push_frontier(execution: &mut WorkflowExecution, next: Vec<NodeId>) {
    execution.pending_nodes.extend(next.into_iter().rev());
}

fn fail(
    execution: &mut WorkflowExecution,
    message: &str,
    now: DateTime<Utc>,
) -> Result<StepOutcome, Report<EngineError>> {
    let execution_id = execution.id;
    warn!(error = %message, "execution failed");
    execution
        .fail(message, now)
        .context(EngineError::StateMachine { execution_id })?;
    Ok(StepOutcome::Failed {
        message: message.to_string(),
    })
}

fn fail_node(
    execution: &mut WorkflowExecution,
    node_id: NodeId,
    error: &str,
    now: DateTime<Utc>,
) -> Result<StepOutcome, Report<EngineError>> {
    let execution_id = execution.id;
    warn!(node_id = %node_id, %error, "node failed");
    let message = format!("node '{node_id}' failed: {error}");
    execution
        .record_result(NodeResult::failed(node_id, error, now))
        .context(EngineError::StateMachine { execution_id })?;
    fail(execution, &message, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::graph::WorkflowGraph;
    use crate::node::{ActionKind, ConditionOperator};
    use crate::trigger::TriggerConfig;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use waypoint_core::OrganizationId;

    /// Action executor that records the nodes it ran.
    #[derive(Clone, Default)]
    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<NodeId>>>,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<NodeId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeExecutor for RecordingExecutor {
        async fn execute(
            &self,
            node: &Node,
            _execution: &WorkflowExecution,
            _now: DateTime<Utc>,
        ) -> Result<NodeOutcome, NodeExecutionError> {
            self.calls.lock().unwrap().push(node.id.clone());
            Ok(NodeOutcome::success(json!({ "done": node.id.as_str() }))
                .with_context(format!("ran_{}", node.id), json!(true)))
        }
    }

    /// Action executor that fails on one node id.
    struct FailingExecutor {
        fail_on: &'static str,
    }

    #[async_trait]
    impl NodeExecutor for FailingExecutor {
        async fn execute(
            &self,
            node: &Node,
            _execution: &WorkflowExecution,
            _now: DateTime<Utc>,
        ) -> Result<NodeOutcome, NodeExecutionError> {
            if node.id.as_str() == self.fail_on {
                Err(NodeExecutionError::ExternalService {
                    service: "mailer".to_string(),
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(NodeOutcome::success(JsonValue::Null))
            }
        }
    }

    struct SkippingExecutor;

    #[async_trait]
    impl NodeExecutor for SkippingExecutor {
        async fn execute(
            &self,
            _node: &Node,
            _execution: &WorkflowExecution,
            _now: DateTime<Utc>,
        ) -> Result<NodeOutcome, NodeExecutionError> {
            Ok(NodeOutcome::skipped("student opted out"))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 14, 10, 0, 0).unwrap()
    }

    fn action(id: &str) -> Node {
        Node::action(id, ActionKind::SendNotification)
    }

    fn workflow(graph: WorkflowGraph) -> Workflow {
        let mut workflow = Workflow::new(OrganizationId::new(), "test", TriggerConfig::Manual, now())
            .with_graph(graph);
        workflow.activate(now()).unwrap();
        workflow
    }

    fn engine_with(executor: impl NodeExecutor + 'static) -> Engine {
        Engine::new(ExecutorRegistry::with_builtins().with(NodeType::Action, executor))
    }

    fn execution_for(workflow: &Workflow, trigger_data: JsonValue) -> WorkflowExecution {
        WorkflowExecution::new(workflow.id, workflow.organization_id, trigger_data, now())
    }

    fn visited(execution: &WorkflowExecution) -> Vec<&str> {
        execution.visited().map(NodeId::as_str).collect()
    }

    #[tokio::test]
    async fn trigger_then_action_completes_with_two_results() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_edge(Edge::new("t1", "a1")),
        );
        let recorder = RecordingExecutor::default();
        let engine = engine_with(recorder.clone());
        let mut execution = execution_for(&workflow, json!({ "student_id": "s-1" }));

        assert_eq!(
            engine.step(&workflow, &mut execution, now()).await.unwrap(),
            StepOutcome::Started
        );
        assert_eq!(execution.status, ExecutionStatus::Running);

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(visited(&execution), vec!["t1", "a1"]);
        assert_eq!(execution.node_results.len(), 2);
        assert_eq!(execution.node_results[0].output, json!({ "student_id": "s-1" }));
        assert_eq!(execution.context["ran_a1"], json!(true));
        assert_eq!(recorder.calls(), vec![NodeId::new("a1")]);
        assert_eq!(execution.completed_at, Some(now()));
    }

    #[tokio::test]
    async fn condition_follows_matching_branch() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(Node::condition(
                    "low_score",
                    "trigger.score",
                    ConditionOperator::Lt,
                    json!(60),
                ))
                .with_node(action("alert"))
                .with_node(action("praise"))
                .with_edge(Edge::new("t1", "low_score"))
                .with_edge(Edge::from_handle("low_score", "true", "alert"))
                .with_edge(Edge::from_handle("low_score", "false", "praise")),
        );
        let engine = engine_with(RecordingExecutor::default());

        let mut low = execution_for(&workflow, json!({ "score": 45 }));
        engine.run(&workflow, &mut low, now()).await.unwrap();
        assert_eq!(visited(&low), vec!["t1", "low_score", "alert"]);
        assert_eq!(
            low.node_result(&NodeId::new("low_score")).unwrap().output["result"],
            json!(true)
        );

        let mut high = execution_for(&workflow, json!({ "score": 88 }));
        engine.run(&workflow, &mut high, now()).await.unwrap();
        assert_eq!(visited(&high), vec!["t1", "low_score", "praise"]);
        assert_eq!(high.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn unmatched_branch_fails_the_execution() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(Node::condition(
                    "flagged",
                    "trigger.flagged",
                    ConditionOperator::Exists,
                    JsonValue::Null,
                ))
                .with_node(action("alert"))
                .with_edge(Edge::new("t1", "flagged"))
                .with_edge(Edge::from_handle("flagged", "true", "alert")),
        );
        let engine = engine_with(RecordingExecutor::default());
        let mut execution = execution_for(&workflow, json!({}));

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Failed);
        let result = execution.node_result(&NodeId::new("flagged")).unwrap();
        assert_eq!(result.status, NodeResultStatus::Failed);
        assert!(
            result
                .error
                .as_deref()
                .unwrap()
                .contains("no outgoing edge for branch 'false'")
        );
    }

    #[tokio::test]
    async fn node_failure_keeps_partial_progress() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_node(action("a2"))
                .with_node(action("a3"))
                .with_edge(Edge::new("t1", "a1"))
                .with_edge(Edge::new("a1", "a2"))
                .with_edge(Edge::new("a2", "a3")),
        );
        let engine = engine_with(FailingExecutor { fail_on: "a2" });
        let mut execution = execution_for(&workflow, json!({}));

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(visited(&execution), vec!["t1", "a1", "a2"]);
        assert!(execution.pending_nodes.is_empty());
        let message = execution.error_message.as_deref().unwrap();
        assert!(message.contains("node 'a2' failed"));
        assert!(message.contains("connection refused"));
    }

    #[tokio::test]
    async fn fan_out_visits_every_branch_depth_first() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t"))
                .with_node(action("left"))
                .with_node(action("left_child"))
                .with_node(action("right"))
                .with_node(action("join"))
                .with_edge(Edge::new("t", "left"))
                .with_edge(Edge::new("t", "right"))
                .with_edge(Edge::new("left", "left_child"))
                .with_edge(Edge::new("left_child", "join"))
                .with_edge(Edge::new("right", "join")),
        );
        let engine = engine_with(RecordingExecutor::default());
        let mut execution = execution_for(&workflow, json!({}));

        engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(
            visited(&execution),
            vec!["t", "left", "left_child", "join", "right"]
        );
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn skipped_nodes_are_recorded_and_passed() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_node(action("a2"))
                .with_edge(Edge::new("t1", "a1"))
                .with_edge(Edge::new("a1", "a2")),
        );
        let engine = engine_with(SkippingExecutor);
        let mut execution = execution_for(&workflow, json!({}));

        engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.node_result(&NodeId::new("a2")).unwrap().status,
            NodeResultStatus::Skipped
        );
    }

    #[tokio::test]
    async fn skipped_condition_takes_no_branch() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(Node::condition(
                    "low_score",
                    "trigger.score",
                    ConditionOperator::Lt,
                    json!(60),
                ))
                .with_node(action("alert"))
                .with_node(action("praise"))
                .with_edge(Edge::new("t1", "low_score"))
                .with_edge(Edge::from_handle("low_score", "true", "alert"))
                .with_edge(Edge::from_handle("low_score", "false", "praise")),
        );
        let recorder = RecordingExecutor::default();
        let engine = Engine::new(
            ExecutorRegistry::with_builtins()
                .with(NodeType::Condition, SkippingExecutor)
                .with(NodeType::Action, recorder.clone()),
        );
        let mut execution = execution_for(&workflow, json!({ "score": 45 }));

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(visited(&execution), vec!["t1", "low_score"]);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_executor_fails_the_node() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_edge(Edge::new("t1", "a1")),
        );
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let mut execution = execution_for(&workflow, json!({}));

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Failed);
        assert!(
            execution
                .error_message
                .as_deref()
                .unwrap()
                .contains("no executor registered for action nodes")
        );
    }

    fn delayed_graph() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node(Node::trigger("t1"))
            .with_node(action("a1"))
            .with_node(Node::delay("wait", 90))
            .with_node(action("a2"))
            .with_node(action("a3"))
            .with_edge(Edge::new("t1", "a1"))
            .with_edge(Edge::new("a1", "wait"))
            .with_edge(Edge::new("wait", "a2"))
            .with_edge(Edge::new("a2", "a3"))
    }

    #[tokio::test]
    async fn delay_suspends_until_resume_at() {
        let workflow = workflow(delayed_graph());
        let engine = engine_with(RecordingExecutor::default());
        let mut execution = execution_for(&workflow, json!({}));

        let status = engine.run(&workflow, &mut execution, now()).await.unwrap();

        assert_eq!(status, ExecutionStatus::Waiting);
        assert_eq!(execution.current_node_id, Some(NodeId::new("wait")));
        assert_eq!(execution.resume_at, Some(now() + Duration::minutes(90)));
        assert!(!execution.has_result(&NodeId::new("wait")));

        let early = engine
            .resume(&workflow, &mut execution, now() + Duration::minutes(89))
            .await
            .unwrap_err();
        assert!(early.to_string().contains("state machine error"));
        assert_eq!(execution.status, ExecutionStatus::Waiting);

        let err = engine
            .step(&workflow, &mut execution, now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot advance while waiting"));
    }

    #[tokio::test]
    async fn resumption_continues_where_it_stopped() {
        let workflow = workflow(delayed_graph());
        let engine = engine_with(RecordingExecutor::default());

        // Resume straight away on the same worker.
        let mut direct = execution_for(&workflow, json!({}));
        engine.run(&workflow, &mut direct, now()).await.unwrap();
        let due = direct.resume_at.unwrap();
        engine.resume(&workflow, &mut direct, due).await.unwrap();

        // Persist while waiting, reload later elsewhere, then resume.
        let mut persisted = execution_for(&workflow, json!({}));
        engine.run(&workflow, &mut persisted, now()).await.unwrap();
        let stored = serde_json::to_string(&persisted).unwrap();
        let mut reloaded: WorkflowExecution = serde_json::from_str(&stored).unwrap();
        engine
            .resume(&workflow, &mut reloaded, due + Duration::hours(3))
            .await
            .unwrap();

        let expected = vec!["t1", "a1", "wait", "a2", "a3"];
        assert_eq!(visited(&direct), expected);
        assert_eq!(visited(&reloaded), expected);
        assert_eq!(direct.status, ExecutionStatus::Completed);
        assert_eq!(reloaded.status, ExecutionStatus::Completed);
        assert!(reloaded.resume_data.is_none());
    }

    #[tokio::test]
    async fn completed_execution_is_not_runnable() {
        let workflow = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_edge(Edge::new("t1", "a1")),
        );
        let engine = engine_with(RecordingExecutor::default());
        let mut execution = execution_for(&workflow, json!({}));
        engine.run(&workflow, &mut execution, now()).await.unwrap();

        let err = engine
            .run(&workflow, &mut execution, now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot advance while completed"));
        assert_eq!(execution.node_results.len(), 2);
    }

    #[tokio::test]
    async fn execution_of_other_workflow_is_rejected() {
        let first = workflow(
            WorkflowGraph::new()
                .with_node(Node::trigger("t1"))
                .with_node(action("a1"))
                .with_edge(Edge::new("t1", "a1")),
        );
        let second = workflow(first.graph().clone());
        let engine = engine_with(RecordingExecutor::default());
        let mut execution = execution_for(&first, json!({}));

        let err = engine
            .step(&second, &mut execution, now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not belong to workflow"));
        assert_eq!(execution.status, ExecutionStatus::Pending);
    }
}
