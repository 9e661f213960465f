//! Execution runner: claims queued and due executions and advances them.
//!
//! Each claimed execution is driven until it leaves `running` (completed,
//! failed or waiting on a delay) and then saved once. A worker that loses
//! its claim finds out at save time through a version conflict, and its
//! work is discarded.

use crate::error::SchedulerError;
use crate::store::{ExecutionStore, WorkflowStore};
use chrono::{DateTime, Duration, Utc};
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use waypoint_core::WorkflowId;
use waypoint_workflow::{
    Engine, EngineError, ExecutionStatus, Workflow, WorkflowExecution, WorkflowStatus,
};

/// Default claim lease, in seconds.
pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// Default number of executions claimed per poll.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Counts from one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub waiting: usize,
    pub cancelled: usize,
    /// Saves rejected because the execution changed under us.
    pub conflicts: usize,
    /// Executions left for the lease to expire after an error.
    pub errors: usize,
}

impl PollSummary {
    fn tally(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Waiting => self.waiting += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Advance {
    Start,
    Resume,
}

/// Polls the store for work and drives executions through the engine.
pub struct ExecutionRunner<S> {
    store: Arc<S>,
    engine: Engine,
    lease: Duration,
    batch_size: usize,
}

impl<S: WorkflowStore + ExecutionStore> ExecutionRunner<S> {
    #[must_use]
    pub fn new(store: Arc<S>, engine: Engine) -> Self {
        Self {
            store,
            engine,
            lease: Duration::seconds(DEFAULT_LEASE_SECONDS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Claims pending executions and runs them.
    ///
    /// Executions of archived workflows are cancelled instead of started.
    #[instrument(skip(self))]
    pub async fn process_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PollSummary, Report<SchedulerError>> {
        let claimed = self
            .store
            .claim_pending(now, self.lease, self.batch_size)
            .await
            .context(SchedulerError::Polling { queue: "pending" })?;
        Ok(self.advance_all(claimed, Advance::Start, now).await)
    }

    /// Claims waiting executions whose delay has elapsed and resumes them.
    #[instrument(skip(self))]
    pub async fn process_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PollSummary, Report<SchedulerError>> {
        let claimed = self
            .store
            .claim_due(now, self.lease, self.batch_size)
            .await
            .context(SchedulerError::Polling { queue: "due" })?;
        Ok(self.advance_all(claimed, Advance::Resume, now).await)
    }

    /// Cancels a workflow's pending and running executions.
    ///
    /// Returns how many were cancelled. An execution saved by someone else
    /// in the meantime is left alone.
    #[instrument(skip(self), fields(%workflow_id))]
    pub async fn cancel_for_workflow(
        &self,
        workflow_id: WorkflowId,
        now: DateTime<Utc>,
    ) -> Result<usize, Report<SchedulerError>> {
        let executions = self
            .store
            .list_for_workflow(
                workflow_id,
                &[ExecutionStatus::Pending, ExecutionStatus::Running],
            )
            .await
            .context(SchedulerError::Cancellation { workflow_id })?;

        let mut cancelled = 0;
        for mut execution in executions {
            execution
                .cancel(now)
                .context(SchedulerError::Cancellation { workflow_id })?;
            match self.store.update_execution(&mut execution).await {
                Ok(()) => cancelled += 1,
                Err(error) if error.current_context().is_conflict() => {
                    debug!(execution_id = %execution.id, "execution moved on before cancellation");
                }
                Err(error) => {
                    return Err(error).context(SchedulerError::Cancellation { workflow_id });
                }
            }
        }
        info!(cancelled, "cancelled executions");
        Ok(cancelled)
    }

    async fn advance_all(
        &self,
        claimed: Vec<WorkflowExecution>,
        mode: Advance,
        now: DateTime<Utc>,
    ) -> PollSummary {
        let mut summary = PollSummary {
            claimed: claimed.len(),
            ..PollSummary::default()
        };
        for mut execution in claimed {
            let execution_id = execution.id;
            let workflow = match self.store.get_workflow(execution.workflow_id).await {
                Ok(workflow) => workflow,
                Err(error) => {
                    warn!(%execution_id, %error, "failed to load workflow for execution");
                    summary.errors += 1;
                    continue;
                }
            };
            if let Err(error) = self.drive(&workflow, &mut execution, mode, now).await {
                warn!(%execution_id, %error, "failed to advance execution");
                summary.errors += 1;
                continue;
            }
            match self.store.update_execution(&mut execution).await {
                Ok(()) => summary.tally(execution.status),
                Err(error) if error.current_context().is_conflict() => {
                    warn!(%execution_id, "execution changed while claimed, discarding work");
                    summary.conflicts += 1;
                }
                Err(error) => {
                    warn!(%execution_id, %error, "failed to save execution");
                    summary.errors += 1;
                }
            }
        }
        if summary.claimed > 0 {
            info!(?mode, ?summary, "processed executions");
        }
        summary
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        mode: Advance,
        now: DateTime<Utc>,
    ) -> Result<(), Report<EngineError>> {
        match mode {
            Advance::Start if workflow.status() == WorkflowStatus::Archived => {
                debug!(execution_id = %execution.id, "workflow archived, cancelling queued run");
                let execution_id = execution.id;
                execution
                    .cancel(now)
                    .context(EngineError::StateMachine { execution_id })?;
            }
            Advance::Start => {
                self.engine.run(workflow, execution, now).await?;
            }
            Advance::Resume => {
                self.engine.resume(workflow, execution, now).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use waypoint_core::OrganizationId;
    use waypoint_workflow::{
        ActionKind, Edge, ExecutorRegistry, Node, NodeExecutionError, NodeExecutor, NodeOutcome,
        NodeType, TriggerConfig, WorkflowGraph,
    };

    struct EchoAction;

    #[async_trait]
    impl NodeExecutor for EchoAction {
        async fn execute(
            &self,
            node: &Node,
            _execution: &WorkflowExecution,
            _now: DateTime<Utc>,
        ) -> Result<NodeOutcome, NodeExecutionError> {
            Ok(NodeOutcome::success(json!({ "node": node.id.as_str() })))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 6, 9, 0, 0).unwrap()
    }

    fn engine() -> Engine {
        Engine::new(ExecutorRegistry::with_builtins().with(NodeType::Action, EchoAction))
    }

    fn active(graph: WorkflowGraph) -> Workflow {
        let mut workflow = Workflow::new(OrganizationId::new(), "wf", TriggerConfig::Manual, now())
            .with_graph(graph);
        workflow.activate(now()).unwrap();
        workflow
    }

    fn straight() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node(Node::trigger("t1"))
            .with_node(Node::action("a1", ActionKind::SendNotification))
            .with_edge(Edge::new("t1", "a1"))
    }

    fn with_delay() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node(Node::trigger("t1"))
            .with_node(Node::delay("wait", 60))
            .with_node(Node::action("a1", ActionKind::CreateAlert))
            .with_edge(Edge::new("t1", "wait"))
            .with_edge(Edge::new("wait", "a1"))
    }

    async fn setup(
        workflow: &Workflow,
    ) -> (Arc<InMemoryStore>, ExecutionRunner<InMemoryStore>, WorkflowExecution) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_workflow(workflow).await.unwrap();
        let execution =
            WorkflowExecution::new(workflow.id, workflow.organization_id, json!({}), now());
        store.insert_execution(&execution).await.unwrap();
        let runner = ExecutionRunner::new(store.clone(), engine());
        (store, runner, execution)
    }

    #[tokio::test]
    async fn pending_execution_runs_to_completion() {
        let workflow = active(straight());
        let (store, runner, execution) = setup(&workflow).await;

        let summary = runner.process_pending(now()).await.unwrap();

        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        let stored = store.get_execution(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.node_results.len(), 2);

        // Nothing left to claim.
        let again = runner.process_pending(now()).await.unwrap();
        assert_eq!(again, PollSummary::default());
    }

    #[tokio::test]
    async fn delayed_execution_waits_then_resumes_when_due() {
        let workflow = active(with_delay());
        let (store, runner, execution) = setup(&workflow).await;

        let summary = runner.process_pending(now()).await.unwrap();
        assert_eq!(summary.waiting, 1);
        let waiting = store.get_execution(execution.id).await.unwrap();
        assert_eq!(waiting.status, ExecutionStatus::Waiting);
        assert_eq!(waiting.resume_at, Some(now() + Duration::minutes(60)));

        let early = runner
            .process_due(now() + Duration::minutes(59))
            .await
            .unwrap();
        assert_eq!(early.claimed, 0);

        let due = runner
            .process_due(now() + Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(due.completed, 1);

        let done = store.get_execution(execution.id).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        let order: Vec<_> = done.visited().map(|id| id.as_str().to_string()).collect();
        assert_eq!(order, ["t1", "wait", "a1"]);
    }

    #[tokio::test]
    async fn due_execution_is_claimed_once() {
        let workflow = active(with_delay());
        let (store, runner, _execution) = setup(&workflow).await;
        runner.process_pending(now()).await.unwrap();

        let later = now() + Duration::hours(2);
        let claimed = store.claim_due(later, Duration::minutes(5), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Another poller sees nothing while the claim holds.
        let summary = runner.process_due(later).await.unwrap();
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn archived_workflow_cancels_queued_runs() {
        let mut workflow = active(straight());
        workflow.archive(now()).unwrap();
        let (store, runner, execution) = setup(&workflow).await;

        let summary = runner.process_pending(now()).await.unwrap();

        assert_eq!(summary.cancelled, 1);
        let stored = store.get_execution(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert!(stored.node_results.is_empty());
    }

    #[tokio::test]
    async fn cancel_for_workflow_skips_waiting_and_finished_runs() {
        let workflow = active(with_delay());
        let (store, runner, waiting) = setup(&workflow).await;
        runner.process_pending(now()).await.unwrap();

        let queued =
            WorkflowExecution::new(workflow.id, workflow.organization_id, json!({}), now());
        store.insert_execution(&queued).await.unwrap();

        let cancelled = runner.cancel_for_workflow(workflow.id, now()).await.unwrap();

        assert_eq!(cancelled, 1);
        let queued = store.get_execution(queued.id).await.unwrap();
        assert_eq!(queued.status, ExecutionStatus::Cancelled);
        let waiting = store.get_execution(waiting.id).await.unwrap();
        assert_eq!(waiting.status, ExecutionStatus::Waiting);
    }

    #[tokio::test]
    async fn cancelled_claim_is_a_conflict_for_the_worker() {
        let workflow = active(straight());
        let (store, _runner, execution) = setup(&workflow).await;

        // A worker claims the run, then a supervisor cancels it first.
        let mut claimed = store.claim_pending(now(), Duration::minutes(5), 10).await.unwrap();
        let mut stale = claimed.remove(0);
        let mut supervisor = store.get_execution(execution.id).await.unwrap();
        supervisor.cancel(now()).unwrap();
        store.update_execution(&mut supervisor).await.unwrap();

        engine().run(&workflow, &mut stale, now()).await.unwrap();
        let err = store.update_execution(&mut stale).await.unwrap_err();
        assert!(err.current_context().is_conflict());

        let stored = store.get_execution(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }
}
