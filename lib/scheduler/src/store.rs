//! Storage traits for workflows and executions.
//!
//! The scheduler never holds locks across workers. Instead:
//! - A firing updates the counters with a compare-and-set on
//!   `last_triggered_at` and stores its execution in the same write
//! - Executions are claimed with a lease before a worker advances them
//! - Execution saves check the `version` the worker loaded

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use waypoint_core::{OrganizationId, Result, WorkflowExecutionId, WorkflowId};
use waypoint_workflow::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowSummary,
};

/// Trait for workflow storage.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Stores a new workflow.
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Saves an edited workflow.
    ///
    /// Firing counters are left alone; they only change through
    /// [`WorkflowStore::record_firing`].
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Gets a workflow by ID.
    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, StoreError>;

    /// Lists active workflows fired by the given trigger type.
    async fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Lists an organization's workflows for display.
    async fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WorkflowSummary>, StoreError>;

    /// Records a firing and stores its execution, if nobody else fired the
    /// workflow first.
    ///
    /// Only if the stored `last_triggered_at` of `execution.workflow_id`
    /// still equals `expected`: sets it to `execution.created_at`, increments
    /// `execution_count` and inserts `execution`. Either all of that happens
    /// or none of it does. Returns whether the firing was recorded.
    async fn record_firing(
        &self,
        expected: Option<DateTime<Utc>>,
        execution: &WorkflowExecution,
    ) -> Result<bool, StoreError>;
}

/// Trait for execution storage.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Stores a new execution.
    async fn insert_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError>;

    /// Gets an execution by ID.
    async fn get_execution(
        &self,
        id: WorkflowExecutionId,
    ) -> Result<WorkflowExecution, StoreError>;

    /// Saves an execution if its version is still current.
    ///
    /// On success the stored version and `execution.version` are both
    /// incremented and any claim is released. A stale version fails with
    /// [`StoreError::VersionConflict`].
    async fn update_execution(
        &self,
        execution: &mut WorkflowExecution,
    ) -> Result<(), StoreError>;

    /// Counts a workflow's executions created at or after `since`.
    async fn count_created_since(
        &self,
        workflow_id: WorkflowId,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Claims up to `limit` pending executions, oldest first.
    ///
    /// Claimed executions stay invisible to other claims until they are
    /// saved or `lease` runs out.
    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Claims up to `limit` waiting executions with `resume_at <= now`.
    ///
    /// Same lease semantics as [`ExecutionStore::claim_pending`].
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Lists a workflow's executions in any of the given statuses.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<WorkflowExecution>, StoreError>;
}
