//! In-memory store, for tests and single-process embedding.

use crate::error::StoreError;
use crate::store::{ExecutionStore, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rootcause::Report;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use waypoint_core::{OrganizationId, WorkflowExecutionId, WorkflowId};
use waypoint_workflow::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowStatus, WorkflowSummary,
};

#[derive(Debug)]
struct StoredExecution {
    execution: WorkflowExecution,
    claimed_until: Option<DateTime<Utc>>,
}

impl StoredExecution {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    workflows: BTreeMap<WorkflowId, Workflow>,
    executions: BTreeMap<WorkflowExecutionId, StoredExecution>,
}

impl Inner {
    fn insert_execution(
        &mut self,
        execution: &WorkflowExecution,
    ) -> Result<(), Report<StoreError>> {
        if self.executions.contains_key(&execution.id) {
            return Err(Report::new(StoreError::AlreadyExists {
                id: execution.id.to_string(),
            }));
        }
        self.executions.insert(
            execution.id,
            StoredExecution {
                execution: execution.clone(),
                claimed_until: None,
            },
        );
        Ok(())
    }

    /// Claims up to `limit` eligible executions in `order_key` order.
    fn claim<K: Ord>(
        &mut self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
        eligible: impl Fn(&WorkflowExecution) -> bool,
        order_key: impl Fn(&WorkflowExecution) -> K,
    ) -> Vec<WorkflowExecution> {
        let mut candidates: Vec<&mut StoredExecution> = self
            .executions
            .values_mut()
            .filter(|stored| stored.claimable(now) && eligible(&stored.execution))
            .collect();
        candidates.sort_by_key(|stored| order_key(&stored.execution));

        candidates
            .into_iter()
            .take(limit)
            .map(|stored| {
                stored.claimed_until = Some(now + lease);
                stored.execution.version += 1;
                stored.execution.clone()
            })
            .collect()
    }
}

/// Workflow and execution store backed by in-process maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        if inner.workflows.contains_key(&workflow.id) {
            return Err(Report::new(StoreError::AlreadyExists {
                id: workflow.id.to_string(),
            }));
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .workflows
            .get_mut(&workflow.id)
            .ok_or(StoreError::WorkflowNotFound { id: workflow.id })?;
        let mut updated = workflow.clone();
        updated.last_triggered_at = stored.last_triggered_at;
        updated.execution_count = stored.execution_count;
        *stored = updated;
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, Report<StoreError>> {
        let inner = self.inner.lock().await;
        inner
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| Report::new(StoreError::WorkflowNotFound { id }))
    }

    async fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, Report<StoreError>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .workflows
            .values()
            .filter(|w| w.status() == WorkflowStatus::Active && w.trigger_type() == trigger_type)
            .cloned()
            .collect())
    }

    async fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .workflows
            .values()
            .filter(|w| w.organization_id == organization_id)
            .map(Workflow::summary)
            .collect())
    }

    async fn record_firing(
        &self,
        expected: Option<DateTime<Utc>>,
        execution: &WorkflowExecution,
    ) -> Result<bool, Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        let id = execution.workflow_id;
        let workflow = inner
            .workflows
            .get(&id)
            .ok_or(StoreError::WorkflowNotFound { id })?;
        if workflow.last_triggered_at != expected {
            return Ok(false);
        }

        inner.insert_execution(execution)?;
        if let Some(workflow) = inner.workflows.get_mut(&id) {
            workflow.record_firing(execution.created_at);
        }
        Ok(true)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), Report<StoreError>> {
        self.inner.lock().await.insert_execution(execution)
    }

    async fn get_execution(
        &self,
        id: WorkflowExecutionId,
    ) -> Result<WorkflowExecution, Report<StoreError>> {
        let inner = self.inner.lock().await;
        inner
            .executions
            .get(&id)
            .map(|stored| stored.execution.clone())
            .ok_or_else(|| Report::new(StoreError::ExecutionNotFound { id }))
    }

    async fn update_execution(
        &self,
        execution: &mut WorkflowExecution,
    ) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .executions
            .get_mut(&execution.id)
            .ok_or(StoreError::ExecutionNotFound { id: execution.id })?;
        if stored.execution.version != execution.version {
            return Err(Report::new(StoreError::VersionConflict {
                execution_id: execution.id,
                expected: execution.version,
            }));
        }
        execution.version += 1;
        stored.execution = execution.clone();
        stored.claimed_until = None;
        Ok(())
    }

    async fn count_created_since(
        &self,
        workflow_id: WorkflowId,
        since: DateTime<Utc>,
    ) -> Result<u32, Report<StoreError>> {
        let inner = self.inner.lock().await;
        let count = inner
            .executions
            .values()
            .filter(|s| s.execution.workflow_id == workflow_id && s.execution.created_at >= since)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.claim(
            now,
            lease,
            limit,
            |execution| execution.status == ExecutionStatus::Pending,
            |execution| (execution.created_at, execution.id),
        ))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.claim(
            now,
            lease,
            limit,
            |execution| {
                execution.status == ExecutionStatus::Waiting
                    && execution.resume_at.is_some_and(|at| at <= now)
            },
            |execution| (execution.resume_at, execution.id),
        ))
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .executions
            .values()
            .map(|stored| &stored.execution)
            .filter(|e| e.workflow_id == workflow_id && statuses.contains(&e.status))
            .cloned()
            .collect())
    }
}
