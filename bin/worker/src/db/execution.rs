//! Execution storage.

use super::{PgStore, backend, corrupt, from_json, to_json};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rootcause::Report;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgExecutor};
use std::str::FromStr;
use waypoint_core::{OrganizationId, WorkflowExecutionId, WorkflowId};
use waypoint_scheduler::{ExecutionStore, StoreError};
use waypoint_workflow::{ExecutionStatus, NodeId, WorkflowExecution};

const CLAIM_PENDING: &str = r#"
    UPDATE workflow_executions
    SET claimed_until = $2, version = version + 1
    WHERE id IN (
        SELECT id FROM workflow_executions
        WHERE status = 'pending'
          AND (claimed_until IS NULL OR claimed_until <= $1)
        ORDER BY created_at ASC, id ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, workflow_id, organization_id, trigger_data, status, current_node_id,
              node_results, context, pending_nodes, resume_at, resume_data, error_message,
              created_at, started_at, completed_at, version
"#;

const CLAIM_DUE: &str = r#"
    UPDATE workflow_executions
    SET claimed_until = $2, version = version + 1
    WHERE id IN (
        SELECT id FROM workflow_executions
        WHERE status = 'waiting' AND resume_at <= $1
          AND (claimed_until IS NULL OR claimed_until <= $1)
        ORDER BY resume_at ASC, id ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, workflow_id, organization_id, trigger_data, status, current_node_id,
              node_results, context, pending_nodes, resume_at, resume_data, error_message,
              created_at, started_at, completed_at, version
"#;

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    organization_id: String,
    trigger_data: JsonValue,
    status: String,
    current_node_id: Option<String>,
    node_results: JsonValue,
    context: JsonValue,
    pending_nodes: JsonValue,
    resume_at: Option<DateTime<Utc>>,
    resume_data: Option<JsonValue>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<WorkflowExecution, StoreError> {
        let id = WorkflowExecutionId::from_str(&self.id).map_err(|e| corrupt(&self.id, e))?;
        let workflow_id =
            WorkflowId::from_str(&self.workflow_id).map_err(|e| corrupt(&self.id, e))?;
        let organization_id =
            OrganizationId::from_str(&self.organization_id).map_err(|e| corrupt(&self.id, e))?;
        let status = ExecutionStatus::from_str(&self.status).map_err(|e| corrupt(&self.id, e))?;
        let resume_data = self
            .resume_data
            .map(|data| from_json(&self.id, data))
            .transpose()?;

        Ok(WorkflowExecution {
            id,
            workflow_id,
            organization_id,
            trigger_data: self.trigger_data,
            status,
            current_node_id: self.current_node_id.map(NodeId::new),
            node_results: from_json(&self.id, self.node_results)?,
            context: from_json(&self.id, self.context)?,
            pending_nodes: from_json(&self.id, self.pending_nodes)?,
            resume_at: self.resume_at,
            resume_data,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }
}

/// JSON columns of an execution, encoded for binding.
struct ExecutionDocuments {
    node_results: JsonValue,
    context: JsonValue,
    pending_nodes: JsonValue,
    resume_data: Option<JsonValue>,
}

impl ExecutionDocuments {
    fn encode(execution: &WorkflowExecution) -> Result<Self, StoreError> {
        let id = execution.id.to_string();
        Ok(Self {
            node_results: to_json(&id, &execution.node_results)?,
            context: to_json(&id, &execution.context)?,
            pending_nodes: to_json(&id, &execution.pending_nodes)?,
            resume_data: execution
                .resume_data
                .as_ref()
                .map(|data| to_json(&id, data))
                .transpose()?,
        })
    }
}

fn pending_order(execution: &WorkflowExecution) -> (DateTime<Utc>, WorkflowExecutionId) {
    (execution.created_at, execution.id)
}

fn due_order(execution: &WorkflowExecution) -> (Option<DateTime<Utc>>, WorkflowExecutionId) {
    (execution.resume_at, execution.id)
}

fn into_executions(rows: Vec<ExecutionRow>) -> Result<Vec<WorkflowExecution>, StoreError> {
    rows.into_iter().map(ExecutionRow::try_into_execution).collect()
}

/// Inserts a new execution through any executor, so firings can share a
/// transaction with the workflow's counters.
pub(super) async fn insert_execution<'e>(
    executor: impl PgExecutor<'e>,
    execution: &WorkflowExecution,
) -> Result<(), Report<StoreError>> {
    let documents = ExecutionDocuments::encode(execution)?;

    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, organization_id, trigger_data, status, current_node_id,
             node_results, context, pending_nodes, resume_at, resume_data, error_message,
             created_at, started_at, completed_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(execution.id.to_string())
    .bind(execution.workflow_id.to_string())
    .bind(execution.organization_id.to_string())
    .bind(&execution.trigger_data)
    .bind(execution.status.as_str())
    .bind(execution.current_node_id.as_ref().map(NodeId::as_str))
    .bind(documents.node_results)
    .bind(documents.context)
    .bind(documents.pending_nodes)
    .bind(execution.resume_at)
    .bind(documents.resume_data)
    .bind(&execution.error_message)
    .bind(execution.created_at)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(execution.version)
    .execute(executor)
    .await
    .map_err(|e| {
        if e.as_database_error()
            .is_some_and(|db| db.is_unique_violation())
        {
            StoreError::AlreadyExists {
                id: execution.id.to_string(),
            }
        } else {
            backend(e)
        }
    })?;

    Ok(())
}

impl PgStore {
    async fn claim<K: Ord>(
        &self,
        query: &'static str,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
        order_key: impl Fn(&WorkflowExecution) -> K,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(query)
            .bind(now)
            .bind(now + lease)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        // RETURNING does not preserve the subquery's order.
        let mut executions = into_executions(rows)?;
        executions.sort_by_key(order_key);
        Ok(executions)
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), Report<StoreError>> {
        insert_execution(&self.pool, execution).await
    }

    async fn get_execution(
        &self,
        id: WorkflowExecutionId,
    ) -> Result<WorkflowExecution, Report<StoreError>> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, organization_id, trigger_data, status, current_node_id,
                   node_results, context, pending_nodes, resume_at, resume_data, error_message,
                   created_at, started_at, completed_at, version
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(r) => Ok(r.try_into_execution()?),
            None => Err(Report::new(StoreError::ExecutionNotFound { id })),
        }
    }

    async fn update_execution(
        &self,
        execution: &mut WorkflowExecution,
    ) -> Result<(), Report<StoreError>> {
        let documents = ExecutionDocuments::encode(execution)?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $3, current_node_id = $4, node_results = $5, context = $6,
                pending_nodes = $7, resume_at = $8, resume_data = $9, error_message = $10,
                started_at = $11, completed_at = $12,
                version = version + 1, claimed_until = NULL
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.version)
        .bind(execution.status.as_str())
        .bind(execution.current_node_id.as_ref().map(NodeId::as_str))
        .bind(documents.node_results)
        .bind(documents.context)
        .bind(documents.pending_nodes)
        .bind(execution.resume_at)
        .bind(documents.resume_data)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(Report::new(StoreError::VersionConflict {
                execution_id: execution.id,
                expected: execution.version,
            }));
        }
        execution.version += 1;
        Ok(())
    }

    async fn count_created_since(
        &self,
        workflow_id: WorkflowId,
        since: DateTime<Utc>,
    ) -> Result<u32, Report<StoreError>> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM workflow_executions
            WHERE workflow_id = $1 AND created_at >= $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        self.claim(CLAIM_PENDING, now, lease, limit, pending_order)
            .await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        self.claim(CLAIM_DUE, now, lease, limit, due_order).await
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, organization_id, trigger_data, status, current_node_id,
                   node_results, context, pending_nodes, resume_at, resume_data, error_message,
                   created_at, started_at, completed_at, version
            FROM workflow_executions
            WHERE workflow_id = $1 AND status = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(into_executions(rows)?)
    }
}
