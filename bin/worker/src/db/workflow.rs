//! Workflow storage.

use super::execution::insert_execution;
use super::{PgStore, backend, corrupt, from_json, to_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::str::FromStr;
use waypoint_core::{OrganizationId, WorkflowId};
use waypoint_scheduler::{StoreError, WorkflowStore};
use waypoint_workflow::{
    TriggerType, Workflow, WorkflowExecution, WorkflowMode, WorkflowParts, WorkflowStatus,
    WorkflowSummary,
};

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    organization_id: String,
    name: String,
    description: Option<String>,
    status: String,
    mode: String,
    trigger: JsonValue,
    graph: JsonValue,
    settings: JsonValue,
    audit_log: JsonValue,
    last_triggered_at: Option<DateTime<Utc>>,
    execution_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, StoreError> {
        let id = WorkflowId::from_str(&self.id).map_err(|e| corrupt(&self.id, e))?;
        let organization_id =
            OrganizationId::from_str(&self.organization_id).map_err(|e| corrupt(&self.id, e))?;
        let status = WorkflowStatus::from_str(&self.status).map_err(|e| corrupt(&self.id, e))?;
        let mode = WorkflowMode::from_str(&self.mode).map_err(|e| corrupt(&self.id, e))?;
        let execution_count =
            u64::try_from(self.execution_count).map_err(|e| corrupt(&self.id, e))?;

        Ok(Workflow::from(WorkflowParts {
            id,
            organization_id,
            name: self.name,
            description: self.description,
            status,
            mode,
            trigger: from_json(&self.id, self.trigger)?,
            graph: from_json(&self.id, self.graph)?,
            settings: from_json(&self.id, self.settings)?,
            last_triggered_at: self.last_triggered_at,
            execution_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
            audit_log: from_json(&self.id, self.audit_log)?,
        }))
    }
}

/// JSON columns of a workflow, encoded for binding.
struct WorkflowDocuments {
    trigger: JsonValue,
    graph: JsonValue,
    settings: JsonValue,
    audit_log: JsonValue,
}

impl WorkflowDocuments {
    fn encode(workflow: &Workflow) -> Result<Self, StoreError> {
        let id = workflow.id.to_string();
        Ok(Self {
            trigger: to_json(&id, workflow.trigger())?,
            graph: to_json(&id, workflow.graph())?,
            settings: to_json(&id, workflow.settings())?,
            audit_log: to_json(&id, workflow.audit_log())?,
        })
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let documents = WorkflowDocuments::encode(workflow)?;
        let execution_count = i64::try_from(workflow.execution_count)
            .map_err(|e| corrupt(&workflow.id.to_string(), e))?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, organization_id, name, description, status, mode, trigger_type, trigger,
                 graph, settings, audit_log, last_triggered_at, execution_count,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.organization_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.status().as_str())
        .bind(workflow.mode.as_str())
        .bind(workflow.trigger_type().as_str())
        .bind(documents.trigger)
        .bind(documents.graph)
        .bind(documents.settings)
        .bind(documents.audit_log)
        .bind(workflow.last_triggered_at)
        .bind(execution_count)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StoreError::AlreadyExists {
                    id: workflow.id.to_string(),
                }
            } else {
                backend(e)
            }
        })?;

        Ok(())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let documents = WorkflowDocuments::encode(workflow)?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, status = $4, mode = $5, trigger_type = $6,
                trigger = $7, graph = $8, settings = $9, audit_log = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.status().as_str())
        .bind(workflow.mode.as_str())
        .bind(workflow.trigger_type().as_str())
        .bind(documents.trigger)
        .bind(documents.graph)
        .bind(documents.settings)
        .bind(documents.audit_log)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(Report::new(StoreError::WorkflowNotFound { id: workflow.id }));
        }
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, Report<StoreError>> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, organization_id, name, description, status, mode, trigger, graph,
                   settings, audit_log, last_triggered_at, execution_count, created_at,
                   updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(r) => Ok(r.try_into_workflow()?),
            None => Err(Report::new(StoreError::WorkflowNotFound { id })),
        }
    }

    async fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, Report<StoreError>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, organization_id, name, description, status, mode, trigger, graph,
                   settings, audit_log, last_triggered_at, execution_count, created_at,
                   updated_at
            FROM workflows
            WHERE status = 'active' AND trigger_type = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(trigger_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(WorkflowRow::try_into_workflow)
            .collect::<Result<_, _>>()?)
    }

    async fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, organization_id, name, description, status, mode, trigger, graph,
                   settings, audit_log, last_triggered_at, execution_count, created_at,
                   updated_at
            FROM workflows
            WHERE organization_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(row.try_into_workflow()?.summary());
        }
        Ok(summaries)
    }

    async fn record_firing(
        &self,
        expected: Option<DateTime<Utc>>,
        execution: &WorkflowExecution,
    ) -> Result<bool, Report<StoreError>> {
        let id = execution.workflow_id;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET last_triggered_at = $3, execution_count = execution_count + 1
            WHERE id = $1 AND last_triggered_at IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id.to_string())
        .bind(expected)
        .bind(execution.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(backend)?;
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM workflows WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend)?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(Report::new(StoreError::WorkflowNotFound { id })),
            };
        }

        // Dropping the transaction on error rolls the counters back.
        insert_execution(&mut *tx, execution).await?;
        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}
