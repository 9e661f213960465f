//! Trigger evaluator: decides whether a workflow fires and creates the
//! execution when it does.

use crate::error::SchedulerError;
use crate::store::{ExecutionStore, WorkflowStore};
use chrono::{DateTime, Utc};
use rootcause::Report;
use rootcause::prelude::ResultExt;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use waypoint_core::WorkflowId;
use waypoint_workflow::{FiringDecision, SuppressionReason, TriggerEvent, WorkflowExecution};

/// How many times a firing is retried after losing the compare-and-set.
const MAX_FIRING_ATTEMPTS: u32 = 5;

/// Result of offering an event to a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum FireResult {
    /// A pending execution was created.
    Fired(WorkflowExecution),
    /// The firing policy said no. Nothing was created.
    Suppressed(SuppressionReason),
}

impl FireResult {
    #[must_use]
    pub fn execution(&self) -> Option<&WorkflowExecution> {
        match self {
            Self::Fired(execution) => Some(execution),
            Self::Suppressed(_) => None,
        }
    }
}

/// Applies the firing policy and creates executions.
pub struct TriggerEvaluator<S> {
    store: Arc<S>,
}

impl<S: WorkflowStore + ExecutionStore> TriggerEvaluator<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fires one workflow with the given trigger payload, policy permitting.
    #[instrument(skip(self, payload), fields(%workflow_id))]
    pub async fn fire(
        &self,
        workflow_id: WorkflowId,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<FireResult, Report<SchedulerError>> {
        for _ in 0..MAX_FIRING_ATTEMPTS {
            let workflow = self
                .store
                .get_workflow(workflow_id)
                .await
                .context(SchedulerError::Firing { workflow_id })?;
            let since = workflow.settings().day_start(now);
            let executions_today = self
                .store
                .count_created_since(workflow_id, since)
                .await
                .context(SchedulerError::Firing { workflow_id })?;

            if let FiringDecision::Suppress(reason) = workflow.firing_decision(executions_today, now)
            {
                debug!(reason = reason.as_str(), %reason, "firing suppressed");
                return Ok(FireResult::Suppressed(reason));
            }

            let execution = WorkflowExecution::new(
                workflow.id,
                workflow.organization_id,
                payload.clone(),
                now,
            );
            let won = self
                .store
                .record_firing(workflow.last_triggered_at, &execution)
                .await
                .context(SchedulerError::Firing { workflow_id })?;
            if !won {
                debug!("lost firing race, re-checking policy");
                continue;
            }
            info!(execution_id = %execution.id, "workflow fired");
            return Ok(FireResult::Fired(execution));
        }

        Err(Report::new(SchedulerError::Contended {
            workflow_id,
            attempts: MAX_FIRING_ATTEMPTS,
        }))
    }

    /// Offers an event to every active workflow whose trigger matches it.
    ///
    /// A failure for one workflow is logged and does not stop the others.
    #[instrument(skip_all, fields(trigger_type = %event.trigger_type))]
    pub async fn dispatch(
        &self,
        event: &TriggerEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<(WorkflowId, FireResult)>, Report<SchedulerError>> {
        let candidates = self
            .store
            .list_active_by_trigger(event.trigger_type)
            .await
            .context(SchedulerError::Polling { queue: "trigger" })?;

        let mut results = Vec::new();
        for workflow in candidates
            .iter()
            .filter(|workflow| workflow.trigger().matches(event))
        {
            match self.fire(workflow.id, event.payload.clone(), now).await {
                Ok(result) => results.push((workflow.id, result)),
                Err(error) => warn!(workflow_id = %workflow.id, %error, "failed to fire workflow"),
            }
        }
        Ok(results)
    }
}
