//! Workflow execution state machine.
//!
//! A [`WorkflowExecution`] is one run of a workflow against a trigger event.
//! It persists everything needed to continue on any worker: the node results
//! ledger, the shared context, the traversal frontier and, while waiting,
//! the resume point.
//!
//! ```text
//! pending ──► running ──► completed | failed | cancelled
//!    │          ▲  │
//!    │          │  ▼
//!    │         waiting
//!    └──► cancelled
//! ```

use crate::error::{ExecutionError, ParseStatusError};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;
use waypoint_core::{OrganizationId, WorkflowExecutionId, WorkflowId};

/// The overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created by the trigger evaluator, not yet picked up.
    Pending,
    /// Being advanced by a worker.
    Running,
    /// Suspended on a delay node until `resume_at`.
    Waiting,
    /// Reached the end of every branch without error.
    Completed,
    /// A node failed.
    Failed,
    /// Stopped by a supervisory request.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Waiting | Self::Completed | Self::Failed | Self::Cancelled
                )
                | (Self::Waiting, Self::Running)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseStatusError {
                kind: "execution",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of a single node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResultStatus {
    Success,
    Failed,
    Skipped,
}

/// Ledger entry for a node visited by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The visited node.
    pub node_id: NodeId,
    pub status: NodeResultStatus,
    /// Executor output, `null` when there is none.
    #[serde(default)]
    pub output: JsonValue,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeResult {
    #[must_use]
    pub fn success(node_id: NodeId, output: JsonValue, executed_at: DateTime<Utc>) -> Self {
        Self {
            node_id,
            status: NodeResultStatus::Success,
            output,
            executed_at,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(node_id: NodeId, error: impl Into<String>, executed_at: DateTime<Utc>) -> Self {
        Self {
            node_id,
            status: NodeResultStatus::Failed,
            output: JsonValue::Null,
            executed_at,
            error: Some(error.into()),
        }
    }

    /// A node the executor chose not to run. The reason is kept as output.
    #[must_use]
    pub fn skipped(node_id: NodeId, reason: impl Into<String>, executed_at: DateTime<Utc>) -> Self {
        Self {
            node_id,
            status: NodeResultStatus::Skipped,
            output: json!({ "reason": reason.into() }),
            executed_at,
            error: None,
        }
    }
}

/// Where a suspended execution picks up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    /// The delay node the execution is waiting on. Its result is recorded on
    /// resumption.
    pub delay_node_id: NodeId,
    /// Successors of the delay node, in edge order.
    pub next_nodes: Vec<NodeId>,
    /// When the execution was suspended.
    pub suspended_at: DateTime<Utc>,
}

/// A record of a single workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: WorkflowExecutionId,
    pub workflow_id: WorkflowId,
    pub organization_id: OrganizationId,
    /// Payload of the event that fired the workflow.
    pub trigger_data: JsonValue,
    pub status: ExecutionStatus,
    /// The node being evaluated, or last evaluated.
    pub current_node_id: Option<NodeId>,
    /// One entry per visited node, in visit order.
    pub node_results: Vec<NodeResult>,
    /// Data shared between nodes.
    pub context: Map<String, JsonValue>,
    /// Traversal frontier. The last element is visited next.
    pub pending_nodes: Vec<NodeId>,
    pub resume_at: Option<DateTime<Utc>>,
    pub resume_data: Option<ResumeData>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by stores on every save.
    pub version: i64,
}

impl WorkflowExecution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        organization_id: OrganizationId,
        trigger_data: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowExecutionId::new(),
            workflow_id,
            organization_id,
            trigger_data,
            status: ExecutionStatus::Pending,
            current_node_id: None,
            node_results: Vec::new(),
            context: Map::new(),
            pending_nodes: Vec::new(),
            resume_at: None,
            resume_data: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), Report<ExecutionError>> {
        if !self.status.can_transition_to(to) {
            return Err(Report::new(ExecutionError::InvalidTransition {
                from: self.status,
                to,
            }));
        }
        self.status = to;
        Ok(())
    }

    /// Moves `pending -> running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), Report<ExecutionError>> {
        if self.status != ExecutionStatus::Pending {
            return Err(Report::new(ExecutionError::InvalidTransition {
                from: self.status,
                to: ExecutionStatus::Running,
            }));
        }
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Moves `running -> waiting` on a delay node.
    pub fn suspend(
        &mut self,
        resume_at: DateTime<Utc>,
        resume_data: ResumeData,
    ) -> Result<(), Report<ExecutionError>> {
        self.transition(ExecutionStatus::Waiting)?;
        self.current_node_id = Some(resume_data.delay_node_id.clone());
        self.resume_at = Some(resume_at);
        self.resume_data = Some(resume_data);
        Ok(())
    }

    /// Moves `waiting -> running` and hands back the resume point.
    ///
    /// Refused before `resume_at`.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<ResumeData, Report<ExecutionError>> {
        if self.status != ExecutionStatus::Waiting {
            return Err(Report::new(ExecutionError::InvalidTransition {
                from: self.status,
                to: ExecutionStatus::Running,
            }));
        }
        if let Some(resume_at) = self.resume_at
            && now < resume_at
        {
            return Err(Report::new(ExecutionError::NotDue { resume_at }));
        }
        let resume_data = self
            .resume_data
            .take()
            .ok_or_else(|| Report::new(ExecutionError::MissingResumeData))?;
        self.transition(ExecutionStatus::Running)?;
        self.resume_at = None;
        Ok(resume_data)
    }

    /// Moves `running -> completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), Report<ExecutionError>> {
        self.transition(ExecutionStatus::Completed)?;
        self.pending_nodes.clear();
        self.completed_at = Some(now);
        Ok(())
    }

    /// Moves `running -> failed`.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), Report<ExecutionError>> {
        self.transition(ExecutionStatus::Failed)?;
        self.pending_nodes.clear();
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Moves `pending | running -> cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), Report<ExecutionError>> {
        self.transition(ExecutionStatus::Cancelled)?;
        self.pending_nodes.clear();
        self.completed_at = Some(now);
        Ok(())
    }

    /// Appends a node result to the ledger.
    ///
    /// Each node is recorded at most once per execution.
    pub fn record_result(&mut self, result: NodeResult) -> Result<(), Report<ExecutionError>> {
        if self.has_result(&result.node_id) {
            return Err(Report::new(ExecutionError::NodeAlreadyRecorded {
                node_id: result.node_id,
            }));
        }
        self.current_node_id = Some(result.node_id.clone());
        self.node_results.push(result);
        Ok(())
    }

    #[must_use]
    pub fn has_result(&self, node_id: &NodeId) -> bool {
        self.node_results.iter().any(|r| &r.node_id == node_id)
    }

    #[must_use]
    pub fn node_result(&self, node_id: &NodeId) -> Option<&NodeResult> {
        self.node_results.iter().find(|r| &r.node_id == node_id)
    }

    /// Node ids in the order they were visited.
    pub fn visited(&self) -> impl Iterator<Item = &NodeId> {
        self.node_results.iter().map(|r| &r.node_id)
    }

    /// Merges executor-provided values into the shared context.
    pub fn merge_context(&mut self, values: Map<String, JsonValue>) {
        self.context.extend(values);
    }

    /// The data visible to conditions and templates: `{trigger, context}`.
    #[must_use]
    pub fn scope(&self) -> JsonValue {
        json!({
            "trigger": self.trigger_data,
            "context": self.context,
        })
    }

    /// Returns the run duration, once started and finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}
