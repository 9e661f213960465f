//! Workflow definition types.
//!
//! A workflow is an automation owned by an organization. It consists of:
//! - Metadata (name, description, mode, timestamps)
//! - A trigger configuration saying which events fire it
//! - A directed graph of nodes
//! - Execution settings (cooldown, daily cap, active hours)
//! - A lifecycle status with an append-only audit log

use crate::error::{ParseStatusError, ValidationError, WorkflowError};
use crate::graph::WorkflowGraph;
use crate::policy::{ExecutionSettings, FiringDecision, check_firing};
use crate::trigger::{TriggerConfig, TriggerType};
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use waypoint_core::{AuditEntryId, OrganizationId, WorkflowId};

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Being edited. Never fires.
    Draft,
    /// Eligible to fire.
    Active,
    /// Temporarily suppressed.
    Paused,
    /// Soft-deleted. Never fires; can be restored to draft.
    Archived,
}

impl WorkflowStatus {
    /// Returns true if the lifecycle allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft | Self::Paused, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Draft | Self::Active | Self::Paused, Self::Archived)
                | (Self::Archived, Self::Draft)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(ParseStatusError {
                kind: "workflow",
                value: other.to_string(),
            }),
        }
    }
}

/// How the workflow was authored. Has no effect on execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Built with the step-by-step wizard.
    #[default]
    Simple,
    /// Built in the graph editor.
    Advanced,
}

impl WorkflowMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Advanced => "advanced",
        }
    }
}

impl FromStr for WorkflowMode {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "advanced" => Ok(Self::Advanced),
            other => Err(ParseStatusError {
                kind: "workflow mode",
                value: other.to_string(),
            }),
        }
    }
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Activated,
    Paused,
    Archived,
    Restored,
    GraphReplaced,
    SettingsUpdated,
    TriggerUpdated,
}

/// An immutable entry in a workflow's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub action: AuditAction,
    /// Status before the change.
    pub from: WorkflowStatus,
    /// Status after the change. Equal to `from` for edits.
    pub to: WorkflowStatus,
    pub at: DateTime<Utc>,
}

/// Stored form of a workflow, for rebuilding one from persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParts {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub mode: WorkflowMode,
    pub trigger: TriggerConfig,
    pub graph: WorkflowGraph,
    pub settings: ExecutionSettings,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub audit_log: Vec<AuditEntry>,
}

/// A complete workflow definition.
///
/// Status, graph, trigger and settings change only through methods that
/// enforce the lifecycle and append to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WorkflowParts", into = "WorkflowParts")]
pub struct Workflow {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub mode: WorkflowMode,
    status: WorkflowStatus,
    trigger: TriggerConfig,
    graph: WorkflowGraph,
    settings: ExecutionSettings,
    /// When the workflow last fired.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// How many times the workflow has fired.
    pub execution_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    audit_log: Vec<AuditEntry>,
}

impl From<WorkflowParts> for Workflow {
    fn from(parts: WorkflowParts) -> Self {
        Self {
            id: parts.id,
            organization_id: parts.organization_id,
            name: parts.name,
            description: parts.description,
            mode: parts.mode,
            status: parts.status,
            trigger: parts.trigger,
            graph: parts.graph,
            settings: parts.settings,
            last_triggered_at: parts.last_triggered_at,
            execution_count: parts.execution_count,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            audit_log: parts.audit_log,
        }
    }
}

impl From<Workflow> for WorkflowParts {
    fn from(workflow: Workflow) -> Self {
        Self {
            id: workflow.id,
            organization_id: workflow.organization_id,
            name: workflow.name,
            description: workflow.description,
            status: workflow.status,
            mode: workflow.mode,
            trigger: workflow.trigger,
            graph: workflow.graph,
            settings: workflow.settings,
            last_triggered_at: workflow.last_triggered_at,
            execution_count: workflow.execution_count,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            audit_log: workflow.audit_log,
        }
    }
}

impl Workflow {
    /// Creates a draft workflow with an empty graph.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        trigger: TriggerConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut workflow = Self {
            id: WorkflowId::new(),
            organization_id,
            name: name.into(),
            description: None,
            mode: WorkflowMode::default(),
            status: WorkflowStatus::Draft,
            trigger,
            graph: WorkflowGraph::new(),
            settings: ExecutionSettings::default(),
            last_triggered_at: None,
            execution_count: 0,
            created_at: now,
            updated_at: now,
            audit_log: Vec::new(),
        };
        workflow.audit(AuditAction::Created, WorkflowStatus::Draft, now);
        workflow
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the authoring mode.
    #[must_use]
    pub fn with_mode(mut self, mode: WorkflowMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the initial graph of a new draft.
    ///
    /// Workflows past the draft stage keep their graph; change it with
    /// [`Workflow::replace_graph`], which validates it.
    #[must_use]
    pub fn with_graph(mut self, graph: WorkflowGraph) -> Self {
        if self.status == WorkflowStatus::Draft {
            self.graph = graph;
        } else {
            warn!(
                workflow_id = %self.id,
                status = %self.status,
                "ignoring graph for non-draft workflow"
            );
        }
        self
    }

    #[must_use]
    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    #[must_use]
    pub fn trigger(&self) -> &TriggerConfig {
        &self.trigger
    }

    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type()
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// The audit log, oldest first.
    #[must_use]
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    /// Validates the graph.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        self.graph.validate()
    }

    /// Moves to `active`, if the graph is valid.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), Report<WorkflowError>> {
        self.ensure_transition(WorkflowStatus::Active)?;
        let errors = self.graph.validate();
        if !errors.is_empty() {
            return Err(Report::new(WorkflowError::InvalidGraph {
                workflow_id: self.id,
                errors,
            }));
        }
        self.audit(AuditAction::Activated, WorkflowStatus::Active, now);
        Ok(())
    }

    /// Moves `active -> paused`.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), Report<WorkflowError>> {
        self.ensure_transition(WorkflowStatus::Paused)?;
        self.audit(AuditAction::Paused, WorkflowStatus::Paused, now);
        Ok(())
    }

    /// Soft-deletes the workflow.
    ///
    /// Executions already in flight are not affected; cancelling them is the
    /// caller's job.
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<(), Report<WorkflowError>> {
        self.ensure_transition(WorkflowStatus::Archived)?;
        self.audit(AuditAction::Archived, WorkflowStatus::Archived, now);
        Ok(())
    }

    /// Brings an archived workflow back as a draft.
    pub fn restore(&mut self, now: DateTime<Utc>) -> Result<(), Report<WorkflowError>> {
        self.ensure_transition(WorkflowStatus::Draft)?;
        self.audit(AuditAction::Restored, WorkflowStatus::Draft, now);
        Ok(())
    }

    /// Replaces the graph.
    ///
    /// Active workflows only accept valid graphs. Drafts and paused
    /// workflows accept anything; validation happens on activation.
    pub fn replace_graph(
        &mut self,
        graph: WorkflowGraph,
        now: DateTime<Utc>,
    ) -> Result<(), Report<WorkflowError>> {
        self.ensure_editable()?;
        if self.status == WorkflowStatus::Active {
            let errors = graph.validate();
            if !errors.is_empty() {
                return Err(Report::new(WorkflowError::InvalidGraph {
                    workflow_id: self.id,
                    errors,
                }));
            }
        }
        self.graph = graph;
        self.audit(AuditAction::GraphReplaced, self.status, now);
        Ok(())
    }

    /// Replaces the execution settings.
    pub fn update_settings(
        &mut self,
        settings: ExecutionSettings,
        now: DateTime<Utc>,
    ) -> Result<(), Report<WorkflowError>> {
        self.ensure_editable()?;
        if let Some(error) = settings.problem() {
            return Err(Report::new(WorkflowError::Settings {
                workflow_id: self.id,
                error,
            }));
        }
        self.settings = settings;
        self.audit(AuditAction::SettingsUpdated, self.status, now);
        Ok(())
    }

    /// Replaces the trigger configuration.
    pub fn update_trigger(
        &mut self,
        trigger: TriggerConfig,
        now: DateTime<Utc>,
    ) -> Result<(), Report<WorkflowError>> {
        self.ensure_editable()?;
        self.trigger = trigger;
        self.audit(AuditAction::TriggerUpdated, self.status, now);
        Ok(())
    }

    /// Applies the firing policy.
    #[must_use]
    pub fn firing_decision(&self, executions_today: u32, now: DateTime<Utc>) -> FiringDecision {
        check_firing(
            self.status,
            &self.settings,
            self.last_triggered_at,
            executions_today,
            now,
        )
    }

    /// Updates the firing counters. Call once per created execution.
    pub fn record_firing(&mut self, now: DateTime<Utc>) {
        self.execution_count += 1;
        self.last_triggered_at = Some(now);
    }

    /// Returns a listing projection.
    #[must_use]
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary::from(self)
    }

    fn ensure_transition(&self, to: WorkflowStatus) -> Result<(), Report<WorkflowError>> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(Report::new(WorkflowError::InvalidStatusTransition {
                workflow_id: self.id,
                from: self.status,
                to,
            }))
        }
    }

    fn ensure_editable(&self) -> Result<(), Report<WorkflowError>> {
        if self.status == WorkflowStatus::Archived {
            return Err(Report::new(WorkflowError::Archived {
                workflow_id: self.id,
            }));
        }
        Ok(())
    }

    fn audit(&mut self, action: AuditAction, to: WorkflowStatus, now: DateTime<Utc>) {
        let from = self.status;
        self.status = to;
        self.audit_log.push(AuditEntry {
            id: AuditEntryId::new(),
            action,
            from,
            to,
            at: now,
        });
        self.updated_at = now;
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub mode: WorkflowMode,
    pub trigger_type: TriggerType,
    /// Number of nodes in the graph.
    pub node_count: usize,
    pub execution_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            status: workflow.status,
            mode: workflow.mode,
            trigger_type: workflow.trigger_type(),
            node_count: workflow.graph.node_count(),
            execution_count: workflow.execution_count,
            last_triggered_at: workflow.last_triggered_at,
            updated_at: workflow.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::node::{ActionKind, Node};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap()
    }

    fn valid_graph() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node(Node::trigger("t1"))
            .with_node(Node::action("a1", ActionKind::CreateAlert))
            .with_edge(Edge::new("t1", "a1"))
    }

    fn draft() -> Workflow {
        Workflow::new(
            OrganizationId::new(),
            "Low attendance alert",
            TriggerConfig::Manual,
            now(),
        )
        .with_graph(valid_graph())
    }

    fn actions(workflow: &Workflow) -> Vec<AuditAction> {
        workflow.audit_log().iter().map(|e| e.action).collect()
    }

    #[test]
    fn new_workflow_is_audited_draft() {
        let workflow = draft();
        assert_eq!(workflow.status(), WorkflowStatus::Draft);
        assert_eq!(actions(&workflow), vec![AuditAction::Created]);
        assert_eq!(workflow.execution_count, 0);
    }

    #[test]
    fn full_lifecycle() {
        let mut workflow = draft();
        workflow.activate(now()).unwrap();
        workflow.pause(now()).unwrap();
        workflow.activate(now()).unwrap();
        workflow.archive(now()).unwrap();
        workflow.restore(now()).unwrap();

        assert_eq!(workflow.status(), WorkflowStatus::Draft);
        assert_eq!(
            actions(&workflow),
            vec![
                AuditAction::Created,
                AuditAction::Activated,
                AuditAction::Paused,
                AuditAction::Activated,
                AuditAction::Archived,
                AuditAction::Restored,
            ]
        );
        let archived = &workflow.audit_log()[4];
        assert_eq!((archived.from, archived.to), (WorkflowStatus::Active, WorkflowStatus::Archived));
    }

    #[test]
    fn invalid_graph_blocks_activation() {
        let mut workflow = draft().with_graph(
            WorkflowGraph::new()
                .with_node(Node::action("n1", ActionKind::CreateAlert))
                .with_node(Node::action("n2", ActionKind::CreateAlert))
                .with_edge(Edge::new("n1", "n2"))
                .with_edge(Edge::new("n2", "n1")),
        );

        let err = workflow.activate(now()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("graph is invalid"));
        assert!(message.contains("no trigger node"));
        assert_eq!(workflow.status(), WorkflowStatus::Draft);
        assert_eq!(workflow.audit_log().len(), 1);
    }

    #[test]
    fn with_graph_leaves_active_workflows_alone() {
        let mut workflow = draft();
        workflow.activate(now()).unwrap();

        let workflow = workflow.with_graph(WorkflowGraph::new());
        assert_eq!(workflow.graph(), &valid_graph());
        assert!(workflow.graph().validate().is_empty());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut workflow = draft();
        assert!(workflow.pause(now()).is_err());
        assert!(workflow.restore(now()).is_err());

        workflow.archive(now()).unwrap();
        let err = workflow.activate(now()).unwrap_err();
        assert!(err.to_string().contains("cannot move from archived to active"));
    }

    #[test]
    fn active_workflow_refuses_invalid_graph() {
        let mut workflow = draft();
        workflow.activate(now()).unwrap();

        let broken = valid_graph().with_node(Node::action("orphan", ActionKind::CreateAlert));
        assert!(workflow.replace_graph(broken.clone(), now()).is_err());
        assert_eq!(workflow.graph(), &valid_graph());

        workflow.pause(now()).unwrap();
        workflow.replace_graph(broken, now()).unwrap();
        assert_eq!(workflow.graph().node_count(), 3);
        assert!(workflow.activate(now()).is_err());
    }

    #[test]
    fn archived_workflow_refuses_edits() {
        let mut workflow = draft();
        workflow.archive(now()).unwrap();

        assert!(workflow.replace_graph(valid_graph(), now()).is_err());
        assert!(
            workflow
                .update_settings(ExecutionSettings::default(), now())
                .is_err()
        );
        let err = workflow
            .update_trigger(TriggerConfig::Manual, now())
            .unwrap_err();
        assert!(err.to_string().contains("is archived"));
    }

    #[test]
    fn settings_are_validated() {
        let mut workflow = draft();
        let err = workflow
            .update_settings(
                ExecutionSettings {
                    timezone: "Nowhere/City".to_string(),
                    ..ExecutionSettings::default()
                },
                now(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("invalid timezone: Nowhere/City"));

        let settings = ExecutionSettings {
            cooldown_minutes: 45,
            ..ExecutionSettings::default()
        };
        workflow.update_settings(settings.clone(), now()).unwrap();
        assert_eq!(workflow.settings(), &settings);
        assert_eq!(
            workflow.audit_log().last().map(|e| e.action),
            Some(AuditAction::SettingsUpdated)
        );
    }

    #[test]
    fn firing_updates_counters_and_cooldown() {
        let mut workflow = draft();
        workflow
            .update_settings(
                ExecutionSettings {
                    cooldown_minutes: 60,
                    ..ExecutionSettings::default()
                },
                now(),
            )
            .unwrap();
        workflow.activate(now()).unwrap();
        assert!(workflow.firing_decision(0, now()).is_fire());

        workflow.record_firing(now());
        assert_eq!(workflow.execution_count, 1);
        assert_eq!(workflow.last_triggered_at, Some(now()));
        assert!(!workflow.firing_decision(0, now() + Duration::minutes(30)).is_fire());
        assert!(workflow.firing_decision(0, now() + Duration::minutes(61)).is_fire());
    }

    #[test]
    fn summary_reflects_workflow() {
        let workflow = draft();
        let summary = workflow.summary();
        assert_eq!(summary.id, workflow.id);
        assert_eq!(summary.status, WorkflowStatus::Draft);
        assert_eq!(summary.trigger_type, TriggerType::Manual);
        assert_eq!(summary.node_count, 2);
    }

    #[test]
    fn serde_keeps_private_state() {
        let mut workflow = draft();
        workflow.activate(now()).unwrap();

        let json = serde_json::to_string(&workflow).expect("serialize");
        let parsed: Workflow = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed, workflow);
        assert_eq!(parsed.status(), WorkflowStatus::Active);
        assert_eq!(parsed.audit_log().len(), 2);
    }
}
