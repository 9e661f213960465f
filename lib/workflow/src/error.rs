//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ValidationError`: Structural problems found by the graph validator
//! - `PolicyError`: Rejected execution settings
//! - `ExecutionError`: Illegal moves of the execution state machine
//! - `NodeExecutionError`: Failures reported by node executors
//! - `EngineError`: Traversal failures (wraps lower errors via context)
//! - `WorkflowError`: Workflow lifecycle and editing failures

use crate::definition::WorkflowStatus;
use crate::edge::EdgeId;
use crate::execution::ExecutionStatus;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use std::fmt;
use waypoint_core::{WorkflowExecutionId, WorkflowId};

/// Which end of an edge a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    Source,
    Target,
}

impl fmt::Display for EdgeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// A structural problem in a workflow graph.
///
/// The validator collects every problem it finds instead of stopping at the
/// first one, so authors can fix them all in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No node has type `trigger`.
    MissingTrigger,
    /// More than one node has type `trigger`.
    MultipleTriggers { node_ids: Vec<NodeId> },
    /// A trigger node is the target of an edge.
    TriggerHasIncomingEdge { node_id: NodeId },
    /// A non-trigger node has no incoming edge.
    UnreachableNode { node_id: NodeId },
    /// The graph contains a cycle through this node.
    CycleDetected { node_id: NodeId },
    /// An edge refers to a node that does not exist.
    DanglingEdge {
        edge_id: EdgeId,
        end: EdgeEnd,
        node_id: NodeId,
    },
    /// Two nodes share an id.
    DuplicateNodeId { node_id: NodeId },
    /// Two edges share an id.
    DuplicateEdgeId { edge_id: EdgeId },
    /// An edge leaves a node through a handle that node does not expose.
    UnknownHandle {
        edge_id: EdgeId,
        node_id: NodeId,
        handle: Option<String>,
    },
    /// A delay node waits for zero minutes.
    ZeroDelay { node_id: NodeId },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrigger => write!(f, "workflow has no trigger node"),
            Self::MultipleTriggers { node_ids } => {
                let ids: Vec<&str> = node_ids.iter().map(NodeId::as_str).collect();
                write!(
                    f,
                    "workflow has more than one trigger node: {}",
                    ids.join(", ")
                )
            }
            Self::TriggerHasIncomingEdge { node_id } => {
                write!(f, "trigger node '{node_id}' must not have incoming edges")
            }
            Self::UnreachableNode { node_id } => {
                write!(f, "node '{node_id}' is unreachable: it has no incoming edge")
            }
            Self::CycleDetected { node_id } => {
                write!(f, "graph contains a cycle through node '{node_id}'")
            }
            Self::DanglingEdge {
                edge_id,
                end,
                node_id,
            } => {
                write!(f, "edge '{edge_id}' {end} refers to missing node '{node_id}'")
            }
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id '{node_id}'"),
            Self::DuplicateEdgeId { edge_id } => write!(f, "duplicate edge id '{edge_id}'"),
            Self::UnknownHandle {
                edge_id,
                node_id,
                handle: Some(handle),
            } => write!(
                f,
                "edge '{edge_id}' leaves node '{node_id}' through unknown handle '{handle}'"
            ),
            Self::UnknownHandle {
                edge_id, node_id, ..
            } => write!(
                f,
                "edge '{edge_id}' leaves branching node '{node_id}' without a handle"
            ),
            Self::ZeroDelay { node_id } => {
                write!(f, "delay node '{node_id}' must wait at least one minute")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A stored status string did not name a known status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    /// The status type being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} status: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseStatusError {}

/// Rejected execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The timezone is neither `UTC` nor a known IANA name.
    InvalidTimezone { timezone: String },
    /// A daily cap of zero would never allow firing.
    ZeroDailyCap,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
            Self::ZeroDailyCap => write!(f, "max executions per day must be at least 1"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Illegal operations on a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The state machine does not allow this transition.
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// A waiting execution was resumed before its resume time.
    NotDue { resume_at: DateTime<Utc> },
    /// A waiting execution has no resume data.
    MissingResumeData,
    /// A node already has a result in this execution.
    NodeAlreadyRecorded { node_id: NodeId },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid execution transition from {from} to {to}")
            }
            Self::NotDue { resume_at } => {
                write!(f, "execution is not due to resume until {resume_at}")
            }
            Self::MissingResumeData => write!(f, "waiting execution has no resume data"),
            Self::NodeAlreadyRecorded { node_id } => {
                write!(f, "node '{node_id}' already has a result")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Failures reported by node executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExecutionError {
    /// The node's configuration cannot be executed.
    InvalidConfig { message: String },
    /// Execution failed.
    Failed { message: String },
    /// A collaborator service failed.
    ExternalService { service: String, message: String },
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { message } => write!(f, "invalid node configuration: {message}"),
            Self::Failed { message } => write!(f, "{message}"),
            Self::ExternalService { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
        }
    }
}

impl std::error::Error for NodeExecutionError {}

/// Errors that stop the engine from advancing an execution.
///
/// Node failures are not engine errors: they are recorded on the execution,
/// which then ends `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The execution belongs to a different workflow.
    WorkflowMismatch {
        execution_id: WorkflowExecutionId,
        workflow_id: WorkflowId,
    },
    /// The execution is not in a state the operation can advance.
    NotRunnable {
        execution_id: WorkflowExecutionId,
        status: ExecutionStatus,
    },
    /// State machine failure (use as context wrapper).
    StateMachine { execution_id: WorkflowExecutionId },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowMismatch {
                execution_id,
                workflow_id,
            } => write!(
                f,
                "execution {execution_id} does not belong to workflow {workflow_id}"
            ),
            Self::NotRunnable {
                execution_id,
                status,
            } => write!(f, "execution {execution_id} cannot advance while {status}"),
            Self::StateMachine { execution_id } => {
                write!(f, "state machine error in execution {execution_id}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// High-level workflow errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The lifecycle does not allow this status change.
    InvalidStatusTransition {
        workflow_id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    /// The graph failed validation.
    InvalidGraph {
        workflow_id: WorkflowId,
        errors: Vec<ValidationError>,
    },
    /// Archived workflows cannot be edited.
    Archived { workflow_id: WorkflowId },
    /// Execution settings were rejected.
    Settings {
        workflow_id: WorkflowId,
        error: PolicyError,
    },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatusTransition {
                workflow_id,
                from,
                to,
            } => write!(
                f,
                "workflow {workflow_id} cannot move from {from} to {to}"
            ),
            Self::InvalidGraph {
                workflow_id,
                errors,
            } => {
                write!(f, "workflow {workflow_id} graph is invalid")?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
            Self::Archived { workflow_id } => {
                write!(f, "workflow {workflow_id} is archived")
            }
            Self::Settings { workflow_id, error } => {
                write!(f, "invalid execution settings for workflow {workflow_id}: {error}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}
