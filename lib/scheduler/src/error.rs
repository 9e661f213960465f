//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors from workflow and execution storage
//! - `SchedulerError`: High-level wrapper for context

use std::fmt;
use waypoint_core::{WorkflowExecutionId, WorkflowId};

/// Errors from storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Workflow not found.
    WorkflowNotFound { id: WorkflowId },
    /// Execution not found.
    ExecutionNotFound { id: WorkflowExecutionId },
    /// A record with this id already exists.
    AlreadyExists { id: String },
    /// The execution was saved by someone else since it was loaded.
    VersionConflict {
        execution_id: WorkflowExecutionId,
        expected: i64,
    },
    /// A stored record could not be decoded.
    Corrupt { id: String, reason: String },
    /// The storage backend failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { id } => write!(f, "workflow not found: {id}"),
            Self::ExecutionNotFound { id } => write!(f, "execution not found: {id}"),
            Self::AlreadyExists { id } => write!(f, "record already exists: {id}"),
            Self::VersionConflict {
                execution_id,
                expected,
            } => write!(
                f,
                "execution {execution_id} changed since version {expected}"
            ),
            Self::Corrupt { id, reason } => write!(f, "stored record {id} is corrupt: {reason}"),
            Self::Backend { reason } => write!(f, "storage backend failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Returns true for optimistic concurrency failures.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// High-level scheduler errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Firing context (use as context wrapper).
    Firing { workflow_id: WorkflowId },
    /// Concurrent firings kept winning the compare-and-set.
    Contended { workflow_id: WorkflowId, attempts: u32 },
    /// Polling context (use as context wrapper).
    Polling { queue: &'static str },
    /// Cancellation context (use as context wrapper).
    Cancellation { workflow_id: WorkflowId },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firing { workflow_id } => write!(f, "failed to fire workflow {workflow_id}"),
            Self::Contended {
                workflow_id,
                attempts,
            } => write!(
                f,
                "workflow {workflow_id} still contended after {attempts} attempts"
            ),
            Self::Polling { queue } => write!(f, "failed to poll {queue} executions"),
            Self::Cancellation { workflow_id } => {
                write!(f, "failed to cancel executions of workflow {workflow_id}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let id = WorkflowId::new();
        let err = StoreError::WorkflowNotFound { id };
        assert!(err.to_string().contains("workflow not found"));
        assert!(err.to_string().contains("wf_"));
    }

    #[test]
    fn version_conflict_is_conflict() {
        let err = StoreError::VersionConflict {
            execution_id: WorkflowExecutionId::new(),
            expected: 3,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("since version 3"));
        assert!(!StoreError::Backend { reason: "x".into() }.is_conflict());
    }

    #[test]
    fn scheduler_error_display() {
        let err = SchedulerError::Polling { queue: "due" };
        assert_eq!(err.to_string(), "failed to poll due executions");
    }
}
