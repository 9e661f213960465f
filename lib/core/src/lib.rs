//! Core domain types and utilities for the waypoint platform.
//!
//! This crate provides the foundational identifier types and error handling
//! shared by the workflow engine, the scheduler, and the worker.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{AuditEntryId, OrganizationId, ParseIdError, WorkflowExecutionId, WorkflowId};
