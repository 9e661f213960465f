//! Scheduler for workflow triggers and executions.
//!
//! This crate provides:
//!
//! - **Storage**: Workflow and execution store traits with lease-based claims
//! - **Trigger Evaluator**: Applies the firing policy and creates executions
//! - **Execution Runner**: Polls queued and due executions and drives the engine

pub mod error;
pub mod evaluator;
pub mod memory;
pub mod runner;
pub mod store;

pub use error::{SchedulerError, StoreError};
pub use evaluator::{FireResult, TriggerEvaluator};
pub use memory::InMemoryStore;
pub use runner::{ExecutionRunner, PollSummary};
pub use store::{ExecutionStore, WorkflowStore};
