//! Workflow automation graphs for waypoint.
//!
//! This crate provides the workflow model and the engine that runs it:
//!
//! - **Graph Model**: Typed nodes and handle-aware edges, validated with petgraph
//! - **Workflow**: Lifecycle, trigger configuration, execution settings, audit log
//! - **Firing Policy**: Cooldown, daily cap and active hours
//! - **Execution**: Persistable state machine with a per-node result ledger
//! - **Engine**: Step-wise traversal with suspension on delay nodes

pub mod condition;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod policy;
pub mod template;
pub mod trigger;

pub use definition::{
    AuditAction, AuditEntry, Workflow, WorkflowMode, WorkflowParts, WorkflowStatus,
    WorkflowSummary,
};
pub use edge::{Edge, EdgeId};
pub use engine::{
    ConditionExecutor, Engine, ExecutorRegistry, NodeExecutor, NodeOutcome, StepOutcome,
    TriggerExecutor,
};
pub use error::{
    EngineError, ExecutionError, NodeExecutionError, ParseStatusError, PolicyError,
    ValidationError, WorkflowError,
};
pub use execution::{ExecutionStatus, NodeResult, NodeResultStatus, ResumeData, WorkflowExecution};
pub use graph::WorkflowGraph;
pub use node::{
    ActionKind, ActionNodeConfig, ConditionNodeConfig, ConditionOperator, DelayNodeConfig, Node,
    NodeConfig, NodeId, NodeType, Position, TriggerNodeConfig,
};
pub use policy::{ActiveHours, ExecutionSettings, FiringDecision, SuppressionReason};
pub use trigger::{TriggerConfig, TriggerEvent, TriggerType};
