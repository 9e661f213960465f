//! Workflow node types and configurations.
//!
//! Nodes are the steps of a workflow graph. Each node has:
//! - An id that is unique within its workflow
//! - A presentation-only canvas position
//! - A typed payload selected by the node's `type` tag

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Handle exposed by a condition node when its condition holds.
pub const HANDLE_TRUE: &str = "true";
/// Handle exposed by a condition node when its condition does not hold.
pub const HANDLE_FALSE: &str = "false";

/// Identifier of a node within a single workflow graph.
///
/// Node ids are authored by the graph editor, so they are opaque strings
/// rather than generated ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Canvas position of a node. Has no execution semantics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// The type tag of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point of the graph.
    Trigger,
    /// Side-effecting step performed by a collaborator.
    Action,
    /// Two-way branch on a condition.
    Condition,
    /// Suspends the execution for a fixed duration.
    Delay,
}

impl NodeType {
    /// Returns the tag as it appears in serialized graphs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Delay => "delay",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for trigger nodes.
///
/// What fires the workflow is configured on the workflow itself; the node
/// only marks where traversal begins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerNodeConfig {
    /// Optional label shown in the editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Student-success actions that an action node can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Notify a student, advisor, or staff member.
    SendNotification,
    /// Create a suggestion for an advisor to review.
    CreateSuggestion,
    /// Enroll the student in a mini-course.
    EnrollInCourse,
    /// Raise an alert on the at-risk dashboard.
    CreateAlert,
    /// Set a field on the student record.
    UpdateStudentField,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNodeConfig {
    /// The action to perform.
    pub action: ActionKind,
    /// Action parameters. String values may contain `{{...}}` placeholders.
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
}

/// Comparison used by condition nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
    NotExists,
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNodeConfig {
    /// Dotted path into the execution scope, e.g. `trigger.score` or
    /// `context.attempts`.
    pub field: String,
    /// How to compare the field against `value`.
    pub operator: ConditionOperator,
    /// The value to compare with. Ignored by `exists` and `not_exists`.
    #[serde(default)]
    pub value: JsonValue,
}

/// Configuration for delay nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayNodeConfig {
    /// How long to suspend the execution.
    pub duration_minutes: u32,
}

impl DelayNodeConfig {
    /// Returns the delay as a chrono duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Typed node payload, selected by the node's type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(TriggerNodeConfig),
    Action(ActionNodeConfig),
    Condition(ConditionNodeConfig),
    Delay(DelayNodeConfig),
}

impl NodeConfig {
    /// Returns the type tag of this configuration.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Trigger(_) => NodeType::Trigger,
            Self::Action(_) => NodeType::Action,
            Self::Condition(_) => NodeType::Condition,
            Self::Delay(_) => NodeType::Delay,
        }
    }

    fn from_data(node_type: NodeType, data: Option<JsonValue>) -> Result<Self, serde_json::Error> {
        fn parse<T: serde::de::DeserializeOwned>(
            data: Option<JsonValue>,
        ) -> Result<T, serde_json::Error> {
            serde_json::from_value(data.unwrap_or(JsonValue::Object(Map::new())))
        }

        Ok(match node_type {
            NodeType::Trigger => Self::Trigger(parse(data)?),
            NodeType::Action => Self::Action(parse(data)?),
            NodeType::Condition => Self::Condition(parse(data)?),
            NodeType::Delay => Self::Delay(parse(data)?),
        })
    }

    fn to_data(&self) -> JsonValue {
        let data = match self {
            Self::Trigger(config) => serde_json::to_value(config),
            Self::Action(config) => serde_json::to_value(config),
            Self::Condition(config) => serde_json::to_value(config),
            Self::Delay(config) => serde_json::to_value(config),
        };
        // Plain structs of strings, numbers and maps always serialize.
        data.unwrap_or(JsonValue::Null)
    }
}

/// A workflow node.
///
/// Serialized as `{"id", "type", "position", "data"}`, the shape the graph
/// editor produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Editor canvas position.
    pub position: Position,
    /// Node configuration (determines type and behavior).
    pub config: NodeConfig,
}

/// Wire form of a node, with the payload still untyped.
#[derive(Serialize, Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
}

impl TryFrom<RawNode> for Node {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        Ok(Self {
            config: NodeConfig::from_data(raw.node_type, raw.data)?,
            id: raw.id,
            position: raw.position,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            node_type: node.node_type(),
            data: Some(node.config.to_data()),
            id: node.id,
            position: node.position,
        }
    }
}

impl Node {
    /// Creates a node at the canvas origin.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            config,
        }
    }

    /// Creates a trigger node.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeConfig::Trigger(TriggerNodeConfig::default()))
    }

    /// Creates an action node without parameters.
    #[must_use]
    pub fn action(id: impl Into<NodeId>, action: ActionKind) -> Self {
        Self::new(
            id,
            NodeConfig::Action(ActionNodeConfig {
                action,
                parameters: Map::new(),
            }),
        )
    }

    /// Creates a condition node.
    #[must_use]
    pub fn condition(
        id: impl Into<NodeId>,
        field: impl Into<String>,
        operator: ConditionOperator,
        value: JsonValue,
    ) -> Self {
        Self::new(
            id,
            NodeConfig::Condition(ConditionNodeConfig {
                field: field.into(),
                operator,
                value,
            }),
        )
    }

    /// Creates a delay node.
    #[must_use]
    pub fn delay(id: impl Into<NodeId>, duration_minutes: u32) -> Self {
        Self::new(id, NodeConfig::Delay(DelayNodeConfig { duration_minutes }))
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Returns the type tag of this node.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    /// Returns true for trigger nodes.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.node_type() == NodeType::Trigger
    }

    /// Returns the named output handles this node exposes, if it restricts them.
    ///
    /// `None` means any handle (or none) is accepted.
    #[must_use]
    pub fn output_handles(&self) -> Option<&'static [&'static str]> {
        match self.config {
            NodeConfig::Condition(_) => Some(&[HANDLE_TRUE, HANDLE_FALSE]),
            _ => None,
        }
    }
}
