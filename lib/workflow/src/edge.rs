//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node. Nodes with several
//! outcomes (conditions) pick the edge to follow by its `sourceHandle`.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an edge within a single workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Creates an edge ID from any string.
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

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directed connection between two nodes of the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique identifier for this edge within the workflow.
    pub id: EdgeId,
    /// The node the edge leaves.
    pub source: NodeId,
    /// The node the edge enters.
    pub target: NodeId,
    /// Named output port on the source node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Named input port on the target node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    /// Creates an edge without handles.
    ///
    /// The edge id is derived from its endpoints.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: EdgeId::new(format!("{source}->{target}")),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    /// Creates an edge leaving the given output handle of `source`.
    #[must_use]
    pub fn from_handle(
        source: impl Into<NodeId>,
        handle: impl Into<String>,
        target: impl Into<NodeId>,
    ) -> Self {
        let handle = handle.into();
        let mut edge = Self::new(source, target);
        edge.id = EdgeId::new(format!("{}:{handle}", edge.id));
        edge.source_handle = Some(handle);
        edge
    }

    /// Overrides the edge id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EdgeId::new(id);
        self
    }

    /// Returns true if this edge leaves through `handle`.
    #[must_use]
    pub fn leaves_through(&self, handle: &str) -> bool {
        self.source_handle.as_deref() == Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_json_uses_camel_case_handles() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e1",
            "source": "check",
            "target": "notify",
            "sourceHandle": "true"
        }))
        .expect("deserialize");

        assert_eq!(edge.id.as_str(), "e1");
        assert!(edge.leaves_through("true"));
        assert!(!edge.leaves_through("false"));
        assert!(edge.target_handle.is_none());
    }

    #[test]
    fn derived_ids_are_distinct_per_handle() {
        let yes = Edge::from_handle("check", "true", "notify");
        let no = Edge::from_handle("check", "false", "notify");
        assert_ne!(yes.id, no.id);
    }

    #[test]
    fn absent_handles_are_not_serialized() {
        let json = serde_json::to_value(Edge::new("t1", "a1")).expect("serialize");
        assert_eq!(json, json!({ "id": "t1->a1", "source": "t1", "target": "a1" }));
    }
}
