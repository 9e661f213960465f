//! Workflow graph and its structural validator.
//!
//! The graph is stored the way the editor produces it: a list of nodes and a
//! list of edges, with order carrying no meaning. Validation builds a
//! petgraph index over those lists and never mutates them.

use crate::edge::Edge;
use crate::error::{EdgeEnd, ValidationError};
use crate::node::{Node, NodeConfig, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A workflow graph: nodes plus the directed edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph from editor-supplied nodes and edges.
    ///
    /// No checks are made here; call [`WorkflowGraph::validate`].
    #[must_use]
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Adds an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Adds a node, builder style.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.add_node(node);
        self
    }

    /// Adds an edge, builder style.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.add_edge(edge);
        self
    }

    /// Returns all nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns all edges.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns the node with the given id, if any.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == node_id)
    }

    /// Returns every trigger node, in graph order.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_trigger())
    }

    /// Returns the edges leaving a node, in graph order.
    #[must_use]
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|edge| &edge.source == node_id)
            .collect()
    }

    /// Returns the edges entering a node, in graph order.
    #[must_use]
    pub fn incoming(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|edge| &edge.target == node_id)
            .collect()
    }

    /// Returns true if no edge leaves the node.
    #[must_use]
    pub fn is_terminal(&self, node_id: &NodeId) -> bool {
        !self.edges.iter().any(|edge| &edge.source == node_id)
    }

    /// Validates the graph.
    ///
    /// Checks, in this order:
    /// - Node and edge ids are unique
    /// - Every edge endpoint names an existing node
    /// - Exactly one trigger node exists
    /// - Trigger nodes have no incoming edges; every other node has one
    /// - Branching nodes are left only through handles they expose
    /// - Delay nodes wait at least a minute
    /// - The graph is acyclic
    ///
    /// Returns every problem found; an empty vector means the graph is
    /// runnable.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let index = GraphIndex::build(self, &mut errors);

        let triggers: Vec<&Node> = self.trigger_nodes().collect();
        match triggers.len() {
            0 => errors.push(ValidationError::MissingTrigger),
            1 => {}
            _ => errors.push(ValidationError::MultipleTriggers {
                node_ids: triggers.iter().map(|node| node.id.clone()).collect(),
            }),
        }

        for (&position, node) in index.positions.iter().zip(index.indexed_nodes()) {
            let incoming = index
                .graph
                .edges_directed(position, Direction::Incoming)
                .count();
            if node.is_trigger() && incoming > 0 {
                errors.push(ValidationError::TriggerHasIncomingEdge {
                    node_id: node.id.clone(),
                });
            } else if !node.is_trigger() && incoming == 0 {
                errors.push(ValidationError::UnreachableNode {
                    node_id: node.id.clone(),
                });
            }

            if let NodeConfig::Delay(delay) = &node.config
                && delay.duration_minutes == 0
            {
                errors.push(ValidationError::ZeroDelay {
                    node_id: node.id.clone(),
                });
            }
        }

        for edge in &self.edges {
            let Some(source) = index.node(&edge.source) else {
                continue;
            };
            let Some(handles) = source.output_handles() else {
                continue;
            };
            let known = edge
                .source_handle
                .as_deref()
                .is_some_and(|handle| handles.contains(&handle));
            if !known {
                errors.push(ValidationError::UnknownHandle {
                    edge_id: edge.id.clone(),
                    node_id: source.id.clone(),
                    handle: edge.source_handle.clone(),
                });
            }
        }

        for position in index.find_cycles() {
            errors.push(ValidationError::CycleDetected {
                node_id: index.graph[position].id.clone(),
            });
        }

        errors
    }

    /// Returns true if [`WorkflowGraph::validate`] reports no problems.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Traversal state of a node during cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// A petgraph view over a [`WorkflowGraph`], built for one validation pass.
///
/// Only the first node with a given id is indexed, and edges with a missing
/// endpoint are left out.
struct GraphIndex<'a> {
    graph: DiGraph<&'a Node, &'a Edge>,
    by_id: HashMap<&'a NodeId, NodeIndex>,
    /// Indexed nodes in graph order.
    positions: Vec<NodeIndex>,
}

impl<'a> GraphIndex<'a> {
    fn build(workflow_graph: &'a WorkflowGraph, errors: &mut Vec<ValidationError>) -> Self {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        let mut positions = Vec::new();

        for node in &workflow_graph.nodes {
            if by_id.contains_key(&node.id) {
                errors.push(ValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
                continue;
            }
            let position = graph.add_node(node);
            by_id.insert(&node.id, position);
            positions.push(position);
        }

        let mut edge_ids = HashSet::new();
        for edge in &workflow_graph.edges {
            if !edge_ids.insert(&edge.id) {
                errors.push(ValidationError::DuplicateEdgeId {
                    edge_id: edge.id.clone(),
                });
            }

            let source = by_id.get(&edge.source).copied();
            let target = by_id.get(&edge.target).copied();
            if source.is_none() {
                errors.push(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    end: EdgeEnd::Source,
                    node_id: edge.source.clone(),
                });
            }
            if target.is_none() {
                errors.push(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    end: EdgeEnd::Target,
                    node_id: edge.target.clone(),
                });
            }
            if let (Some(source), Some(target)) = (source, target) {
                graph.add_edge(source, target, edge);
            }
        }

        Self {
            graph,
            by_id,
            positions,
        }
    }

    fn node(&self, node_id: &NodeId) -> Option<&'a Node> {
        self.by_id.get(node_id).map(|&position| self.graph[position])
    }

    fn indexed_nodes(&self) -> impl Iterator<Item = &'a Node> + '_ {
        self.positions.iter().map(|&position| self.graph[position])
    }

    /// Finds the nodes at which back edges close a cycle.
    ///
    /// Iterative depth-first search from every unvisited node, so cycles that
    /// are unreachable from the trigger are found too.
    fn find_cycles(&self) -> Vec<NodeIndex> {
        let mut color = vec![Color::Unvisited; self.graph.node_count()];
        let mut cycle_entries = Vec::new();

        for &start in &self.positions {
            if color[start.index()] != Color::Unvisited {
                continue;
            }
            color[start.index()] = Color::InProgress;
            let mut stack = vec![(start, self.graph.neighbors(start))];

            while let Some((current, successors)) = stack.last_mut() {
                let current = *current;
                match successors.next() {
                    Some(next) => match color[next.index()] {
                        Color::Unvisited => {
                            color[next.index()] = Color::InProgress;
                            stack.push((next, self.graph.neighbors(next)));
                        }
                        Color::InProgress => {
                            if !cycle_entries.contains(&next) {
                                cycle_entries.push(next);
                            }
                        }
                        Color::Done => {}
                    },
                    None => {
                        color[current.index()] = Color::Done;
                        stack.pop();
                    }
                }
            }
        }

        cycle_entries
    }
}
