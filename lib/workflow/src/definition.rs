//! Workflow definition types.
//!
//! A workflow is an owned, named graph:
//! - Metadata (name, owner)
//! - Nodes in editor order
//! - Connections between them
//!
//! Node order matters: it breaks ties in the execution order.

use crate::connection::Connection;
use crate::node::{Node, NodeId};
use nodeflow_core::{UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A complete workflow definition as read from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// The user who owns this workflow.
    pub owner_id: UserId,
    /// Nodes in editor order.
    pub nodes: Vec<Node>,
    /// Connections between nodes.
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            owner_id,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds a connection.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Returns a node by ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    /// Returns the connections whose endpoints both exist.
    ///
    /// Dangling connections can survive editor deletes; they are dropped
    /// before compiling rather than failing the run.
    #[must_use]
    pub fn live_connections(&self) -> Vec<Connection> {
        let ids: HashSet<&NodeId> = self.nodes.iter().map(|n| &n.id).collect();
        self.connections
            .iter()
            .filter(|c| ids.contains(&c.from_node_id) && ids.contains(&c.to_node_id))
            .cloned()
            .collect()
    }

    /// Returns the live connections entering a node, paired with their source node.
    pub fn incoming(&self, node_id: &NodeId) -> impl Iterator<Item = (&Connection, &Node)> {
        self.connections
            .iter()
            .filter(move |c| &c.to_node_id == node_id)
            .filter_map(|c| self.node(&c.from_node_id).map(|source| (c, source)))
    }
}
