//! Connections between nodes.
//!
//! A connection is a directed edge plus the labeled slots it leaves and
//! enters. Slot labels matter for hub nodes (e.g. "database" on an agent);
//! ordinary pipeline steps ignore them.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Slot name used when an edge carries no label.
pub const MAIN_SLOT: &str = "main";

/// A directed, slot-labeled edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// The upstream node.
    pub from_node_id: NodeId,
    /// The downstream node.
    pub to_node_id: NodeId,
    /// Output slot on the upstream node.
    #[serde(default = "main_slot")]
    pub from_output: String,
    /// Input slot on the downstream node.
    #[serde(default = "main_slot")]
    pub to_input: String,
}

fn main_slot() -> String {
    MAIN_SLOT.to_string()
}

impl Connection {
    /// Creates a connection between the main slots of two nodes.
    #[must_use]
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from_node_id: from.into(),
            to_node_id: to.into(),
            from_output: main_slot(),
            to_input: main_slot(),
        }
    }

    /// Sets the input slot on the downstream node.
    #[must_use]
    pub fn into_slot(mut self, to_input: impl Into<String>) -> Self {
        self.to_input = to_input.into();
        self
    }

    /// Sets the output slot on the upstream node.
    #[must_use]
    pub fn from_slot(mut self, from_output: impl Into<String>) -> Self {
        self.from_output = from_output.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_slots_default_to_main() {
        let conn: Connection =
            serde_json::from_value(json!({"fromNodeId": "a", "toNodeId": "b"})).expect("parse");
        assert_eq!(conn, Connection::new("a", "b"));
        assert_eq!(conn.to_input, MAIN_SLOT);
    }

    #[test]
    fn slot_builder() {
        let conn = Connection::new("db", "agent").into_slot("database");
        assert_eq!(conn.to_input, "database");
        assert_eq!(conn.from_output, MAIN_SLOT);
    }
}
