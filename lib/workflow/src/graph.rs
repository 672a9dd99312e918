//! Graph compilation using petgraph.
//!
//! A workflow compiles into an [`ExecutionPlan`]:
//! - A topological order over every node, ties broken by editor order
//! - The skip-set of adapter nodes owned by a hub
//!
//! Node indices in the petgraph graph are assigned in input order, which is
//! what makes the tie-break deterministic.

use crate::connection::Connection;
use crate::definition::Workflow;
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// The result of compiling a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Every node, in dispatch order.
    pub order: Vec<Node>,
    /// Nodes that only run through their hub.
    pub skip: BTreeSet<NodeId>,
}

impl ExecutionPlan {
    /// Compiles a workflow, dropping dangling connections first.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if no order exists.
    pub fn compile(workflow: &Workflow) -> Result<Self, GraphError> {
        let connections = workflow.live_connections();
        let order = topological_sort(&workflow.nodes, &connections)?;
        let skip = compute_skip_set(&workflow.nodes, &connections);
        debug!(
            nodes = order.len(),
            skipped = skip.len(),
            "compiled execution plan"
        );
        Ok(Self { order, skip })
    }

    /// Returns true if the node must not be dispatched directly.
    #[must_use]
    pub fn is_skipped(&self, node_id: &NodeId) -> bool {
        self.skip.contains(node_id)
    }
}

/// Orders nodes so that every connection's source precedes its target.
///
/// Nodes in no connection are still included. Among nodes that are ready at
/// the same time, the one earlier in `nodes` comes first. Connections that
/// reference unknown nodes are ignored. Duplicate node ids keep their first
/// occurrence.
///
/// # Errors
///
/// Returns [`GraphError::CycleDetected`] if the connections contain a cycle,
/// including a node connected to itself.
pub fn topological_sort(
    nodes: &[Node],
    connections: &[Connection],
) -> Result<Vec<Node>, GraphError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), connections.len());
    let mut index_of: HashMap<&NodeId, NodeIndex> = HashMap::with_capacity(nodes.len());

    for (position, node) in nodes.iter().enumerate() {
        if !index_of.contains_key(&node.id) {
            index_of.insert(&node.id, graph.add_node(position));
        }
    }

    for connection in connections {
        let (Some(&from), Some(&to)) = (
            index_of.get(&connection.from_node_id),
            index_of.get(&connection.to_node_id),
        ) else {
            continue;
        };
        graph.add_edge(from, to, ());
    }

    // Kahn's algorithm with an ordered ready set
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<NodeIndex> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(current) = ready.pop_first() {
        order.push(nodes[graph[current]].clone());
        for next in graph.neighbors_directed(current, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != graph.node_count() {
        return Err(GraphError::CycleDetected);
    }

    Ok(order)
}

/// Finds adapter nodes that feed a hub and therefore run only through it.
///
/// A source node is owned when it is connected into a hub-type node and its
/// own type is agent-owned (chat models, databases). The slot label plays no
/// part here.
#[must_use]
pub fn compute_skip_set(nodes: &[Node], connections: &[Connection]) -> BTreeSet<NodeId> {
    let by_id: HashMap<&NodeId, &Node> = nodes.iter().map(|n| (&n.id, n)).collect();

    connections
        .iter()
        .filter(|c| {
            by_id
                .get(&c.to_node_id)
                .is_some_and(|target| target.node_type.is_hub())
        })
        .filter_map(|c| by_id.get(&c.from_node_id))
        .filter(|source| source.node_type.is_agent_owned())
        .map(|source| source.id.clone())
        .collect()
}
