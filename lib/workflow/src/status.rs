//! Per-node progress notifications.
//!
//! Publishing is fire-and-forget: a publisher never returns an error, and a
//! broken or absent subscriber can never fail an executor.

use crate::node::{NodeId, NodeType};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::trace;

/// Progress of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// The side effect is in flight.
    Loading,
    /// The node finished.
    Success,
    /// The node failed.
    Error,
    /// A hub is running tool calls.
    ToolCalling,
}

/// A published status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Channel named after the node type, e.g. "HTTP_REQUEST".
    pub channel: String,
    /// The node whose status changed.
    pub node_id: NodeId,
    /// The new status.
    pub status: NodeStatus,
}

/// Sink for status changes.
pub trait StatusPublisher: Send + Sync {
    /// Publishes a status change. Must not block or fail.
    fn publish(&self, node_type: NodeType, node_id: &NodeId, status: NodeStatus);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusPublisher;

impl StatusPublisher for NoopStatusPublisher {
    fn publish(&self, node_type: NodeType, node_id: &NodeId, status: NodeStatus) {
        trace!(%node_type, %node_id, ?status, "status discarded");
    }
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastStatusPublisher {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastStatusPublisher {
    /// Creates a publisher buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl StatusPublisher for BroadcastStatusPublisher {
    fn publish(&self, node_type: NodeType, node_id: &NodeId, status: NodeStatus) {
        let event = StatusEvent {
            channel: node_type.as_str().to_string(),
            node_id: node_id.clone(),
            status,
        };
        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            trace!(%node_id, ?status, "no status subscribers");
        }
    }
}

/// Records every event in memory; useful for asserting status sequences.
#[derive(Debug, Clone, Default)]
pub struct RecordingStatusPublisher {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingStatusPublisher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the statuses published for one node, in order.
    #[must_use]
    pub fn statuses_for(&self, node_id: &NodeId) -> Vec<NodeStatus> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| &e.node_id == node_id)
                    .map(|e| e.status)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl StatusPublisher for RecordingStatusPublisher {
    fn publish(&self, node_type: NodeType, node_id: &NodeId, status: NodeStatus) {
        if let Ok(mut events) = self.events.lock() {
            events.push(StatusEvent {
                channel: node_type.as_str().to_string(),
                node_id: node_id.clone(),
                status,
            });
        }
    }
}

/// Convenience wrapper binding a publisher to one node.
#[derive(Clone)]
pub struct NodeStatusHandle {
    publisher: Arc<dyn StatusPublisher>,
    node_type: NodeType,
    node_id: NodeId,
}

impl NodeStatusHandle {
    /// Binds `publisher` to a node.
    #[must_use]
    pub fn new(publisher: Arc<dyn StatusPublisher>, node_type: NodeType, node_id: NodeId) -> Self {
        Self {
            publisher,
            node_type,
            node_id,
        }
    }

    /// Publishes `loading`.
    pub fn loading(&self) {
        self.publish(NodeStatus::Loading);
    }

    /// Publishes `success`.
    pub fn success(&self) {
        self.publish(NodeStatus::Success);
    }

    /// Publishes `error`.
    pub fn error(&self) {
        self.publish(NodeStatus::Error);
    }

    /// Publishes `tool_calling`.
    pub fn tool_calling(&self) {
        self.publish(NodeStatus::ToolCalling);
    }

    fn publish(&self, status: NodeStatus) {
        self.publisher.publish(self.node_type, &self.node_id, status);
    }
}
