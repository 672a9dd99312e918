//! Error types for the workflow crate.
//!
//! Errors are layered:
//! - `GraphError`: compiling nodes and connections into an order
//! - `NodeError`: a single executor invocation
//! - `RegistryError`: executor lookup
//! - `StoreError` / `EntitlementError`: external collaborators
//! - `RunError`: a whole run, as seen by the orchestrator
//! - `TestRunError`: the single-node test entry point
//!
//! Only `NodeError::Transient` is retryable, and only by the step runner.

use crate::node::{NodeId, NodeType};
use nodeflow_core::{UserId, WorkflowId};
use std::fmt;

/// Errors from graph compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// No topological order exists.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Workflow contains a cycle"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors raised by a node executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Bad user input: a missing or invalid field, a missing connection,
    /// or a template that fails to compile or render.
    Configuration { reason: String },
    /// A network, timeout or rate-limit failure from an external call.
    Transient { reason: String },
    /// Any other failure of the side effect.
    Failed { reason: String },
}

impl NodeError {
    /// A configuration error for a required field that is absent.
    #[must_use]
    pub fn missing_field(field: &str) -> Self {
        Self::Configuration {
            reason: format!("{field} is required"),
        }
    }

    /// A configuration error with a free-form reason.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// A retryable failure.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// A non-retryable failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns true if the step runner may retry the failing step.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "configuration error: {reason}"),
            Self::Transient { reason } => write!(f, "transient error: {reason}"),
            Self::Failed { reason } => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Errors from executor lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No executor is registered for the type.
    Unregistered { node_type: NodeType },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered { node_type } => {
                write!(f, "no executor registered for node type {node_type}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the query.
    Unavailable { details: String },
    /// A stored row could not be decoded.
    Corrupt { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "store unavailable: {details}"),
            Self::Corrupt { details } => write!(f, "corrupt stored data: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the entitlement collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// The entitlement lookup failed.
    Unavailable { details: String },
}

impl fmt::Display for EntitlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "entitlement check failed: {details}"),
        }
    }
}

impl std::error::Error for EntitlementError {}

/// Errors that end a workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The workflow does not exist.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The correlation id already names a run of another workflow.
    CorrelationConflict {
        correlation_id: String,
        existing_workflow_id: WorkflowId,
    },
    /// The owner is over the monthly allowance.
    QuotaExceeded {
        owner_id: UserId,
        used: u64,
        limit: u64,
    },
    /// The graph could not be compiled.
    Graph(GraphError),
    /// A node type has no registered executor. This is a deployment defect.
    UnregisteredType { node_type: NodeType },
    /// A node failed; the run stopped there.
    Node {
        node_id: NodeId,
        node_type: NodeType,
        error: NodeError,
    },
    /// The execution store failed.
    Store(StoreError),
    /// The entitlement lookup failed.
    Entitlement(EntitlementError),
}

impl RunError {
    /// Returns true if the failure indicates a programming or deployment defect.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnregisteredType { .. })
    }

    /// Returns true if redelivering the run could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Node { error, .. } => error.is_retryable(),
            Self::Store(_) | Self::Entitlement(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::CorrelationConflict {
                correlation_id,
                existing_workflow_id,
            } => write!(
                f,
                "correlation id {correlation_id} already belongs to workflow \
                 {existing_workflow_id}"
            ),
            Self::QuotaExceeded {
                owner_id,
                used,
                limit,
            } => write!(
                f,
                "monthly execution quota exceeded for {owner_id}: {used} of {limit}"
            ),
            Self::Graph(e) => write!(f, "{e}"),
            Self::UnregisteredType { node_type } => {
                write!(f, "no executor registered for node type {node_type}")
            }
            Self::Node {
                node_id,
                node_type,
                error,
            } => write!(f, "node {node_id} ({node_type}) failed: {error}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Entitlement(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            Self::Node { error, .. } => Some(error),
            Self::Store(e) => Some(e),
            Self::Entitlement(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for RunError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RegistryError> for RunError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Unregistered { node_type } => Self::UnregisteredType { node_type },
        }
    }
}

impl From<EntitlementError> for RunError {
    fn from(e: EntitlementError) -> Self {
        Self::Entitlement(e)
    }
}

/// Typed failures of the single-node test entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRunError {
    /// The workflow or node does not exist.
    NotFound { what: String },
    /// The caller does not own the workflow.
    Unauthorized { caller_id: UserId },
    /// The node's class cannot run on its own.
    UnsupportedNodeClass { node_type: NodeType },
    /// The executor failed, or could not be resolved.
    Execution { reason: String },
}

impl fmt::Display for TestRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::Unauthorized { caller_id } => {
                write!(f, "{caller_id} is not allowed to run this node")
            }
            Self::UnsupportedNodeClass { node_type } => {
                write!(f, "{node_type} nodes cannot be run on their own")
            }
            Self::Execution { reason } => write!(f, "node execution failed: {reason}"),
        }
    }
}

impl std::error::Error for TestRunError {}

impl From<StoreError> for TestRunError {
    fn from(e: StoreError) -> Self {
        Self::Execution {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message() {
        assert_eq!(
            GraphError::CycleDetected.to_string(),
            "Workflow contains a cycle"
        );
    }

    #[test]
    fn missing_field_names_the_field() {
        let err = NodeError::missing_field("endpoint");
        assert!(matches!(err, NodeError::Configuration { .. }));
        assert!(err.to_string().contains("endpoint is required"));
    }

    #[test]
    fn only_transient_node_errors_retry() {
        assert!(NodeError::transient("timeout").is_retryable());
        assert!(!NodeError::configuration("bad").is_retryable());
        assert!(!NodeError::failed("boom").is_retryable());
    }

    #[test]
    fn run_error_classification() {
        let quota = RunError::QuotaExceeded {
            owner_id: UserId::new(),
            used: 101,
            limit: 100,
        };
        assert!(!quota.is_retryable());
        assert!(!quota.is_fatal());

        let unregistered = RunError::UnregisteredType {
            node_type: NodeType::Slack,
        };
        assert!(unregistered.is_fatal());

        let conflict = RunError::CorrelationConflict {
            correlation_id: "evt_1".to_string(),
            existing_workflow_id: WorkflowId::new(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.to_string().contains("evt_1"));

        let cycle: RunError = GraphError::CycleDetected.into();
        assert!(!cycle.is_retryable());
        assert_eq!(cycle.to_string(), "Workflow contains a cycle");
    }
}
