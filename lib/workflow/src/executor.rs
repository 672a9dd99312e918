//! The executor contract and the registry that dispatches to it.
//!
//! Every node type implements [`NodeExecutor`]. The registry is an explicit
//! map built once at startup and passed by reference, so tests can swap in
//! fakes for any type.
//!
//! An executor:
//! 1. Validates its required fields
//! 2. Renders templated fields against the context
//! 3. Publishes `loading`, runs its side effect in a named step, then
//!    publishes `success` or `error`
//! 4. Returns the context with its result bound under its variable name

use crate::context::ExecutionContext;
use crate::definition::Workflow;
use crate::error::{NodeError, RegistryError};
use crate::node::{Node, NodeType};
use crate::status::{NodeStatusHandle, StatusPublisher};
use crate::step::StepRunner;
use async_trait::async_trait;
use nodeflow_core::UserId;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Everything an executor receives for one invocation.
#[derive(Clone)]
pub struct ExecutorInput<'a> {
    /// The node being executed.
    pub node: &'a Node,
    /// The workflow the node belongs to; hubs read their connections here.
    pub workflow: &'a Workflow,
    /// The workflow owner, for credential-scoped lookups.
    pub user_id: UserId,
    /// The context accumulated so far.
    pub context: ExecutionContext,
    /// Runs side effects as checkpointed steps.
    pub steps: Arc<dyn StepRunner>,
    /// Receives status changes.
    pub status: Arc<dyn StatusPublisher>,
}

impl ExecutorInput<'_> {
    /// The node's configuration.
    #[must_use]
    pub fn data(&self) -> &JsonValue {
        &self.node.data
    }

    /// A status handle bound to this node.
    #[must_use]
    pub fn status_handle(&self) -> NodeStatusHandle {
        NodeStatusHandle::new(
            self.status.clone(),
            self.node.node_type,
            self.node.id.clone(),
        )
    }

    /// A step name unique to this node within the run.
    #[must_use]
    pub fn step_name(&self, label: &str) -> String {
        format!("{}:{label}", self.node.id)
    }

    /// Returns a required, non-empty string field.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the field.
    pub fn required_str(&self, field: &str) -> Result<&str, NodeError> {
        self.node
            .data_str(field)
            .ok_or_else(|| NodeError::missing_field(field))
    }

    /// Returns the validated output variable name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if it is missing or not an identifier.
    pub fn variable_name(&self) -> Result<&str, NodeError> {
        let name = self.required_str("variableName")?;
        if is_identifier(name) {
            Ok(name)
        } else {
            Err(NodeError::configuration(format!(
                "variableName is not a valid identifier: {name}"
            )))
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Runtime behavior of one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes the node and returns the extended context.
    ///
    /// # Errors
    ///
    /// Returns the node's failure; executors never swallow errors.
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError>;
}

/// Publishes `error` for a failure found before any side effect began, such
/// as a missing field. No `loading` event precedes it.
///
/// # Errors
///
/// Returns `prepared`'s error unchanged.
pub fn validated<T>(
    status: &NodeStatusHandle,
    prepared: Result<T, NodeError>,
) -> Result<T, NodeError> {
    if prepared.is_err() {
        status.error();
    }
    prepared
}

/// Runs `work` between `loading` and `success`/`error` status events.
///
/// # Errors
///
/// Returns `work`'s error unchanged after publishing `error`.
pub async fn with_status<T, F>(status: &NodeStatusHandle, work: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    status.loading();
    let result = work.await;
    match &result {
        Ok(_) => status.success(),
        Err(_) => status.error(),
    }
    result
}

/// Maps node types to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor, replacing any earlier one for the type.
    #[must_use]
    pub fn with(mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(node_type, executor);
        self
    }

    /// Registers an executor in place.
    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    /// Looks up the executor for a type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unregistered`] if none is registered. This
    /// indicates a deployment defect, not bad user input.
    pub fn get(&self, node_type: NodeType) -> Result<Arc<dyn NodeExecutor>, RegistryError> {
        self.executors
            .get(&node_type)
            .cloned()
            .ok_or(RegistryError::Unregistered { node_type })
    }

    /// Returns true if the type has an executor.
    #[must_use]
    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Returns the node types with no registered executor.
    #[must_use]
    pub fn missing_types(&self) -> Vec<NodeType> {
        NodeType::ALL
            .into_iter()
            .filter(|t| !self.contains(*t))
            .collect()
    }
}
