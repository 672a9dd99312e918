//! Running one node in isolation for interactive debugging.
//!
//! A test run goes through the same registry as a real run but has no
//! Execution record, no quota and no checkpointing.

use crate::context::ExecutionContext;
use crate::error::TestRunError;
use crate::executor::ExecutorInput;
use crate::node::NodeId;
use crate::orchestrator::WorkflowOrchestrator;
use crate::step::ImmediateSteps;
use nodeflow_core::{UserId, WorkflowId};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, instrument};

impl WorkflowOrchestrator {
    /// Executes a single node against `mock_context`.
    ///
    /// Returns the value bound under the node's `variableName`, or the whole
    /// resulting context when the node declares none.
    ///
    /// # Errors
    ///
    /// - [`TestRunError::NotFound`] if the workflow or node does not exist
    /// - [`TestRunError::Unauthorized`] if `caller_id` does not own the workflow
    /// - [`TestRunError::UnsupportedNodeClass`] for trigger nodes
    /// - [`TestRunError::Execution`] if the executor fails
    #[instrument(skip(self, mock_context), fields(workflow_id = %workflow_id, node_id = %node_id))]
    pub async fn execute_node_for_test(
        &self,
        workflow_id: WorkflowId,
        node_id: &NodeId,
        caller_id: UserId,
        mock_context: Option<JsonValue>,
    ) -> Result<JsonValue, TestRunError> {
        let workflow = self
            .workflows
            .load(workflow_id)
            .await?
            .ok_or_else(|| TestRunError::NotFound {
                what: format!("workflow {workflow_id}"),
            })?;
        if workflow.owner_id != caller_id {
            return Err(TestRunError::Unauthorized { caller_id });
        }

        let node = workflow
            .node(node_id)
            .ok_or_else(|| TestRunError::NotFound {
                what: format!("node {node_id}"),
            })?;
        if node.node_type.is_trigger() {
            return Err(TestRunError::UnsupportedNodeClass {
                node_type: node.node_type,
            });
        }

        let executor = self
            .registry
            .get(node.node_type)
            .map_err(|e| TestRunError::Execution {
                reason: e.to_string(),
            })?;
        let input = ExecutorInput {
            node,
            workflow: &workflow,
            user_id: workflow.owner_id,
            context: ExecutionContext::from_initial_data(mock_context),
            steps: Arc::new(ImmediateSteps),
            status: self.status.clone(),
        };
        let context = executor
            .execute(input)
            .await
            .map_err(|e| TestRunError::Execution {
                reason: e.to_string(),
            })?;
        info!("test run finished");

        let output = node
            .variable_name()
            .and_then(|name| context.get(name).cloned());
        Ok(output.unwrap_or_else(|| context.without_internal_keys().into_json()))
    }
}
