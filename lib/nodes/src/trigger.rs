//! Trigger nodes.
//!
//! Trigger payloads arrive as the run's initial data, so at run time a
//! trigger only marks its node as done.

use async_trait::async_trait;
use nodeflow_workflow::{ExecutionContext, ExecutorInput, NodeError, NodeExecutor};

/// Passes the context through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        status.loading();
        status.success();
        Ok(input.context)
    }
}
