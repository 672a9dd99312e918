//! Fire-and-forget run dispatch.
//!
//! Each trigger enqueues one run on the tokio runtime and returns its
//! correlation id immediately. Concurrent triggers of the same workflow are
//! all honored as separate runs.

use crate::error::RunError;
use crate::execution::Execution;
use crate::orchestrator::WorkflowOrchestrator;
use nodeflow_core::WorkflowId;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info_span};
use ulid::Ulid;

/// A run that has been handed to the runtime.
#[derive(Debug)]
pub struct TriggeredRun {
    /// The run's correlation id.
    pub correlation_id: String,
    /// Resolves when the run finishes. Dropping it does not cancel the run.
    pub handle: JoinHandle<Result<Execution, RunError>>,
}

/// Enqueues workflow runs.
#[derive(Clone)]
pub struct WorkflowTrigger {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl WorkflowTrigger {
    #[must_use]
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Enqueues a run under a fresh correlation id.
    #[must_use]
    pub fn trigger_workflow(
        &self,
        workflow_id: WorkflowId,
        initial_data: Option<JsonValue>,
    ) -> TriggeredRun {
        self.trigger_with_correlation(format!("run_{}", Ulid::new()), workflow_id, initial_data)
    }

    /// Enqueues a run under a caller-supplied correlation id, e.g. a webhook
    /// event id. Redelivering the same id does not create a second record.
    #[must_use]
    pub fn trigger_with_correlation(
        &self,
        correlation_id: String,
        workflow_id: WorkflowId,
        initial_data: Option<JsonValue>,
    ) -> TriggeredRun {
        let orchestrator = self.orchestrator.clone();
        let span = info_span!("triggered_run", correlation_id = %correlation_id);
        let run_id = correlation_id.clone();
        let handle = tokio::spawn(
            async move {
                let result = orchestrator.run(&run_id, workflow_id, initial_data).await;
                if let Err(e) = &result {
                    error!(error = %e, "triggered run failed");
                }
                result
            }
            .instrument(span),
        );
        TriggeredRun {
            correlation_id,
            handle,
        }
    }
}
