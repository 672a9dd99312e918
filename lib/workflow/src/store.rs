//! Workflow persistence, and in-memory stores for tests and embedding.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{CreateOutcome, Execution, ExecutionOutcome, ExecutionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeflow_core::{UserId, WorkflowId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Loads a workflow with its nodes and connections.
    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError>;
}

/// Workflows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl InMemoryWorkflowRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a workflow.
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(&workflow_id).cloned())
    }
}

/// Execution records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record, in insertion order.
    pub async fn all(&self) -> Vec<Execution> {
        self.executions.lock().await.clone()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_running(&self, execution: Execution) -> Result<CreateOutcome, StoreError> {
        let mut executions = self.executions.lock().await;
        if let Some(existing) = executions
            .iter()
            .find(|e| e.correlation_id == execution.correlation_id)
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        executions.push(execution.clone());
        Ok(CreateOutcome::Created(execution))
    }

    async fn finalize(
        &self,
        correlation_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut executions = self.executions.lock().await;
        Ok(executions
            .iter_mut()
            .find(|e| e.correlation_id == correlation_id)
            .is_some_and(|e| e.finish(outcome, completed_at)))
    }

    async fn find(&self, correlation_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self
            .executions
            .lock()
            .await
            .iter()
            .find(|e| e.correlation_id == correlation_id)
            .cloned())
    }

    async fn count_for_owner_since(
        &self,
        owner_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count = self
            .executions
            .lock()
            .await
            .iter()
            .filter(|e| e.owner_id == owner_id && e.started_at >= since)
            .count();
        Ok(count as u64)
    }
}
