//! Execution records in Postgres.

use crate::db::{decode_error, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeflow_core::{ExecutionId, UserId, WorkflowId};
use nodeflow_workflow::{
    CreateOutcome, Execution, ExecutionOutcome, ExecutionStatus, ExecutionStore, StoreError,
};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::debug;

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    correlation_id: String,
    workflow_id: String,
    owner_id: String,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    output: Option<serde_json::Value>,
    error: Option<String>,
    error_detail: Option<String>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id)
            .map_err(|e| decode_error("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let owner_id = UserId::from_str(&self.owner_id)
            .map_err(|e| decode_error("user id", &self.owner_id, e))?;
        let status = ExecutionStatus::from_str_value(&self.status)
            .ok_or_else(|| decode_error("execution status", &self.status, "unknown status"))?;

        Ok(Execution {
            id,
            correlation_id: self.correlation_id,
            workflow_id,
            owner_id,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            output: self.output,
            error: self.error,
            error_detail: self.error_detail,
        })
    }
}

/// Repository for Execution records.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_row(&self, correlation_id: &str) -> Result<Option<Execution>, sqlx::Error> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, correlation_id, workflow_id, owner_id, status, started_at, completed_at,
                   output, error, error_detail
            FROM executions
            WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutionRow::try_into_execution).transpose()
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create_running(&self, execution: Execution) -> Result<CreateOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO executions (id, correlation_id, workflow_id, owner_id, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.correlation_id)
        .bind(execution.workflow_id.to_string())
        .bind(execution.owner_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?
        .rows_affected();

        if inserted == 1 {
            return Ok(CreateOutcome::Created(execution));
        }

        debug!(correlation_id = %execution.correlation_id, "execution already recorded");
        self.find_row(&execution.correlation_id)
            .await
            .map_err(store_error)?
            .map(CreateOutcome::Existing)
            .ok_or_else(|| StoreError::Unavailable {
                details: format!(
                    "execution '{}' conflicted but could not be read back",
                    execution.correlation_id
                ),
            })
    }

    async fn finalize(
        &self,
        correlation_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let (output, error, detail) = match outcome {
            ExecutionOutcome::Success { output } => (Some(output.clone()), None, None),
            ExecutionOutcome::Failed { error, detail } => {
                (None, Some(error.as_str()), detail.as_deref())
            }
        };
        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, completed_at = $3, output = $4, error = $5, error_detail = $6
            WHERE correlation_id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(correlation_id)
        .bind(outcome.status().as_str())
        .bind(completed_at)
        .bind(output)
        .bind(error)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(store_error)?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn find(&self, correlation_id: &str) -> Result<Option<Execution>, StoreError> {
        self.find_row(correlation_id).await.map_err(store_error)
    }

    async fn count_for_owner_since(
        &self,
        owner_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM executions
            WHERE owner_id = $1 AND started_at >= $2
            "#,
        )
        .bind(owner_id.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}
