//! Execution records.
//!
//! One record per run, keyed by correlation id:
//! - Created as `Running` when the run starts; a duplicate delivery of the
//!   same correlation id finds the existing record instead
//! - Finalized exactly once to `Success` or `Failed`
//!
//! Runs that are queued but not yet started have no record.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeflow_core::{ExecutionId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Status of an Execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Nodes are being dispatched.
    Running,
    /// Every node completed.
    Success,
    /// The run stopped on an error.
    Failed,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// The stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parses the stored representation.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Row identifier.
    pub id: ExecutionId,
    /// Idempotency key, e.g. the triggering event id.
    pub correlation_id: String,
    /// The workflow being run.
    pub workflow_id: WorkflowId,
    /// The workflow's owner, for quota accounting.
    pub owner_id: UserId,
    /// Current status.
    pub status: ExecutionStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// The final context, on success.
    pub output: Option<JsonValue>,
    /// Human-readable failure message.
    pub error: Option<String>,
    /// Structured failure detail (the error's debug form and source chain).
    pub error_detail: Option<String>,
}

impl Execution {
    /// Creates a new record in `Running` state.
    #[must_use]
    pub fn start(
        correlation_id: impl Into<String>,
        workflow_id: WorkflowId,
        owner_id: UserId,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            correlation_id: correlation_id.into(),
            workflow_id,
            owner_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            error_detail: None,
        }
    }

    /// Applies a terminal outcome. Returns false if already terminal.
    pub fn finish(&mut self, outcome: &ExecutionOutcome, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.completed_at = Some(at);
        match outcome {
            ExecutionOutcome::Success { output } => {
                self.status = ExecutionStatus::Success;
                self.output = Some(output.clone());
            }
            ExecutionOutcome::Failed { error, detail } => {
                self.status = ExecutionStatus::Failed;
                self.error = Some(error.clone());
                self.error_detail = detail.clone();
            }
        }
        true
    }

    /// Duration of a finished run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// All nodes ran; `output` is the final context.
    Success { output: JsonValue },
    /// The run stopped on an error.
    Failed {
        error: String,
        detail: Option<String>,
    },
}

impl ExecutionOutcome {
    /// Builds a failure outcome from any error, keeping its source chain.
    #[must_use]
    pub fn failed(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut detail = format!("{error:?}");
        let mut source = error.source();
        while let Some(cause) = source {
            detail.push_str(&format!("\ncaused by: {cause}"));
            source = cause.source();
        }
        Self::Failed {
            error: error.to_string(),
            detail: Some(detail),
        }
    }

    /// The status this outcome finalizes to.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Success { .. } => ExecutionStatus::Success,
            Self::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

/// Result of creating a record.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new record was inserted.
    Created(Execution),
    /// A record with the same correlation id already existed.
    Existing(Execution),
}

impl CreateOutcome {
    /// The record, new or existing.
    #[must_use]
    pub fn execution(&self) -> &Execution {
        match self {
            Self::Created(e) | Self::Existing(e) => e,
        }
    }
}

/// Persistence for Execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a record unless one with the same correlation id exists.
    async fn create_running(&self, execution: Execution) -> Result<CreateOutcome, StoreError>;

    /// Finalizes a `Running` record. Returns false if it was already terminal
    /// or does not exist.
    async fn finalize(
        &self,
        correlation_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Finds a record by correlation id.
    async fn find(&self, correlation_id: &str) -> Result<Option<Execution>, StoreError>;

    /// Counts an owner's records started at or after `since`.
    async fn count_for_owner_since(
        &self,
        owner_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
