//! Postgres implementations of the engine's persistence collaborators.
//!
//! This module provides data access for:
//! - Workflow definitions with their nodes and connections
//! - Execution records
//! - Stored credentials
//! - Paid subscriptions, for quota exemption

pub mod credential;
pub mod execution;
pub mod subscription;
pub mod workflow;

pub use credential::PgCredentialStore;
pub use execution::PgExecutionStore;
pub use subscription::PgEntitlements;
pub use workflow::PgWorkflowRepository;

use nodeflow_workflow::StoreError;
use std::fmt;

/// Builds a decode error for a stored value that failed to parse.
pub(crate) fn decode_error(kind: &str, value: &str, reason: impl fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {kind} '{value}': {reason}"),
    )))
}

/// Classifies a database error for the engine.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => StoreError::Corrupt {
            details: e.to_string(),
        },
        _ => StoreError::Unavailable {
            details: e.to_string(),
        },
    }
}
