//! API error type and its HTTP mapping.
//!
//! Handlers return [`ApiError`]; internal details are logged and never
//! leave the process.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nodeflow_workflow::{RunError, StoreError, TestRunError};
use serde_json::json;
use std::fmt;

/// Errors surfaced to API callers.
#[derive(Debug)]
pub enum ApiError {
    /// A path or header value could not be parsed.
    BadRequest { reason: String },
    /// The caller is not allowed to act on the resource.
    Forbidden { reason: String },
    /// The resource does not exist.
    NotFound { what: String },
    /// The request collides with an existing resource.
    Conflict { reason: String },
    /// The request was understood but the node or run could not complete.
    Unprocessable { reason: String },
    /// The owner is over their monthly allowance.
    QuotaExceeded { reason: String },
    /// A collaborator failed.
    Internal { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::Forbidden { reason } => write!(f, "forbidden: {reason}"),
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::Conflict { reason }
            | Self::Unprocessable { reason }
            | Self::QuotaExceeded { reason } => {
                write!(f, "{reason}")
            }
            Self::Internal { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the caller.
    fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal { details } = &self {
            tracing::error!(error = %details, "request failed");
        }
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Internal {
            details: e.to_string(),
        }
    }
}

impl From<TestRunError> for ApiError {
    fn from(e: TestRunError) -> Self {
        match e {
            TestRunError::NotFound { what } => Self::NotFound { what },
            TestRunError::Unauthorized { .. } => Self::Forbidden {
                reason: e.to_string(),
            },
            TestRunError::UnsupportedNodeClass { .. } | TestRunError::Execution { .. } => {
                Self::Unprocessable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        match &e {
            RunError::WorkflowNotFound { workflow_id } => Self::NotFound {
                what: format!("workflow {workflow_id}"),
            },
            RunError::CorrelationConflict { .. } => Self::Conflict {
                reason: e.to_string(),
            },
            RunError::QuotaExceeded { .. } => Self::QuotaExceeded {
                reason: e.to_string(),
            },
            RunError::Graph(_) | RunError::UnregisteredType { .. } | RunError::Node { .. } => {
                Self::Unprocessable {
                    reason: e.to_string(),
                }
            }
            RunError::Store(_) | RunError::Entitlement(_) => Self::Internal {
                details: e.to_string(),
            },
        }
    }
}

/// Failures while bringing the server up.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The database could not be reached or migrated.
    Database { details: String },
    /// A provider client could not be built.
    Providers { details: String },
    /// The listener could not bind or the server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database setup failed: {details}"),
            Self::Providers { details } => write!(f, "provider setup failed: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}
