//! Error types for the integration crate.
//!
//! - `CredentialError`: resolving stored secrets
//! - `ToolError`: connecting to and calling tool servers

use nodeflow_core::{CredentialId, UserId};
use std::fmt;

/// Errors from credential operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Credential not found.
    NotFound { id: CredentialId },
    /// The credential belongs to someone else.
    Unauthorized { id: CredentialId, user_id: UserId },
    /// The stored secret could not be decoded.
    InvalidFormat { reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl CredentialError {
    /// Returns true if the lookup may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailed { .. })
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => {
                write!(f, "credential not found: {id}")
            }
            Self::Unauthorized { id, user_id } => {
                write!(f, "credential {id} is not owned by {user_id}")
            }
            Self::InvalidFormat { reason } => {
                write!(f, "invalid credential format: {reason}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "storage operation failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from tool providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Connection to the tool server failed.
    ConnectionFailed { server_url: String, reason: String },
    /// Listing tools failed.
    ListFailed { reason: String },
    /// A tool call failed.
    CallFailed { tool: String, reason: String },
    /// The session was already closed.
    Closed,
}

impl ToolError {
    /// Returns true if the operation may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { server_url, reason } => {
                write!(f, "failed to connect to tool server {server_url}: {reason}")
            }
            Self::ListFailed { reason } => write!(f, "failed to list tools: {reason}"),
            Self::CallFailed { tool, reason } => {
                write!(f, "tool call '{tool}' failed: {reason}")
            }
            Self::Closed => write!(f, "tool session is closed"),
        }
    }
}

impl std::error::Error for ToolError {}
