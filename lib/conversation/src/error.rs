//! Error types for the conversation crate.

use std::fmt;

/// Errors from conversation store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The store could not be reached.
    ConnectionFailed { reason: String },
    /// A query failed.
    QueryFailed { reason: String },
    /// The table name is not a plain identifier.
    InvalidTableName { name: String },
    /// A stored row could not be decoded.
    InvalidData { reason: String },
}

impl ConversationError {
    /// Returns true if the operation may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "conversation store connection failed: {reason}")
            }
            Self::QueryFailed { reason } => {
                write!(f, "conversation query failed: {reason}")
            }
            Self::InvalidTableName { name } => {
                write!(f, "invalid conversation table name: {name}")
            }
            Self::InvalidData { reason } => {
                write!(f, "invalid stored message: {reason}")
            }
        }
    }
}

impl std::error::Error for ConversationError {}

impl From<sqlx::Error> for ConversationError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Self::ConnectionFailed {
                reason: e.to_string(),
            },
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => Self::InvalidData {
                reason: e.to_string(),
            },
            other => Self::QueryFailed {
                reason: other.to_string(),
            },
        }
    }
}
