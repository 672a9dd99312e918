//! Mapping collaborator failures onto node errors.
//!
//! Retryable collaborator failures become [`NodeError::Transient`] so the
//! step runner may retry them; bad user input becomes
//! [`NodeError::Configuration`].

use nodeflow_ai::LlmError;
use nodeflow_conversation::ConversationError;
use nodeflow_integration::{CredentialError, ToolError};
use nodeflow_workflow::NodeError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

pub(crate) fn llm_error(e: &LlmError) -> NodeError {
    match e {
        LlmError::InvalidConfig { .. } => NodeError::configuration(e.to_string()),
        _ if e.is_retryable() => NodeError::transient(e.to_string()),
        _ => NodeError::failed(e.to_string()),
    }
}

pub(crate) fn conversation_error(e: &ConversationError) -> NodeError {
    match e {
        ConversationError::InvalidTableName { .. } => NodeError::configuration(e.to_string()),
        _ if e.is_retryable() => NodeError::transient(e.to_string()),
        _ => NodeError::failed(e.to_string()),
    }
}

pub(crate) fn tool_error(e: &ToolError) -> NodeError {
    if e.is_retryable() {
        NodeError::transient(e.to_string())
    } else {
        NodeError::failed(e.to_string())
    }
}

pub(crate) fn credential_error(e: &CredentialError) -> NodeError {
    if e.is_retryable() {
        NodeError::transient(e.to_string())
    } else {
        NodeError::configuration(e.to_string())
    }
}

/// Encodes a step result for the journal.
pub(crate) fn to_step_value<T: Serialize>(value: &T) -> Result<JsonValue, NodeError> {
    serde_json::to_value(value)
        .map_err(|e| NodeError::failed(format!("failed to encode step result: {e}")))
}

/// Decodes a step result read back from the journal.
pub(crate) fn from_step_value<T: DeserializeOwned>(value: JsonValue) -> Result<T, NodeError> {
    serde_json::from_value(value)
        .map_err(|e| NodeError::failed(format!("failed to decode step result: {e}")))
}
