//! Chat-model access for nodeflow.
//!
//! One [`LlmBackend`] trait over the supported providers:
//!
//! - **OpenAI**: chat completions with function tools
//! - **Anthropic**: the Messages API with tool use blocks
//! - **Gemini**: served through its OpenAI-compatible endpoint
//!
//! Backends are built per call by an [`LlmBackendFactory`], since API keys
//! belong to the workflow owner rather than the process.

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod openai;
pub mod scripted;

pub use backend::{
    HttpBackendFactory, LlmBackend, LlmBackendFactory, LlmMessage, LlmProvider, LlmRequest,
    LlmResponse, MessageRole, ProviderEndpoints, TokenUsage, ToolCall, ToolDefinition,
};
pub use error::LlmError;
pub use scripted::ScriptedBackend;
