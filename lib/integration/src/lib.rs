//! Integrations with external services for nodeflow.
//!
//! This crate provides:
//!
//! - **Credentials**: owner-scoped secret resolution through [`CredentialStore`]
//! - **Tools**: the [`ToolProvider`]/[`ToolSession`] seam and an MCP client

pub mod credential;
pub mod error;
pub mod mcp;
pub mod tools;

pub use credential::{Credential, CredentialStore, CredentialType, InMemoryCredentialStore};
pub use error::{CredentialError, ToolError};
pub use mcp::McpToolProvider;
pub use tools::{StaticToolProvider, ToolDescriptor, ToolProvider, ToolSession};
