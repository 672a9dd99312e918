//! Node executors for nodeflow.
//!
//! One executor per node type, all reaching external services through
//! [`NodeServices`]:
//!
//! - **Triggers**: pass their payload through
//! - **Actions**: HTTP requests, Discord and Slack webhooks
//! - **Adapters**: chat models, Postgres memory, MCP tool servers
//! - **Hub**: the [`AgentOrchestrator`], which composes the adapters wired into it
//!
//! [`default_registry`] wires them all into one
//! [`ExecutorRegistry`](nodeflow_workflow::ExecutorRegistry).

pub mod agent;
pub mod chat_model;
mod convert;
pub mod http_request;
pub mod mcp_tools;
pub mod memory;
pub mod messaging;
pub mod registry;
pub mod services;
pub mod trigger;

pub use agent::{AgentOrchestrator, AgentSlots, DATABASE_SLOT, MODEL_SLOT, TOOLS_SLOT};
pub use chat_model::{ChatModelExecutor, provider_for};
pub use http_request::HttpRequestExecutor;
pub use mcp_tools::McpToolsExecutor;
pub use memory::PostgresMemoryExecutor;
pub use messaging::{WebhookKind, WebhookMessageExecutor};
pub use registry::default_registry;
pub use services::NodeServices;
pub use trigger::TriggerExecutor;
