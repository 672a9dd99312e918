//! The production executor registry.

use crate::agent::AgentOrchestrator;
use crate::chat_model::ChatModelExecutor;
use crate::http_request::HttpRequestExecutor;
use crate::mcp_tools::McpToolsExecutor;
use crate::memory::PostgresMemoryExecutor;
use crate::messaging::WebhookMessageExecutor;
use crate::services::NodeServices;
use crate::trigger::TriggerExecutor;
use nodeflow_workflow::{ExecutorRegistry, NodeExecutor, NodeType};
use std::sync::Arc;

/// Builds a registry covering every node type.
#[must_use]
pub fn default_registry(services: &NodeServices) -> ExecutorRegistry {
    let trigger: Arc<dyn NodeExecutor> = Arc::new(TriggerExecutor);
    let chat_model: Arc<dyn NodeExecutor> = Arc::new(ChatModelExecutor::new(services.clone()));

    ExecutorRegistry::new()
        .with(NodeType::ManualTrigger, trigger.clone())
        .with(NodeType::WebhookTrigger, trigger.clone())
        .with(NodeType::GoogleFormTrigger, trigger.clone())
        .with(NodeType::StripeTrigger, trigger)
        .with(
            NodeType::HttpRequest,
            Arc::new(HttpRequestExecutor::new(services.clone())),
        )
        .with(
            NodeType::Discord,
            Arc::new(WebhookMessageExecutor::discord(services.clone())),
        )
        .with(
            NodeType::Slack,
            Arc::new(WebhookMessageExecutor::slack(services.clone())),
        )
        .with(NodeType::OpenAi, chat_model.clone())
        .with(NodeType::Anthropic, chat_model.clone())
        .with(NodeType::Gemini, chat_model)
        .with(
            NodeType::Postgres,
            Arc::new(PostgresMemoryExecutor::new(services.clone())),
        )
        .with(
            NodeType::McpTools,
            Arc::new(McpToolsExecutor::new(services.clone())),
        )
        .with(
            NodeType::AiAgent,
            Arc::new(AgentOrchestrator::new(services.clone())),
        )
}
