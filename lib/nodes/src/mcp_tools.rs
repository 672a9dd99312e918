//! Tool-provider adapters.

use crate::convert::{from_step_value, to_step_value, tool_error};
use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_core::UserId;
use nodeflow_integration::{ToolDescriptor, ToolSession};
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, Node, NodeError, NodeExecutor, StepRunner, step_fn,
    with_status,
};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::warn;

/// A tool node's server address and optional bearer token.
pub(crate) struct ToolServerSettings {
    pub(crate) server_url: String,
    bearer_token: Option<String>,
}

impl ToolServerSettings {
    pub(crate) async fn resolve(
        node: &Node,
        owner_id: UserId,
        services: &NodeServices,
    ) -> Result<Self, NodeError> {
        let server_url = node
            .data_str("serverUrl")
            .ok_or_else(|| NodeError::missing_field("serverUrl"))?
            .to_string();
        Ok(Self {
            server_url,
            bearer_token: services.optional_secret(node, owner_id).await?,
        })
    }

    /// Opens a session. The caller must close it.
    pub(crate) async fn connect(
        &self,
        services: &NodeServices,
    ) -> Result<Arc<dyn ToolSession>, NodeError> {
        services
            .tools
            .connect(&self.server_url, self.bearer_token.as_deref())
            .await
            .map_err(|e| tool_error(&e))
    }
}

/// Lists a session's tools as a checkpointed step.
pub(crate) async fn list_tools(
    session: &Arc<dyn ToolSession>,
    steps: &dyn StepRunner,
    step_name: &str,
) -> Result<Vec<ToolDescriptor>, NodeError> {
    let session = session.clone();
    let value = steps
        .run(
            step_name,
            step_fn(move || {
                let session = session.clone();
                async move {
                    let tools = session.list_tools().await.map_err(|e| tool_error(&e))?;
                    to_step_value(&tools)
                }
            }),
        )
        .await?;
    from_step_value(value)
}

/// Calls a tool as a checkpointed step and returns its text output.
pub(crate) async fn call_tool(
    session: &Arc<dyn ToolSession>,
    steps: &dyn StepRunner,
    step_name: &str,
    name: &str,
    arguments: JsonValue,
) -> Result<String, NodeError> {
    let session = session.clone();
    let name = name.to_string();
    let value = steps
        .run(
            step_name,
            step_fn(move || {
                let session = session.clone();
                let name = name.clone();
                let arguments = arguments.clone();
                async move {
                    let output = session
                        .call_tool(&name, arguments)
                        .await
                        .map_err(|e| tool_error(&e))?;
                    Ok(JsonValue::String(output))
                }
            }),
        )
        .await?;
    from_step_value(value)
}

/// Closes a session, logging rather than raising failures.
pub(crate) async fn close_quietly(session: &Arc<dyn ToolSession>, server_url: &str) {
    if let Err(e) = session.close().await {
        warn!(server = %server_url, error = %e, "failed to close tool session");
    }
}

/// Connects to a tool server and binds `{serverUrl, toolCount, tools}`.
#[derive(Clone)]
pub struct McpToolsExecutor {
    services: NodeServices,
}

impl McpToolsExecutor {
    #[must_use]
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeExecutor for McpToolsExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        with_status(&status, async {
            let variable = input.variable_name()?;
            let settings =
                ToolServerSettings::resolve(input.node, input.user_id, &self.services).await?;
            let session = settings.connect(&self.services).await?;
            let tools = list_tools(&session, input.steps.as_ref(), &input.step_name("list-tools"))
                .await;
            close_quietly(&session, &settings.server_url).await;
            let tools = tools?;

            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            Ok(input.context.with_variable(
                variable,
                json!({
                    "serverUrl": settings.server_url,
                    "toolCount": tools.len(),
                    "tools": names,
                }),
            ))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_ai::{LlmProvider, ScriptedBackend};
    use nodeflow_integration::{InMemoryCredentialStore, StaticToolProvider};
    use nodeflow_workflow::{ImmediateSteps, NodeType, NoopStatusPublisher, Workflow};

    async fn run(
        provider: &StaticToolProvider,
        credentials: InMemoryCredentialStore,
        node: Node,
        owner: UserId,
    ) -> Result<ExecutionContext, NodeError> {
        let services = NodeServices::new(
            Arc::new(credentials),
            Arc::new(ScriptedBackend::new(LlmProvider::OpenAi)),
        )
        .with_tools(Arc::new(provider.clone()));
        let workflow = Workflow::new("wf", owner).with_node(node.clone());
        McpToolsExecutor::new(services)
            .execute(ExecutorInput {
                node: &node,
                workflow: &workflow,
                user_id: owner,
                context: ExecutionContext::new(),
                steps: Arc::new(ImmediateSteps),
                status: Arc::new(NoopStatusPublisher),
            })
            .await
    }

    #[tokio::test]
    async fn lists_tools_and_closes() {
        let provider = StaticToolProvider::new()
            .with_tool("search", Ok(String::new()))
            .with_tool("fetch", Ok(String::new()));
        let credentials = InMemoryCredentialStore::new();
        let owner = UserId::new();
        let token = credentials.api_key(owner, "tok").await;
        let node = Node::new("t", NodeType::McpTools)
            .with_credential(token)
            .with_data(json!({"variableName": "tools", "serverUrl": "http://mcp.local/mcp"}));

        let ctx = run(&provider, credentials, node, owner).await.unwrap();

        assert_eq!(
            ctx.get("tools"),
            Some(&json!({
                "serverUrl": "http://mcp.local/mcp",
                "toolCount": 2,
                "tools": ["search", "fetch"],
            }))
        );
        assert_eq!(
            provider.connections(),
            vec![("http://mcp.local/mcp".to_string(), Some("tok".to_string()))]
        );
        assert_eq!(provider.close_count(), 1);
    }

    #[tokio::test]
    async fn refused_connections_are_transient() {
        let provider = StaticToolProvider::new().refusing();
        let node = Node::new("t", NodeType::McpTools)
            .with_data(json!({"variableName": "tools", "serverUrl": "http://mcp.local/mcp"}));

        let err = run(&provider, InMemoryCredentialStore::new(), node, UserId::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
