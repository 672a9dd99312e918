//! MCP tool servers over streamable HTTP.

use crate::error::ToolError;
use crate::tools::{ToolDescriptor, ToolProvider, ToolSession};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type McpConnection = RunningService<RoleClient, ()>;

/// Connects to MCP servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpToolProvider;

impl McpToolProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    async fn connect(
        &self,
        server_url: &str,
        bearer_token: Option<&str>,
    ) -> Result<Arc<dyn ToolSession>, ToolError> {
        let mut config = StreamableHttpClientTransportConfig::with_uri(server_url);
        if let Some(token) = bearer_token {
            config = config.auth_header(token);
        }
        let transport = StreamableHttpClientTransport::from_config(config);
        let client = ().serve(transport).await.map_err(|e| ToolError::ConnectionFailed {
            server_url: server_url.to_string(),
            reason: e.to_string(),
        })?;
        info!(server = %server_url, "MCP server connected");

        Ok(Arc::new(McpSession {
            server_url: server_url.to_string(),
            connection: Mutex::new(Some(client)),
        }))
    }
}

struct McpSession {
    server_url: String,
    connection: Mutex<Option<McpConnection>>,
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let guard = self.connection.lock().await;
        let client = guard.as_ref().ok_or(ToolError::Closed)?;
        let tools = client
            .list_all_tools()
            .await
            .map_err(|e| ToolError::ListFailed {
                reason: e.to_string(),
            })?;
        debug!(server = %self.server_url, count = tools.len(), "listed MCP tools");

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                description: tool
                    .description
                    .as_ref()
                    .map_or_else(|| format!("MCP tool: {}", tool.name), |d| d.to_string()),
                input_schema: serde_json::to_value(&*tool.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
                name: tool.name.to_string(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: JsonValue) -> Result<String, ToolError> {
        let guard = self.connection.lock().await;
        let client = guard.as_ref().ok_or(ToolError::Closed)?;
        let arguments = match arguments {
            JsonValue::Object(map) => Some(map),
            JsonValue::Null => None,
            other => {
                return Err(ToolError::CallFailed {
                    tool: name.to_string(),
                    reason: format!("arguments must be an object, got {other}"),
                });
            }
        };
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = client
            .call_tool(params)
            .await
            .map_err(|e| ToolError::CallFailed {
                tool: name.to_string(),
                reason: e.to_string(),
            })?;

        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                rmcp::model::RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();
        Ok(content.join("\n"))
    }

    async fn close(&self) -> Result<(), ToolError> {
        if let Some(mut client) = self.connection.lock().await.take() {
            if let Err(e) = client.close().await {
                warn!(server = %self.server_url, error = %e, "MCP close failed");
            }
            info!(server = %self.server_url, "MCP server disconnected");
        }
        Ok(())
    }
}
