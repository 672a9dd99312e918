//! Tool providers.
//!
//! A hub node connects to a tool server for the duration of one execution:
//! it opens a [`ToolSession`], lists the tools, calls some of them and
//! closes the session on every exit path.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub input_schema: JsonValue,
}

/// An open connection to a tool server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Lists the tools the server offers.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Calls a tool and returns its text output.
    async fn call_tool(&self, name: &str, arguments: JsonValue) -> Result<String, ToolError>;

    /// Closes the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), ToolError>;
}

/// Opens tool sessions.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Connects to `server_url`, authenticating with `bearer_token` if given.
    async fn connect(
        &self,
        server_url: &str,
        bearer_token: Option<&str>,
    ) -> Result<Arc<dyn ToolSession>, ToolError>;
}

#[derive(Debug, Default)]
struct ScriptState {
    connections: Vec<(String, Option<String>)>,
    calls: Vec<(String, JsonValue)>,
    closes: usize,
}

/// A provider serving a fixed tool list with canned outputs.
#[derive(Debug, Clone, Default)]
pub struct StaticToolProvider {
    tools: Vec<ToolDescriptor>,
    outputs: HashMap<String, Result<String, ToolError>>,
    refuse_connections: bool,
    state: Arc<Mutex<ScriptState>>,
}

impl StaticToolProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool that answers every call with `output`.
    #[must_use]
    pub fn with_tool(mut self, name: &str, output: Result<String, ToolError>) -> Self {
        self.tools.push(ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({"type": "object"}),
        });
        self.outputs.insert(name.to_string(), output);
        self
    }

    /// Makes every connection attempt fail.
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// (server url, bearer token) pairs connected to so far.
    #[must_use]
    pub fn connections(&self) -> Vec<(String, Option<String>)> {
        self.state
            .lock()
            .map(|s| s.connections.clone())
            .unwrap_or_default()
    }

    /// (tool, arguments) pairs called so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, JsonValue)> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    /// How many sessions were closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().map(|s| s.closes).unwrap_or_default()
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn connect(
        &self,
        server_url: &str,
        bearer_token: Option<&str>,
    ) -> Result<Arc<dyn ToolSession>, ToolError> {
        if self.refuse_connections {
            return Err(ToolError::ConnectionFailed {
                server_url: server_url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            state
                .connections
                .push((server_url.to_string(), bearer_token.map(str::to_string)));
        }
        Ok(Arc::new(StaticSession {
            provider: self.clone(),
            closed: Mutex::new(false),
        }))
    }
}

struct StaticSession {
    provider: StaticToolProvider,
    closed: Mutex<bool>,
}

impl StaticSession {
    fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(true)
    }
}

#[async_trait]
impl ToolSession for StaticSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        if self.is_closed() {
            return Err(ToolError::Closed);
        }
        Ok(self.provider.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: JsonValue) -> Result<String, ToolError> {
        if self.is_closed() {
            return Err(ToolError::Closed);
        }
        if let Ok(mut state) = self.provider.state.lock() {
            state.calls.push((name.to_string(), arguments));
        }
        self.provider
            .outputs
            .get(name)
            .cloned()
            .unwrap_or_else(|| {
                Err(ToolError::CallFailed {
                    tool: name.to_string(),
                    reason: "unknown tool".to_string(),
                })
            })
    }

    async fn close(&self) -> Result<(), ToolError> {
        let mut closed = self.closed.lock().map_err(|_| ToolError::Closed)?;
        if !*closed {
            *closed = true;
            if let Ok(mut state) = self.provider.state.lock() {
                state.closes += 1;
            }
        }
        Ok(())
    }
}
