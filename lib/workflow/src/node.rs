//! Workflow node types.
//!
//! Nodes are created by the external editor and are read-only to the engine.
//! Each node has:
//! - An editor-assigned ID, unique within its workflow
//! - A type tag from a closed set, grouped into classes
//! - Opaque JSON configuration interpreted by the type's executor
//! - An optional reference to a stored credential

use nodeflow_core::CredentialId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Identifier of a node within a workflow.
///
/// Node ids are generated by the editor, so they are kept as opaque strings
/// rather than ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The class a node type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Entry points; they have no standalone meaning outside a run.
    Trigger,
    /// Side-effecting steps (HTTP, messaging).
    Action,
    /// Configuration providers for a hub (models, stores, tools).
    Adapter,
    /// Nodes that orchestrate their connected adapters.
    Hub,
}

/// The closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Started by a user from the editor.
    ManualTrigger,
    /// Started by an inbound webhook.
    WebhookTrigger,
    /// Started by a Google Form submission.
    GoogleFormTrigger,
    /// Started by a Stripe event.
    StripeTrigger,
    /// Outbound HTTP request.
    HttpRequest,
    /// Discord webhook message.
    Discord,
    /// Slack webhook message.
    Slack,
    /// OpenAI chat model.
    #[serde(rename = "OPENAI")]
    OpenAi,
    /// Anthropic chat model.
    Anthropic,
    /// Google Gemini chat model.
    Gemini,
    /// Postgres-backed conversation memory.
    Postgres,
    /// MCP tool server.
    McpTools,
    /// AI agent hub.
    AiAgent,
}

impl NodeType {
    /// All node types, in declaration order.
    pub const ALL: [NodeType; 13] = [
        Self::ManualTrigger,
        Self::WebhookTrigger,
        Self::GoogleFormTrigger,
        Self::StripeTrigger,
        Self::HttpRequest,
        Self::Discord,
        Self::Slack,
        Self::OpenAi,
        Self::Anthropic,
        Self::Gemini,
        Self::Postgres,
        Self::McpTools,
        Self::AiAgent,
    ];

    /// Returns the class of this node type.
    #[must_use]
    pub fn class(self) -> NodeClass {
        match self {
            Self::ManualTrigger
            | Self::WebhookTrigger
            | Self::GoogleFormTrigger
            | Self::StripeTrigger => NodeClass::Trigger,
            Self::HttpRequest | Self::Discord | Self::Slack => NodeClass::Action,
            Self::OpenAi | Self::Anthropic | Self::Gemini | Self::Postgres | Self::McpTools => {
                NodeClass::Adapter
            }
            Self::AiAgent => NodeClass::Hub,
        }
    }

    /// Returns true for trigger-class types.
    #[must_use]
    pub fn is_trigger(self) -> bool {
        self.class() == NodeClass::Trigger
    }

    /// Returns true for hub types.
    #[must_use]
    pub fn is_hub(self) -> bool {
        self.class() == NodeClass::Hub
    }

    /// Returns true for chat-model adapters.
    #[must_use]
    pub fn is_chat_model(self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic | Self::Gemini)
    }

    /// Returns true for database adapters.
    #[must_use]
    pub fn is_database(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Returns true for tool providers.
    #[must_use]
    pub fn is_tool_provider(self) -> bool {
        matches!(self, Self::McpTools)
    }

    /// Returns true if a hub owns nodes of this type when they feed into it.
    ///
    /// Owned nodes are never dispatched directly by the orchestrator.
    #[must_use]
    pub fn is_agent_owned(self) -> bool {
        self.is_chat_model() || self.is_database()
    }

    /// The wire tag, as stored by the editor.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManualTrigger => "MANUAL_TRIGGER",
            Self::WebhookTrigger => "WEBHOOK_TRIGGER",
            Self::GoogleFormTrigger => "GOOGLE_FORM_TRIGGER",
            Self::StripeTrigger => "STRIPE_TRIGGER",
            Self::HttpRequest => "HTTP_REQUEST",
            Self::Discord => "DISCORD",
            Self::Slack => "SLACK",
            Self::OpenAi => "OPENAI",
            Self::Anthropic => "ANTHROPIC",
            Self::Gemini => "GEMINI",
            Self::Postgres => "POSTGRES",
            Self::McpTools => "MCP_TOOLS",
            Self::AiAgent => "AI_AGENT",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a type tag is not in the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeType {
    /// The unrecognized tag.
    pub tag: String,
}

impl fmt::Display for UnknownNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node type: {}", self.tag)
    }
}

impl std::error::Error for UnknownNodeType {}

impl FromStr for NodeType {
    type Err = UnknownNodeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownNodeType { tag: s.to_string() })
    }
}

/// A configured step in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the workflow.
    pub id: NodeId,
    /// The node's type tag.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration.
    #[serde(default)]
    pub data: JsonValue,
    /// Credential used by the executor, if any.
    #[serde(default)]
    pub credential_id: Option<CredentialId>,
}

impl Node {
    /// Creates a node with empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            data: JsonValue::Object(serde_json::Map::new()),
            credential_id: None,
        }
    }

    /// Sets the configuration data.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn with_credential(mut self, credential_id: CredentialId) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    /// Returns a string field from the configuration, if present and non-empty.
    #[must_use]
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data
            .get(field)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// The variable name the node binds its result under, if configured.
    #[must_use]
    pub fn variable_name(&self) -> Option<&str> {
        self.data_str("variableName")
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
