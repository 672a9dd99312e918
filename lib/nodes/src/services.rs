//! Collaborators shared by every executor.

use crate::convert::credential_error;
use nodeflow_ai::LlmBackendFactory;
use nodeflow_conversation::{ConversationStoreConnector, PgConnector};
use nodeflow_core::UserId;
use nodeflow_integration::{CredentialStore, McpToolProvider, ToolProvider};
use nodeflow_workflow::{ExecutionContext, JinjaTemplates, Node, NodeError, TemplateEngine};
use std::sync::Arc;

/// The external services executors reach through.
///
/// Built once at startup and cloned into each executor.
#[derive(Clone)]
pub struct NodeServices {
    pub credentials: Arc<dyn CredentialStore>,
    pub llm: Arc<dyn LlmBackendFactory>,
    pub conversations: Arc<dyn ConversationStoreConnector>,
    pub tools: Arc<dyn ToolProvider>,
    pub templates: Arc<dyn TemplateEngine>,
    pub http: reqwest::Client,
}

impl NodeServices {
    /// Creates services with Postgres memory, MCP tools and minijinja templates.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>, llm: Arc<dyn LlmBackendFactory>) -> Self {
        Self {
            credentials,
            llm,
            conversations: Arc::new(PgConnector::default()),
            tools: Arc::new(McpToolProvider::new()),
            templates: Arc::new(JinjaTemplates::new()),
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_conversations(
        mut self,
        conversations: Arc<dyn ConversationStoreConnector>,
    ) -> Self {
        self.conversations = conversations;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolProvider>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateEngine>) -> Self {
        self.templates = templates;
        self
    }

    /// Uses a preconfigured HTTP client, e.g. one with a request timeout.
    #[must_use]
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Resolves the node's credential on behalf of the workflow owner.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the node has no credential or the
    /// owner cannot use it.
    pub async fn secret(&self, node: &Node, owner_id: UserId) -> Result<String, NodeError> {
        let id = node
            .credential_id
            .ok_or_else(|| NodeError::missing_field("credentialId"))?;
        self.credentials
            .resolve(id, owner_id)
            .await
            .map_err(|e| credential_error(&e))
    }

    /// Like [`NodeServices::secret`], but a node without a credential yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured credential cannot be resolved.
    pub async fn optional_secret(
        &self,
        node: &Node,
        owner_id: UserId,
    ) -> Result<Option<String>, NodeError> {
        match node.credential_id {
            Some(_) => self.secret(node, owner_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Renders a template field against the context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the template is invalid.
    pub fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, NodeError> {
        self.templates.render(template, context)
    }
}
