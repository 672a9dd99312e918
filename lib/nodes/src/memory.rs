//! Conversation-memory adapters.

use crate::convert::{conversation_error, from_step_value, to_step_value};
use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_conversation::{ConversationStore, DEFAULT_TABLE_NAME, Message};
use nodeflow_core::UserId;
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, Node, NodeError, NodeExecutor, StepRunner, step_fn,
    with_status,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_SESSION_ID: &str = "default";
const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// A memory node's settings, rendered and bound to its owner's connection string.
pub(crate) struct MemorySettings {
    pub(crate) session_id: String,
    pub(crate) table_name: String,
    pub(crate) context_window: usize,
    connection_string: String,
}

impl MemorySettings {
    pub(crate) async fn resolve(
        node: &Node,
        owner_id: UserId,
        context: &ExecutionContext,
        services: &NodeServices,
    ) -> Result<Self, NodeError> {
        let session_id = match node.data_str("sessionId") {
            Some(template) => services.render(template, context)?,
            None => String::new(),
        };
        let session_id = if session_id.trim().is_empty() {
            DEFAULT_SESSION_ID.to_string()
        } else {
            session_id
        };
        let context_window = node
            .data
            .get("contextWindow")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);

        Ok(Self {
            session_id,
            table_name: node
                .data_str("tableName")
                .unwrap_or(DEFAULT_TABLE_NAME)
                .to_string(),
            context_window,
            connection_string: services.secret(node, owner_id).await?,
        })
    }

    /// Opens the store. The caller must close it.
    pub(crate) async fn open(
        &self,
        services: &NodeServices,
    ) -> Result<Arc<dyn ConversationStore>, NodeError> {
        services
            .conversations
            .connect(&self.connection_string, &self.table_name)
            .await
            .map_err(|e| conversation_error(&e))
    }

    /// Reads the trailing window of the session, oldest first.
    pub(crate) async fn history(
        &self,
        store: &Arc<dyn ConversationStore>,
        steps: &dyn StepRunner,
        step_name: &str,
    ) -> Result<Vec<Message>, NodeError> {
        let store = store.clone();
        let session_id = self.session_id.clone();
        let limit = self.context_window;
        let value = steps
            .run(
                step_name,
                step_fn(move || {
                    let store = store.clone();
                    let session_id = session_id.clone();
                    async move {
                        let messages = store
                            .recent(&session_id, limit)
                            .await
                            .map_err(|e| conversation_error(&e))?;
                        to_step_value(&messages)
                    }
                }),
            )
            .await?;
        from_step_value(value)
    }

    /// Appends a turn as a checkpointed step.
    pub(crate) async fn save(
        store: &Arc<dyn ConversationStore>,
        steps: &dyn StepRunner,
        step_name: &str,
        message: Message,
    ) -> Result<(), NodeError> {
        let store = store.clone();
        steps
            .run(
                step_name,
                step_fn(move || {
                    let store = store.clone();
                    let message = message.clone();
                    async move {
                        store
                            .append(&message)
                            .await
                            .map_err(|e| conversation_error(&e))?;
                        Ok(serde_json::Value::Null)
                    }
                }),
            )
            .await?;
        Ok(())
    }
}

/// Reads recent turns of a session and binds `{messages, count}`.
#[derive(Clone)]
pub struct PostgresMemoryExecutor {
    services: NodeServices,
}

impl PostgresMemoryExecutor {
    #[must_use]
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeExecutor for PostgresMemoryExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        with_status(&status, async {
            let variable = input.variable_name()?;
            let settings =
                MemorySettings::resolve(input.node, input.user_id, &input.context, &self.services)
                    .await?;
            let store = settings.open(&self.services).await?;
            let history = settings
                .history(&store, input.steps.as_ref(), &input.step_name("history"))
                .await;
            store.close().await;
            let history = history.inspect_err(|e| warn!(error = %e, "history read failed"))?;

            Ok(input.context.with_variable(
                variable,
                json!({"count": history.len(), "messages": history}),
            ))
        })
        .await
    }
}
