//! The AI agent hub.
//!
//! An agent composes up to three adapters wired into its input slots:
//! - `ai-model`: the chat model (required)
//! - `database`: conversation memory
//! - `tools`: a tool server
//!
//! Slots are resolved from the graph, not from execution order. The adapters
//! run inside the agent's own execution in a fixed order:
//! 1. Connect to the tool server and list its tools
//! 2. Render the model's prompts against the context so far
//! 3. Read the conversation history
//! 4. Save the user turn
//! 5. Generate, running requested tools for up to `maxSteps` rounds
//! 6. Save the assistant turn
//!
//! Every resource opened along the way is closed exactly once, whatever the
//! outcome.

use crate::chat_model::ModelSettings;
use crate::mcp_tools::{ToolServerSettings, call_tool, close_quietly, list_tools};
use crate::memory::MemorySettings;
use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_ai::{LlmMessage, LlmResponse, ToolDefinition};
use nodeflow_conversation::{ConversationStore, Message, MessageRole};
use nodeflow_integration::{ToolDescriptor, ToolSession};
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, Node, NodeError, NodeExecutor, NodeId, NodeStatusHandle,
    NodeType, Workflow,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Slot carrying the chat model.
pub const MODEL_SLOT: &str = "ai-model";
/// Slot carrying conversation memory.
pub const DATABASE_SLOT: &str = "database";
/// Slot carrying the tool server.
pub const TOOLS_SLOT: &str = "tools";

const DEFAULT_MAX_STEPS: usize = 5;

/// The adapters feeding an agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentSlots<'a> {
    pub model: Option<&'a Node>,
    pub database: Option<&'a Node>,
    pub tools: Option<&'a Node>,
}

impl<'a> AgentSlots<'a> {
    /// Resolves a hub's slots from its incoming connections.
    ///
    /// An exact slot label always wins. Slots left empty are then filled by
    /// the first connected source whose type the slot accepts, which keeps
    /// graphs drawn before slots were labeled working.
    #[must_use]
    pub fn discover(workflow: &'a Workflow, hub_id: &NodeId) -> Self {
        let incoming: Vec<_> = workflow.incoming(hub_id).collect();
        let mut slots = Self::default();

        for (connection, source) in &incoming {
            let slot = match connection.to_input.as_str() {
                MODEL_SLOT => &mut slots.model,
                DATABASE_SLOT => &mut slots.database,
                TOOLS_SLOT => &mut slots.tools,
                _ => continue,
            };
            slot.get_or_insert(*source);
        }

        let by_type = |accepts: fn(NodeType) -> bool| {
            incoming
                .iter()
                .map(|(_, source)| *source)
                .find(|source| accepts(source.node_type))
        };
        if slots.model.is_none() {
            slots.model = by_type(NodeType::is_chat_model);
        }
        if slots.database.is_none() {
            slots.database = by_type(NodeType::is_database);
        }
        if slots.tools.is_none() {
            slots.tools = by_type(NodeType::is_tool_provider);
        }
        slots
    }
}

/// Resources to close when the agent finishes.
#[derive(Default)]
struct OpenResources {
    tools: Option<(Arc<dyn ToolSession>, String)>,
    memory: Option<Arc<dyn ConversationStore>>,
}

impl OpenResources {
    async fn release(self) {
        if let Some((session, server_url)) = self.tools {
            close_quietly(&session, &server_url).await;
        }
        if let Some(store) = self.memory {
            store.close().await;
        }
    }
}

struct ToolSet {
    session: Arc<dyn ToolSession>,
    server_url: String,
    tools: Vec<ToolDescriptor>,
}

impl ToolSet {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }
}

fn history_message(message: &Message) -> Option<LlmMessage> {
    match message.role {
        MessageRole::User => Some(LlmMessage::user(&message.content)),
        MessageRole::Assistant => Some(LlmMessage::assistant(&message.content)),
        MessageRole::System => None,
    }
}

/// Agent failures are never retried as a whole.
fn abort(e: NodeError) -> NodeError {
    match e {
        NodeError::Configuration { .. } => e,
        other => NodeError::failed(format!("AI agent failed: {other}")),
    }
}

/// Runs an agent hub.
#[derive(Clone)]
pub struct AgentOrchestrator {
    services: NodeServices,
}

impl AgentOrchestrator {
    #[must_use]
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }

    async fn run(
        &self,
        input: &ExecutorInput<'_>,
        status: &NodeStatusHandle,
        resources: &mut OpenResources,
    ) -> Result<ExecutionContext, NodeError> {
        let variable = input.variable_name()?;
        let slots = AgentSlots::discover(input.workflow, &input.node.id);
        let model_node = slots
            .model
            .ok_or_else(|| NodeError::configuration("AI agent requires a connected chat model"))?;
        let max_steps = input
            .node
            .data
            .get("maxSteps")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_STEPS);
        let steps = input.steps.as_ref();

        let toolset = match slots.tools {
            Some(tools_node) => {
                let settings =
                    ToolServerSettings::resolve(tools_node, input.user_id, &self.services).await?;
                let session = settings.connect(&self.services).await?;
                resources.tools = Some((session.clone(), settings.server_url.clone()));
                let tools = list_tools(&session, steps, &input.step_name("list-tools")).await?;
                Some(ToolSet {
                    session,
                    server_url: settings.server_url,
                    tools,
                })
            }
            None => None,
        };

        let model =
            ModelSettings::resolve(model_node, input.user_id, &input.context, &self.services)
                .await?;

        let memory = match slots.database {
            Some(db_node) => {
                let settings =
                    MemorySettings::resolve(db_node, input.user_id, &input.context, &self.services)
                        .await?;
                let store = settings.open(&self.services).await?;
                resources.memory = Some(store.clone());
                Some((settings, store))
            }
            None => None,
        };
        let history = match &memory {
            Some((settings, store)) => {
                settings
                    .history(store, steps, &input.step_name("history"))
                    .await?
            }
            None => Vec::new(),
        };
        let chat_history_length = history.len();

        let has_prompt = !model.user_prompt.trim().is_empty();
        if let Some((settings, store)) = memory.as_ref().filter(|_| has_prompt) {
            let turn = Message::user(&settings.session_id, &model.user_prompt);
            MemorySettings::save(store, steps, &input.step_name("save-user"), turn).await?;
        }

        let mut messages: Vec<LlmMessage> = history.iter().filter_map(history_message).collect();
        if has_prompt {
            messages.push(LlmMessage::user(&model.user_prompt));
        }
        let definitions = toolset.as_ref().map(ToolSet::definitions).unwrap_or_default();

        let mut tool_calls_made = 0;
        let mut round = 1;
        let response: LlmResponse = loop {
            let offer_tools = !definitions.is_empty() && round < max_steps;
            let mut request = model.request(messages.clone());
            if offer_tools {
                request = request.with_tools(definitions.clone());
            }
            let response = model
                .generate(steps, &input.step_name(&format!("generate-{round}")), request)
                .await?;

            let Some(toolset) = toolset
                .as_ref()
                .filter(|_| offer_tools && response.wants_tools())
            else {
                break response;
            };
            status.tool_calling();
            debug!(round, calls = response.tool_calls.len(), "agent calling tools");
            messages.push(LlmMessage::assistant_tool_calls(
                &response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let output = call_tool(
                    &toolset.session,
                    steps,
                    &input.step_name(&format!("tool-{round}-{}", call.id)),
                    &call.name,
                    call.arguments.clone(),
                )
                .await?;
                messages.push(LlmMessage::tool_result(&call.id, output));
                tool_calls_made += 1;
            }
            round += 1;
        };

        let has_reply = !response.content.trim().is_empty();
        if let Some((settings, store)) = memory.as_ref().filter(|_| has_reply) {
            let turn = Message::assistant(&settings.session_id, &response.content);
            MemorySettings::save(store, steps, &input.step_name("save-assistant"), turn).await?;
        }

        let mut result = json!({
            "response": response.content,
            "model": model.model,
            "provider": model.provider.as_str(),
            "chatHistoryLength": chat_history_length,
        });
        if let Some(toolset) = &toolset {
            let names: Vec<&str> = toolset.tools.iter().map(|t| t.name.as_str()).collect();
            result["tools"] = json!({
                "serverUrl": toolset.server_url,
                "toolCount": toolset.tools.len(),
                "toolNames": names,
                "toolCalls": tool_calls_made,
            });
        }
        if let Some((settings, _)) = &memory {
            result["memory"] = json!({
                "type": "postgres",
                "sessionId": settings.session_id,
                "tableName": settings.table_name,
            });
        }

        Ok(input
            .context
            .with_variable(variable, result)
            .without_internal_keys())
    }
}

#[async_trait]
impl NodeExecutor for AgentOrchestrator {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        status.loading();
        let mut resources = OpenResources::default();
        let result = self.run(&input, &status, &mut resources).await;
        resources.release().await;

        match result {
            Ok(context) => {
                status.success();
                Ok(context)
            }
            Err(e) => {
                status.error();
                warn!(node_id = %input.node.id, error = %e, "agent failed");
                Err(abort(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_ai::{
        LlmError, LlmProvider, MessageRole as LlmRole, ScriptedBackend, TokenUsage, ToolCall,
    };
    use nodeflow_conversation::{InMemoryConnector, InMemoryConversationStore};
    use nodeflow_core::{CredentialId, UserId};
    use nodeflow_integration::{
        Credential, CredentialType, InMemoryCredentialStore, StaticToolProvider,
    };
    use nodeflow_workflow::{Connection, ImmediateSteps, NodeStatus, RecordingStatusPublisher};

    struct Harness {
        backend: ScriptedBackend,
        credentials: InMemoryCredentialStore,
        store: InMemoryConversationStore,
        tools: StaticToolProvider,
        owner: UserId,
    }

    impl Harness {
        fn new(backend: ScriptedBackend) -> Self {
            Self {
                backend,
                credentials: InMemoryCredentialStore::new(),
                store: InMemoryConversationStore::new(),
                tools: StaticToolProvider::new().with_tool("weather", Ok("sunny".to_string())),
                owner: UserId::new(),
            }
        }

        async fn api_key(&self) -> CredentialId {
            self.credentials.api_key(self.owner, "sk-test").await
        }

        async fn dsn(&self) -> CredentialId {
            self.credentials
                .insert(
                    Credential::new(self.owner, "db", CredentialType::ConnectionString),
                    "postgres://db/app",
                )
                .await
        }

        fn agent(&self) -> AgentOrchestrator {
            AgentOrchestrator::new(
                NodeServices::new(
                    Arc::new(self.credentials.clone()),
                    Arc::new(self.backend.clone()),
                )
                .with_conversations(Arc::new(InMemoryConnector::new(self.store.clone())))
                .with_tools(Arc::new(self.tools.clone())),
            )
        }

        async fn run(
            &self,
            workflow: &Workflow,
            context: ExecutionContext,
        ) -> (Result<ExecutionContext, NodeError>, RecordingStatusPublisher) {
            let recorder = RecordingStatusPublisher::new();
            let hub = workflow.node(&NodeId::new("agent")).expect("hub node");
            let result = self
                .agent()
                .execute(ExecutorInput {
                    node: hub,
                    workflow,
                    user_id: self.owner,
                    context,
                    steps: Arc::new(ImmediateSteps),
                    status: Arc::new(recorder.clone()),
                })
                .await;
            (result, recorder)
        }
    }

    fn hub(data: serde_json::Value) -> Node {
        Node::new("agent", NodeType::AiAgent).with_data(data)
    }

    fn tool_request(id: &str) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: "weather".to_string(),
                arguments: json!({"city": "Oslo"}),
            }],
            usage: TokenUsage::default(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[tokio::test]
    async fn remembers_the_turn_in_the_connected_store() {
        let h = Harness::new(
            ScriptedBackend::new(LlmProvider::OpenAi)
                .then(Ok(LlmResponse::text("gpt-4o-mini", "Hi again!"))),
        );
        h.store.append(&Message::user("s1", "earlier question")).await.unwrap();
        h.store.append(&Message::assistant("s1", "earlier answer")).await.unwrap();
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("model", NodeType::OpenAi)
                    .with_credential(h.api_key().await)
                    .with_data(json!({"userPrompt": "{{ question }}"})),
            )
            .with_node(
                Node::new("memory", NodeType::Postgres)
                    .with_credential(h.dsn().await)
                    .with_data(json!({"sessionId": "s1"})),
            )
            .with_node(hub(json!({"variableName": "assistant"})))
            .with_connection(Connection::new("model", "agent").into_slot(MODEL_SLOT))
            .with_connection(Connection::new("memory", "agent").into_slot(DATABASE_SLOT));
        let context = ExecutionContext::new()
            .with_variable("question", json!("hello"))
            .with_variable("__pending", json!(true));

        let (result, recorder) = h.run(&workflow, context).await;
        let ctx = result.unwrap();

        let out = ctx.get("assistant").unwrap();
        assert_eq!(out["chatHistoryLength"], 2);
        assert_eq!(out["response"], "Hi again!");
        assert_eq!(out["provider"], "openai");
        assert_eq!(out["model"], "gpt-4o-mini");
        assert_eq!(
            out["memory"],
            json!({"type": "postgres", "sessionId": "s1", "tableName": "chat_history"})
        );
        assert!(out.get("tools").is_none());
        assert!(!ctx.contains("__pending"));

        let stored = h.store.messages("s1").await;
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[2].content, "hello");
        assert_eq!(stored[2].role, MessageRole::User);
        assert_eq!(stored[3].content, "Hi again!");
        assert_eq!(stored[3].role, MessageRole::Assistant);
        assert_eq!(h.backend.requests()[0].messages.len(), 3);
        assert_eq!(h.store.close_count(), 1);
        assert_eq!(
            recorder.statuses_for(&NodeId::new("agent")),
            vec![NodeStatus::Loading, NodeStatus::Success]
        );
    }

    #[tokio::test]
    async fn unlabeled_adapters_are_matched_by_type() {
        let h = Harness::new(ScriptedBackend::new(LlmProvider::Gemini));
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("model", NodeType::Gemini)
                    .with_credential(h.api_key().await)
                    .with_data(json!({"userPrompt": "ping"})),
            )
            .with_node(Node::new("trigger", NodeType::ManualTrigger))
            .with_node(hub(json!({"variableName": "reply"})))
            .with_connection(Connection::new("trigger", "agent"))
            .with_connection(Connection::new("model", "agent"));

        let ctx = h.run(&workflow, ExecutionContext::new()).await.0.unwrap();

        assert_eq!(ctx.get("reply").unwrap()["response"], "echo: ping");
        assert_eq!(ctx.get("reply").unwrap()["provider"], "gemini");
    }

    #[tokio::test]
    async fn labeled_slot_wins_over_type_match() {
        let h = Harness::new(ScriptedBackend::new(LlmProvider::Anthropic));
        let key = h.api_key().await;
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("legacy", NodeType::OpenAi)
                    .with_credential(key)
                    .with_data(json!({"userPrompt": "a"})),
            )
            .with_node(
                Node::new("labeled", NodeType::Anthropic)
                    .with_credential(key)
                    .with_data(json!({"userPrompt": "b"})),
            )
            .with_node(hub(json!({"variableName": "reply"})))
            .with_connection(Connection::new("legacy", "agent"))
            .with_connection(Connection::new("labeled", "agent").into_slot(MODEL_SLOT));

        let slots = AgentSlots::discover(&workflow, &NodeId::new("agent"));
        assert_eq!(slots.model.map(|n| n.id.as_str()), Some("labeled"));

        let ctx = h.run(&workflow, ExecutionContext::new()).await.0.unwrap();
        assert_eq!(ctx.get("reply").unwrap()["provider"], "anthropic");
    }

    #[tokio::test]
    async fn runs_requested_tools_then_answers() {
        let h = Harness::new(
            ScriptedBackend::new(LlmProvider::OpenAi)
                .then(Ok(tool_request("c1")))
                .then(Ok(LlmResponse::text("gpt-4o-mini", "It is sunny in Oslo"))),
        );
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("model", NodeType::OpenAi)
                    .with_credential(h.api_key().await)
                    .with_data(json!({"userPrompt": "Weather in Oslo?"})),
            )
            .with_node(
                Node::new("tools", NodeType::McpTools)
                    .with_data(json!({"serverUrl": "http://mcp.local/mcp"})),
            )
            .with_node(hub(json!({"variableName": "reply"})))
            .with_connection(Connection::new("model", "agent").into_slot(MODEL_SLOT))
            .with_connection(Connection::new("tools", "agent").into_slot(TOOLS_SLOT));

        let (result, recorder) = h.run(&workflow, ExecutionContext::new()).await;
        let reply = result.unwrap().get("reply").cloned().unwrap();

        assert_eq!(reply["response"], "It is sunny in Oslo");
        assert_eq!(
            reply["tools"],
            json!({
                "serverUrl": "http://mcp.local/mcp",
                "toolCount": 1,
                "toolNames": ["weather"],
                "toolCalls": 1,
            })
        );
        assert_eq!(
            h.tools.calls(),
            vec![("weather".to_string(), json!({"city": "Oslo"}))]
        );
        let requests = h.backend.requests();
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[1].messages.last().unwrap().role, LlmRole::Tool);
        assert_eq!(h.tools.close_count(), 1);
        assert_eq!(
            recorder.statuses_for(&NodeId::new("agent")),
            vec![NodeStatus::Loading, NodeStatus::ToolCalling, NodeStatus::Success]
        );
    }

    #[tokio::test]
    async fn tool_rounds_are_bounded_by_max_steps() {
        let h = Harness::new(
            ScriptedBackend::new(LlmProvider::OpenAi)
                .then(Ok(tool_request("c1")))
                .then(Ok(tool_request("c2"))),
        );
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("model", NodeType::OpenAi)
                    .with_credential(h.api_key().await)
                    .with_data(json!({"userPrompt": "loop"})),
            )
            .with_node(
                Node::new("tools", NodeType::McpTools)
                    .with_data(json!({"serverUrl": "http://mcp.local/mcp"})),
            )
            .with_node(hub(json!({"variableName": "reply", "maxSteps": 2})))
            .with_connection(Connection::new("model", "agent").into_slot(MODEL_SLOT))
            .with_connection(Connection::new("tools", "agent").into_slot(TOOLS_SLOT));

        let ctx = h.run(&workflow, ExecutionContext::new()).await.0.unwrap();

        assert_eq!(ctx.get("reply").unwrap()["tools"]["toolCalls"], 1);
        let requests = h.backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tools.is_empty());
    }

    #[tokio::test]
    async fn failures_are_wrapped_and_resources_closed_once() {
        let h =
            Harness::new(ScriptedBackend::new(LlmProvider::OpenAi).then(Err(LlmError::Timeout)));
        let workflow = Workflow::new("wf", h.owner)
            .with_node(
                Node::new("model", NodeType::OpenAi)
                    .with_credential(h.api_key().await)
                    .with_data(json!({"userPrompt": "hi"})),
            )
            .with_node(
                Node::new("tools", NodeType::McpTools)
                    .with_data(json!({"serverUrl": "http://mcp.local/mcp"})),
            )
            .with_node(hub(json!({"variableName": "reply"})))
            .with_connection(Connection::new("model", "agent").into_slot(MODEL_SLOT))
            .with_connection(Connection::new("tools", "agent").into_slot(TOOLS_SLOT));

        let (result, recorder) = h.run(&workflow, ExecutionContext::new()).await;
        let err = result.unwrap_err();

        assert!(matches!(err, NodeError::Failed { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(h.tools.close_count(), 1);
        assert_eq!(
            recorder.statuses_for(&NodeId::new("agent")),
            vec![NodeStatus::Loading, NodeStatus::Error]
        );
    }

    #[tokio::test]
    async fn a_chat_model_is_required() {
        let h = Harness::new(ScriptedBackend::new(LlmProvider::OpenAi));
        let workflow =
            Workflow::new("wf", h.owner).with_node(hub(json!({"variableName": "reply"})));

        let (result, recorder) = h.run(&workflow, ExecutionContext::new()).await;

        assert!(matches!(result.unwrap_err(), NodeError::Configuration { .. }));
        assert_eq!(
            recorder.statuses_for(&NodeId::new("agent")),
            vec![NodeStatus::Loading, NodeStatus::Error]
        );
    }
}
