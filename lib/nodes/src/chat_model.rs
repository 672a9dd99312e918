//! Chat-model adapters.
//!
//! A chat-model node either runs on its own, answering its user prompt, or
//! feeds an agent hub, which reads the same settings through
//! [`ModelSettings`].

use crate::convert::{from_step_value, llm_error, to_step_value};
use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_ai::{LlmBackend, LlmMessage, LlmProvider, LlmRequest, LlmResponse};
use nodeflow_core::UserId;
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, GenerationTelemetry, Node, NodeError, NodeExecutor, NodeType,
    StepRunner, step_fn, with_status,
};
use serde_json::json;
use std::sync::Arc;

/// The provider behind a chat-model node type.
#[must_use]
pub fn provider_for(node_type: NodeType) -> Option<LlmProvider> {
    match node_type {
        NodeType::OpenAi => Some(LlmProvider::OpenAi),
        NodeType::Anthropic => Some(LlmProvider::Anthropic),
        NodeType::Gemini => Some(LlmProvider::Gemini),
        _ => None,
    }
}

/// A chat-model node's settings, rendered and bound to its owner's key.
pub(crate) struct ModelSettings {
    pub(crate) provider: LlmProvider,
    pub(crate) model: String,
    pub(crate) system_prompt: Option<String>,
    /// Rendered user prompt; empty if the node has none.
    pub(crate) user_prompt: String,
    pub(crate) temperature: Option<f32>,
    pub(crate) backend: Arc<dyn LlmBackend>,
}

impl ModelSettings {
    pub(crate) async fn resolve(
        node: &Node,
        owner_id: UserId,
        context: &ExecutionContext,
        services: &NodeServices,
    ) -> Result<Self, NodeError> {
        let provider = provider_for(node.node_type).ok_or_else(|| {
            NodeError::configuration(format!("{} is not a chat model", node.node_type))
        })?;
        let model = node
            .data_str("model")
            .unwrap_or(provider.default_model())
            .to_string();
        let system_prompt = node
            .data_str("systemPrompt")
            .map(|t| services.render(t, context))
            .transpose()?
            .filter(|s| !s.trim().is_empty());
        let user_prompt = node
            .data_str("userPrompt")
            .map(|t| services.render(t, context))
            .transpose()?
            .unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        let temperature = node
            .data
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|t| t as f32);
        let api_key = services.secret(node, owner_id).await?;

        Ok(Self {
            provider,
            model,
            system_prompt,
            user_prompt,
            temperature,
            backend: services.llm.backend(provider, &api_key),
        })
    }

    /// A request carrying the system prompt and the given messages.
    pub(crate) fn request(&self, messages: Vec<LlmMessage>) -> LlmRequest {
        let mut request = LlmRequest::new(&self.model).with_messages(messages);
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    /// Runs one generation as a checkpointed step.
    pub(crate) async fn generate(
        &self,
        steps: &dyn StepRunner,
        step_name: &str,
        request: LlmRequest,
    ) -> Result<LlmResponse, NodeError> {
        let backend = self.backend.clone();
        let telemetry = GenerationTelemetry {
            provider: self.provider.as_str().to_string(),
            model: self.model.clone(),
        };
        let value = steps
            .run_generation(
                step_name,
                telemetry,
                step_fn(move || {
                    let backend = backend.clone();
                    let request = request.clone();
                    async move {
                        let response = backend
                            .generate(&request)
                            .await
                            .map_err(|e| llm_error(&e))?;
                        to_step_value(&response)
                    }
                }),
            )
            .await?;
        from_step_value(value)
    }
}

/// Answers the node's user prompt with one generation.
#[derive(Clone)]
pub struct ChatModelExecutor {
    services: NodeServices,
}

impl ChatModelExecutor {
    #[must_use]
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeExecutor for ChatModelExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        with_status(&status, async {
            let variable = input.variable_name()?;
            input.required_str("userPrompt")?;
            let settings =
                ModelSettings::resolve(input.node, input.user_id, &input.context, &self.services)
                    .await?;
            let request = settings.request(vec![LlmMessage::user(&settings.user_prompt)]);
            let response = settings
                .generate(input.steps.as_ref(), &input.step_name("generate"), request)
                .await?;

            Ok(input
                .context
                .with_variable(variable, json!({"text": response.content})))
        })
        .await
    }
}
