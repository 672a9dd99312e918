//! OpenAI chat completions backend.
//!
//! Also serves Gemini, which exposes the same wire format under its own
//! base URL.

use crate::backend::{
    LlmBackend, LlmMessage, LlmProvider, LlmRequest, LlmResponse, MessageRole, TokenUsage,
    ToolCall, ToolDefinition,
};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

/// OpenAI-compatible chat backend.
pub struct OpenAiBackend {
    http: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    #[must_use]
    pub fn new(
        http: Client,
        provider: LlmProvider,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            provider,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Deserialize, Debug)]
struct OaiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OaiToolCall {
    id: String,
    r#type: String,
    function: OaiFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OaiFunction {
    name: String,
    /// JSON-encoded arguments object.
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: JsonValue,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: OaiMessage,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn convert_messages(system: Option<&str>, messages: &[LlmMessage]) -> Vec<OaiMessage> {
    let system = system.filter(|s| !s.is_empty()).map(|s| OaiMessage {
        role: "system".to_string(),
        content: Some(s.to_string()),
        tool_calls: None,
        tool_call_id: None,
    });

    system
        .into_iter()
        .chain(messages.iter().map(|msg| match msg.role {
            MessageRole::Assistant if !msg.tool_calls.is_empty() => OaiMessage {
                role: "assistant".to_string(),
                content: (!msg.content.is_empty()).then(|| msg.content.clone()),
                tool_calls: Some(
                    msg.tool_calls
                        .iter()
                        .map(|call| OaiToolCall {
                            id: call.id.clone(),
                            r#type: "function".to_string(),
                            function: OaiFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                ),
                tool_call_id: None,
            },
            role => OaiMessage {
                role: role_name(role).to_string(),
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            },
        }))
        .collect()
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn parse_arguments(arguments: String) -> JsonValue {
    serde_json::from_str(&arguments).unwrap_or(JsonValue::String(arguments))
}

/// Turns an error status into an [`LlmError`], passing successes through.
pub(crate) async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(LlmError::RateLimited { retry_after_secs });
    }
    let message = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest {
            model: &request.model,
            messages: convert_messages(request.system.as_deref(), &request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: convert_tools(&request.tools),
        };
        debug!(provider = %self.provider, model = %request.model, "sending chat completion");

        let provider = self.provider.as_str();
        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(provider, &e))?;
        let parsed: ChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(provider, &e))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::ResponseParseFailed {
                reason: "response contained no choices".to_string(),
            })?;
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(LlmResponse {
            content: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(call.function.arguments),
                })
                .collect(),
            usage,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
        })
    }

    fn provider(&self) -> LlmProvider {
        self.provider
    }
}
