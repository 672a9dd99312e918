//! Anthropic Messages API backend.

use crate::backend::{
    LlmBackend, LlmMessage, LlmProvider, LlmRequest, LlmResponse, MessageRole, TokenUsage,
    ToolCall,
};
use crate::error::LlmError;
use crate::openai::check_status;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicBackend {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicBackend {
    #[must_use]
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: JsonValue,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: JsonValue,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: JsonValue,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Converts messages to the Messages API shape.
///
/// Tool results travel as user messages; consecutive results are merged into
/// one message so roles keep alternating.
fn convert_messages(messages: &[LlmMessage]) -> Vec<ApiMessage> {
    let mut converted: Vec<ApiMessage> = Vec::new();
    for msg in messages {
        match msg.role {
            // Carried in the top-level system field
            MessageRole::System => {}
            MessageRole::User => converted.push(ApiMessage {
                role: "user",
                content: JsonValue::String(msg.content.clone()),
            }),
            MessageRole::Assistant if msg.tool_calls.is_empty() => converted.push(ApiMessage {
                role: "assistant",
                content: JsonValue::String(msg.content.clone()),
            }),
            MessageRole::Assistant => {
                let text = (!msg.content.is_empty())
                    .then(|| json!({"type": "text", "text": msg.content}));
                let blocks = text
                    .into_iter()
                    .chain(msg.tool_calls.iter().map(|call| {
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        })
                    }))
                    .collect();
                converted.push(ApiMessage {
                    role: "assistant",
                    content: JsonValue::Array(blocks),
                });
            }
            MessageRole::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                });
                match converted.last_mut() {
                    Some(ApiMessage {
                        role: "user",
                        content: JsonValue::Array(blocks),
                    }) => blocks.push(block),
                    _ => converted.push(ApiMessage {
                        role: "user",
                        content: JsonValue::Array(vec![block]),
                    }),
                }
            }
        }
    }
    converted
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.as_deref().filter(|s| !s.is_empty()),
            temperature: request.temperature,
            messages: convert_messages(&request.messages),
            tools: request
                .tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
        };
        debug!(model = %request.model, "sending anthropic message");

        let response = self
            .http
            .post(self.url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest("anthropic", &e))?;
        let parsed: MessagesResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest("anthropic", &e))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ContentBlock::Other => {}
            }
        }

        Ok(LlmResponse {
            content,
            tool_calls,
            usage: parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
        })
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Anthropic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let messages = vec![
            LlmMessage::user("weather in two cities"),
            LlmMessage::assistant_tool_calls(
                "checking",
                vec![
                    ToolCall {
                        id: "t1".to_string(),
                        name: "weather".to_string(),
                        arguments: json!({"city": "Oslo"}),
                    },
                    ToolCall {
                        id: "t2".to_string(),
                        name: "weather".to_string(),
                        arguments: json!({"city": "Lima"}),
                    },
                ],
            ),
            LlmMessage::tool_result("t1", "cold"),
            LlmMessage::tool_result("t2", "warm"),
        ];

        let converted = convert_messages(&messages);

        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1].content[0], json!({"type": "text", "text": "checking"}));
        assert_eq!(converted[1].content[2]["input"], json!({"city": "Lima"}));
        assert_eq!(converted[2].role, "user");
        assert_eq!(converted[2].content.as_array().map(Vec::len), Some(2));
        assert_eq!(converted[2].content[1]["tool_use_id"], "t2");
    }

    #[tokio::test]
    async fn parses_text_and_tool_use_blocks() {
        async fn handler(headers: HeaderMap, Json(body): Json<JsonValue>) -> Json<JsonValue> {
            assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
            assert_eq!(body["system"], "be brief");
            assert_eq!(body["max_tokens"], 1024);
            Json(json!({
                "model": "claude-3-5-sonnet-latest",
                "content": [
                    {"type": "text", "text": "Let me look."},
                    {"type": "tool_use", "id": "tu_1", "name": "search", "input": {"q": "rust"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 5}
            }))
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/v1/messages", post(handler)))
                .await
                .unwrap();
        });

        let backend = AnthropicBackend::new(Client::new(), format!("http://{addr}"), "sk-ant");
        let response = backend
            .generate(
                &LlmRequest::new("claude-3-5-sonnet-latest")
                    .with_system("be brief")
                    .with_message(LlmMessage::user("search rust")),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "Let me look.");
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.usage.total(), 25);
    }
}
