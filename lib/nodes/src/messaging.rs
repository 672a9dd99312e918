//! Chat webhook actions.

use crate::http_request::{check_response, send_error};
use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, NodeError, NodeExecutor, step_fn, validated, with_status,
};
use serde_json::{Value as JsonValue, json};

/// Discord rejects longer messages.
const DISCORD_MAX_CHARS: usize = 2000;

/// Which webhook flavour to post to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Discord,
    Slack,
}

impl WebhookKind {
    fn label(self) -> &'static str {
        match self {
            Self::Discord => "discord-message",
            Self::Slack => "slack-message",
        }
    }

    fn payload(self, content: &str, username: Option<&str>) -> JsonValue {
        match self {
            Self::Discord => {
                let mut body = json!({"content": content});
                if let Some(username) = username {
                    body["username"] = json!(username);
                }
                body
            }
            Self::Slack => json!({"text": content}),
        }
    }

    fn prepare(self, content: String) -> String {
        match self {
            Self::Discord if content.chars().count() > DISCORD_MAX_CHARS => {
                content.chars().take(DISCORD_MAX_CHARS).collect()
            }
            _ => content,
        }
    }
}

/// Posts templated content to a Discord or Slack webhook.
#[derive(Clone)]
pub struct WebhookMessageExecutor {
    kind: WebhookKind,
    services: NodeServices,
}

impl WebhookMessageExecutor {
    #[must_use]
    pub fn discord(services: NodeServices) -> Self {
        Self {
            kind: WebhookKind::Discord,
            services,
        }
    }

    #[must_use]
    pub fn slack(services: NodeServices) -> Self {
        Self {
            kind: WebhookKind::Slack,
            services,
        }
    }
}

/// A message whose fields have been checked and rendered.
struct PreparedMessage {
    variable: String,
    webhook_url: String,
    content: String,
    payload: JsonValue,
}

impl WebhookMessageExecutor {
    fn prepare(&self, input: &ExecutorInput<'_>) -> Result<PreparedMessage, NodeError> {
        let variable = input.variable_name()?.to_string();
        let webhook_url = input.required_str("webhookUrl")?.to_string();
        let content = self
            .services
            .render(input.required_str("content")?, &input.context)?;
        let content = self.kind.prepare(content);
        let payload = self
            .kind
            .payload(&content, input.node.data_str("username"));
        Ok(PreparedMessage {
            variable,
            webhook_url,
            content,
            payload,
        })
    }
}

#[async_trait]
impl NodeExecutor for WebhookMessageExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        let PreparedMessage {
            variable,
            webhook_url,
            content,
            payload,
        } = validated(&status, self.prepare(&input))?;

        let http = self.services.http.clone();
        with_status(
            &status,
            input.steps.run(
                &input.step_name(self.kind.label()),
                step_fn(move || {
                    let http = http.clone();
                    let webhook_url = webhook_url.clone();
                    let payload = payload.clone();
                    async move {
                        let response = http
                            .post(&webhook_url)
                            .json(&payload)
                            .send()
                            .await
                            .map_err(|e| send_error(&e))?;
                        check_response(response).await?;
                        Ok(JsonValue::Null)
                    }
                }),
            ),
        )
        .await?;

        Ok(input
            .context
            .with_variable(variable, json!({"messageContent": content})))
    }
}
