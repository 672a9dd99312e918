//! The HTTP request action.

use crate::services::NodeServices;
use async_trait::async_trait;
use nodeflow_workflow::{
    ExecutionContext, ExecutorInput, NodeError, NodeExecutor, step_fn, validated, with_status,
};
use reqwest::{Method, Response, StatusCode};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

/// Sends a request and binds `{status, statusText, data}`.
#[derive(Clone)]
pub struct HttpRequestExecutor {
    services: NodeServices,
}

impl HttpRequestExecutor {
    #[must_use]
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

fn parse_method(raw: Option<&str>) -> Result<Method, NodeError> {
    match raw.map(str::to_ascii_uppercase).as_deref() {
        None | Some("GET") => Ok(Method::GET),
        Some("POST") => Ok(Method::POST),
        Some("PUT") => Ok(Method::PUT),
        Some("PATCH") => Ok(Method::PATCH),
        Some("DELETE") => Ok(Method::DELETE),
        Some(other) => Err(NodeError::configuration(format!(
            "unsupported HTTP method: {other}"
        ))),
    }
}

fn sends_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Classifies a transport failure.
pub(crate) fn send_error(e: &reqwest::Error) -> NodeError {
    if e.is_timeout() || e.is_connect() {
        NodeError::transient(e.to_string())
    } else {
        NodeError::failed(e.to_string())
    }
}

/// Rejects non-2xx responses; 429 and 5xx are transient.
pub(crate) async fn check_response(response: Response) -> Result<Response, NodeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = format!("request failed with status {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(NodeError::transient(reason))
    } else {
        Err(NodeError::failed(reason))
    }
}

async fn read_data(response: Response) -> Result<JsonValue, NodeError> {
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));
    let text = response.text().await.map_err(|e| send_error(&e))?;
    if is_json && !text.is_empty() {
        serde_json::from_str(&text)
            .map_err(|e| NodeError::failed(format!("invalid JSON response: {e}")))
    } else {
        Ok(JsonValue::String(text))
    }
}

/// A request whose fields have been checked and rendered.
struct PreparedRequest {
    variable: String,
    endpoint: String,
    method: Method,
    body: Option<JsonValue>,
}

impl HttpRequestExecutor {
    fn prepare(&self, input: &ExecutorInput<'_>) -> Result<PreparedRequest, NodeError> {
        let variable = input.variable_name()?.to_string();
        let endpoint = self
            .services
            .render(input.required_str("endpoint")?, &input.context)?;
        let method = parse_method(input.node.data_str("method"))?;
        let body = match input.node.data_str("body") {
            Some(template) if sends_body(&method) => {
                let rendered = self.services.render(template, &input.context)?;
                Some(serde_json::from_str::<JsonValue>(&rendered).map_err(|e| {
                    NodeError::configuration(format!("body is not valid JSON: {e}"))
                })?)
            }
            _ => None,
        };
        Ok(PreparedRequest {
            variable,
            endpoint,
            method,
            body,
        })
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
        let status = input.status_handle();
        let PreparedRequest {
            variable,
            endpoint,
            method,
            body,
        } = validated(&status, self.prepare(&input))?;

        let http = self.services.http.clone();
        let result = with_status(
            &status,
            input.steps.run(
                &input.step_name("http-request"),
                step_fn(move || {
                    let http = http.clone();
                    let endpoint = endpoint.clone();
                    let method = method.clone();
                    let body = body.clone();
                    async move {
                        debug!(%method, %endpoint, "sending HTTP request");
                        let mut request = http.request(method, &endpoint);
                        if let Some(body) = &body {
                            request = request.json(body);
                        }
                        let response = request.send().await.map_err(|e| send_error(&e))?;
                        let response = check_response(response).await?;
                        let code = response.status();
                        let data = read_data(response).await?;
                        Ok(json!({
                            "status": code.as_u16(),
                            "statusText": code.canonical_reason().unwrap_or_default(),
                            "data": data,
                        }))
                    }
                }),
            ),
        )
        .await?;

        Ok(input.context.with_variable(variable, result))
    }
}
