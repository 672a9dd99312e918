//! HTTP routes.
//!
//! Authentication happens upstream; the caller's user id arrives in the
//! `x-user-id` header.

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nodeflow_core::{UserId, WorkflowId};
use nodeflow_workflow::{
    BroadcastStatusPublisher, Execution, NodeId, WorkflowOrchestrator, WorkflowTrigger,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Header carrying a caller-chosen correlation id, e.g. a webhook event id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Header carrying the authenticated caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub trigger: WorkflowTrigger,
    pub status: BroadcastStatusPublisher,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>, status: BroadcastStatusPublisher) -> Self {
        Self {
            trigger: WorkflowTrigger::new(orchestrator.clone()),
            orchestrator,
            status,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/workflows/{workflow_id}/executions",
            post(trigger_execution),
        )
        .route(
            "/api/workflows/{workflow_id}/nodes/{node_id}/test",
            post(test_node),
        )
        .route("/api/executions/{correlation_id}", get(get_execution))
        .route("/api/status/events", get(status_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerResponse {
    correlation_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerParams {
    /// Wait for the run to finish and answer with its record.
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestNodeRequest {
    #[serde(default)]
    mock_context: Option<JsonValue>,
}

async fn healthz() -> &'static str {
    "ok"
}

/// Enqueues a run and answers before it starts, unless `?wait=true`.
async fn trigger_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(params): Query<TriggerParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let workflow_id = parse_workflow_id(&workflow_id)?;
    let initial_data = parse_optional_json::<JsonValue>(&body)?;

    let run = match header_str(&headers, CORRELATION_ID_HEADER) {
        Some(correlation_id) => state.trigger.trigger_with_correlation(
            correlation_id.to_string(),
            workflow_id,
            initial_data,
        ),
        None => state.trigger.trigger_workflow(workflow_id, initial_data),
    };
    info!(%workflow_id, correlation_id = %run.correlation_id, "run enqueued");

    if !params.wait {
        let accepted = Json(TriggerResponse {
            correlation_id: run.correlation_id,
        });
        return Ok((StatusCode::ACCEPTED, accepted).into_response());
    }

    let execution = run
        .handle
        .await
        .map_err(|e| ApiError::Internal {
            details: format!("run task failed: {e}"),
        })??;
    Ok(Json(execution).into_response())
}

async fn test_node(
    State(state): State<AppState>,
    Path((workflow_id, node_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&workflow_id)?;
    let caller_id = header_str(&headers, USER_ID_HEADER)
        .ok_or_else(|| ApiError::BadRequest {
            reason: format!("missing {USER_ID_HEADER} header"),
        })
        .and_then(|raw| {
            UserId::from_str(raw).map_err(|e| ApiError::BadRequest {
                reason: e.to_string(),
            })
        })?;
    let request = parse_optional_json::<TestNodeRequest>(&body)?.unwrap_or_default();

    let output = state
        .orchestrator
        .execute_node_for_test(
            workflow_id,
            &NodeId::new(node_id),
            caller_id,
            request.mock_context,
        )
        .await?;
    Ok(Json(output))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    state
        .orchestrator
        .executions()
        .find(&correlation_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound {
            what: format!("execution {correlation_id}"),
        })
}

/// Streams node status changes as they are published.
///
/// Slow subscribers skip the events they missed.
async fn status_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.status.subscribe()).filter_map(|received| {
        let event = match received {
            Ok(event) => event,
            Err(lagged) => {
                debug!(error = %lagged, "status subscriber lagged");
                return None;
            }
        };
        Event::default()
            .event(event.channel.clone())
            .json_data(&event)
            .ok()
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    WorkflowId::from_str(raw).map_err(|e| ApiError::BadRequest {
        reason: e.to_string(),
    })
}

/// An empty body is `None`; anything else must be valid JSON.
fn parse_optional_json<T: serde::de::DeserializeOwned>(
    body: &[u8],
) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadRequest {
            reason: format!("invalid JSON body: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use nodeflow_ai::{LlmProvider, ScriptedBackend};
    use nodeflow_integration::InMemoryCredentialStore;
    use nodeflow_nodes::{NodeServices, default_registry};
    use nodeflow_workflow::{
        Connection, ExecutionStatus, InMemoryExecutionStore, InMemoryWorkflowRepository, Node,
        NodeType, Workflow,
    };
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        owner: UserId,
        workflow_id: WorkflowId,
    }

    async fn fixture() -> Fixture {
        let owner = UserId::new();
        let credentials = InMemoryCredentialStore::new();
        let api_key = credentials.api_key(owner, "sk-test").await;
        let services = NodeServices::new(
            Arc::new(credentials),
            Arc::new(ScriptedBackend::new(LlmProvider::OpenAi)),
        );

        let workflow = Workflow::new("greeter", owner)
            .with_node(Node::new("start", NodeType::ManualTrigger))
            .with_node(
                Node::new("model", NodeType::OpenAi)
                    .with_data(json!({
                        "variableName": "reply",
                        "userPrompt": "hi {{ name }}",
                    }))
                    .with_credential(api_key),
            )
            .with_connection(Connection::new("start", "model"));
        let workflow_id = workflow.id;
        let workflows = InMemoryWorkflowRepository::new();
        workflows.insert(workflow).await;

        let status = BroadcastStatusPublisher::new(16);
        let orchestrator = WorkflowOrchestrator::new(
            Arc::new(workflows),
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(default_registry(&services)),
        )
        .with_status_publisher(Arc::new(status.clone()));

        Fixture {
            app: router(AppState::new(Arc::new(orchestrator), status)),
            owner,
            workflow_id,
        }
    }

    async fn body_json(response: axum::response::Response) -> JsonValue {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn trigger_accepts_and_the_run_is_recorded() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .clone()
            .oneshot(
                Request::post(format!("/api/workflows/{}/executions", fixture.workflow_id))
                    .header(CORRELATION_ID_HEADER, "evt-42")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "Ada"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["correlationId"], "evt-42");

        let mut execution = JsonValue::Null;
        for _ in 0..100 {
            let response = fixture
                .app
                .clone()
                .oneshot(
                    Request::get("/api/executions/evt-42")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                execution = body_json(response).await;
                if execution["status"] != ExecutionStatus::Running.as_str() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(execution["status"], "SUCCESS");
        assert_eq!(execution["output"]["reply"]["text"], "echo: hi Ada");
    }

    #[tokio::test]
    async fn trigger_without_a_header_generates_a_correlation_id() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!("/api/workflows/{}/executions", fixture.workflow_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let correlation_id = body_json(response).await["correlationId"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(correlation_id.starts_with("run_"));
    }

    #[tokio::test]
    async fn waiting_trigger_returns_the_finished_record() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/executions?wait=true",
                    fixture.workflow_id
                ))
                .body(Body::from(r#"{"name": "Lin"}"#))
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let execution = body_json(response).await;
        assert_eq!(execution["status"], "SUCCESS");
        assert_eq!(execution["output"]["reply"]["text"], "echo: hi Lin");
    }

    #[tokio::test]
    async fn waiting_trigger_of_an_unknown_workflow_is_not_found() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/executions?wait=true",
                    WorkflowId::new()
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_workflow_id_is_a_bad_request() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post("/api/workflows/not-an-id/executions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn node_test_returns_the_declared_variable() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/nodes/model/test",
                    fixture.workflow_id
                ))
                .header(USER_ID_HEADER, fixture.owner.to_string())
                .header("content-type", "application/json")
                .body(Body::from(r#"{"mockContext": {"name": "Grace"}}"#))
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"text": "echo: hi Grace"}));
    }

    #[tokio::test]
    async fn node_test_by_another_user_is_forbidden() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/nodes/model/test",
                    fixture.workflow_id
                ))
                .header(USER_ID_HEADER, UserId::new().to_string())
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn node_test_of_a_trigger_is_unprocessable() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/nodes/start/test",
                    fixture.workflow_id
                ))
                .header(USER_ID_HEADER, fixture.owner.to_string())
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn node_test_requires_a_caller() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::post(format!(
                    "/api/workflows/{}/nodes/model/test",
                    fixture.workflow_id
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let fixture = fixture().await;
        let response = fixture
            .app
            .oneshot(
                Request::get("/api/executions/evt-missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn blank_bodies_parse_as_absent() {
        assert_eq!(parse_optional_json::<JsonValue>(b"  \n").unwrap(), None);
        assert_eq!(
            parse_optional_json::<JsonValue>(br#"{"a":1}"#).unwrap(),
            Some(json!({"a": 1}))
        );
        assert!(parse_optional_json::<JsonValue>(b"{oops").is_err());
    }
}
