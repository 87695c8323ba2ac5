//! HTTP API — the REST surface over the session store.
//!
//! Endpoints:
//!
//! - `POST /v1/sessions`              — Submit a goal, get a session id
//! - `GET  /v1/sessions`              — List retained sessions
//! - `GET  /v1/sessions/{id}`         — Full session snapshot
//! - `GET  /v1/sessions/{id}/stream`  — SSE stream of session events
//! - `POST /v1/sessions/{id}/cancel`  — Request cancellation
//! - `POST /v1/sessions/{id}/clear`   — Reset history, keep identity
//! - `GET  /v1/providers`             — Provider availability
//! - `GET  /v1/tools`                 — Current tool registry snapshot

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse},
    routing::{get, post},
};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use taskforge_core::error::SessionError;
use taskforge_core::event::SessionEvent;
use taskforge_core::message::Role;
use taskforge_core::provider::ProviderKind;
use taskforge_core::session::{Session, SessionStatus};
use taskforge_core::tool::ToolDescriptor;
use taskforge_mcp::ToolGateway;
use taskforge_providers::ProviderRegistry;

use crate::store::SessionStore;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the surface API.
pub struct ApiState {
    pub store: Arc<SessionStore>,
    pub providers: Arc<ProviderRegistry>,
    pub gateway: Arc<ToolGateway>,
}

pub type SharedApiState = Arc<ApiState>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the full surface router.
pub fn build_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1_router(state))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the v1 API router. Nest this under "/v1".
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/sessions", post(submit_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/stream", get(stream_handler))
        .route("/sessions/{id}/cancel", post(cancel_handler))
        .route("/sessions/{id}/clear", post(clear_handler))
        .route("/providers", get(providers_handler))
        .route("/tools", get(tools_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct SubmitRequest {
    /// The natural-language goal.
    goal: String,
    /// Provider name; omit to use the configured default.
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SubmitResponse {
    session_id: String,
    provider: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize, Deserialize)]
struct MessageDto {
    role: String,
    content: String,
    timestamp: String,
}

#[derive(Serialize, Deserialize)]
struct StepDto {
    index: usize,
    description: String,
    tool_name: Option<String>,
    status: String,
}

#[derive(Serialize, Deserialize)]
struct ToolCallDto {
    tool_name: String,
    step_index: usize,
    success: bool,
    error: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SessionDto {
    id: String,
    goal: String,
    provider: String,
    status: String,
    iteration_count: u32,
    messages: Vec<MessageDto>,
    plan: Vec<StepDto>,
    tool_calls: Vec<ToolCallDto>,
    error: Option<String>,
    final_response: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize, Deserialize)]
struct SessionSummaryDto {
    id: String,
    goal: String,
    status: String,
    created_at: String,
}

#[derive(Serialize, Deserialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummaryDto>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ProviderStatusDto {
    name: String,
    available: bool,
}

#[derive(Serialize, Deserialize)]
struct ProvidersResponse {
    default: String,
    providers: Vec<ProviderStatusDto>,
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
    count: usize,
}

fn session_dto(session: Session) -> SessionDto {
    SessionDto {
        id: session.id.to_string(),
        goal: session.goal,
        provider: session.provider.to_string(),
        status: session.status.as_str().into(),
        iteration_count: session.iteration_count,
        messages: session
            .messages
            .into_iter()
            .map(|m| MessageDto {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: m.content,
                timestamp: m.timestamp.to_rfc3339(),
            })
            .collect(),
        plan: session
            .plan
            .into_iter()
            .map(|s| StepDto {
                index: s.index,
                description: s.description,
                tool_name: s.tool_name,
                status: s.status.as_str().into(),
            })
            .collect(),
        tool_calls: session
            .tool_calls
            .into_iter()
            .map(|r| ToolCallDto {
                success: r.is_success(),
                tool_name: r.tool_name,
                step_index: r.step_index,
                error: r.error,
            })
            .collect(),
        error: session.error,
        final_response: session.final_response,
        created_at: session.created_at.to_rfc3339(),
        updated_at: session.updated_at.to_rfc3339(),
    }
}

fn error_response(error: SessionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::StillRunning(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, Json<ErrorResponse>)> {
    if payload.goal.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Goal must not be empty".into(),
            }),
        ));
    }

    // Unknown identifiers fail fast; absent means the configured default.
    let kind: ProviderKind = match payload.provider {
        Some(raw) => raw.parse().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!(
                        "Unknown provider '{raw}'. Supported: {}",
                        ProviderKind::ALL.map(|k| k.as_str()).join(", ")
                    ),
                }),
            )
        })?,
        None => state.providers.default_kind(),
    };

    let available = state.providers.available();
    if !available.contains(&kind) {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "Provider {kind} is not available. Available providers: [{}]",
                    available
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        ));
    }

    let id = state.store.submit(payload.goal, kind).await;
    info!(session = %id, provider = %kind, "Session accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            session_id: id.to_string(),
            provider: kind.to_string(),
        }),
    ))
}

async fn list_sessions_handler(
    State(state): State<SharedApiState>,
) -> Json<SessionListResponse> {
    let sessions: Vec<SessionSummaryDto> = state
        .store
        .list()
        .await
        .into_iter()
        .map(|s| SessionSummaryDto {
            id: s.id.to_string(),
            goal: s.goal,
            status: s.status.as_str().into(),
            created_at: s.created_at.to_rfc3339(),
        })
        .collect();

    let count = sessions.len();
    Json(SessionListResponse { sessions, count })
}

async fn get_session_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDto>, (StatusCode, Json<ErrorResponse>)> {
    let session = state.store.snapshot(&id).await.map_err(error_response)?;
    Ok(Json(session_dto(session)))
}

/// SSE stream of session events from the point of subscription. Finite:
/// the stream closes after the terminal `done`/`error` event. A stream
/// opened on an already-terminal session replays just the terminal event.
async fn stream_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<
    Sse<KeepAliveStream<BoxStream<'static, Result<SseEvent, Infallible>>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    let handle = state.store.get(&id).await.map_err(error_response)?;

    // Subscribe before inspecting status so a concurrent finish is not missed.
    let rx = handle.subscribe();
    let snapshot = handle.snapshot().await;

    let stream: BoxStream<'static, Result<SseEvent, Infallible>> = if snapshot.is_terminal() {
        let event = match snapshot.status {
            SessionStatus::Completed => SessionEvent::Done {
                final_response: snapshot.final_response.unwrap_or_default(),
            },
            _ => SessionEvent::Error {
                message: snapshot.error.unwrap_or_default(),
            },
        };
        futures::stream::once(async move { Ok(sse_event(&event)) }).boxed()
    } else {
        futures::stream::unfold((rx, false), |(mut rx, done)| async move {
            if done {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        return Some((Ok(sse_event(&event)), (rx, terminal)));
                    }
                    // A lagged consumer skips the overwritten events and
                    // continues from the oldest retained one.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &SessionEvent) -> SseEvent {
    SseEvent::default()
        .event(event.event_type())
        .json_data(event)
        .unwrap_or_default()
}

async fn cancel_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    state.store.cancel(&id).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({"status": "cancelling"})))
}

async fn clear_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    state.store.clear(&id).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({"status": "cleared"})))
}

async fn providers_handler(State(state): State<SharedApiState>) -> Json<ProvidersResponse> {
    let available = state.providers.available();
    Json(ProvidersResponse {
        default: state.providers.default_kind().to_string(),
        providers: ProviderKind::ALL
            .into_iter()
            .map(|kind| ProviderStatusDto {
                name: kind.to_string(),
                available: available.contains(&kind),
            })
            .collect(),
    })
}

async fn tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let registry = state.gateway.registry();
    let tools: Vec<ToolDescriptor> = registry.iter().cloned().collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use taskforge_agent::AgentRunner;
    use taskforge_config::{AgentSettings, AppConfig};
    use taskforge_core::error::{GatewayError, ProviderError};
    use taskforge_core::provider::{Completion, CompletionBackend, CompletionRequest};
    use taskforge_mcp::protocol::WireTool;
    use taskforge_mcp::transport::McpTransport;
    use taskforge_mcp::ToolOutcome;
    use tower::ServiceExt;

    struct EchoBackend {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gemini
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<Completion, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Completion {
                content: "direct answer".into(),
                model: request.model,
            })
        }
    }

    struct EmptyTransport;

    #[async_trait]
    impl McpTransport for EmptyTransport {
        async fn initialize(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<WireTool>, GatewayError> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: &Value,
        ) -> Result<ToolOutcome, GatewayError> {
            Ok(ToolOutcome::ok(json!({})))
        }
    }

    fn test_state(backend_delay: Option<Duration>) -> SharedApiState {
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(EmptyTransport),
            Duration::from_secs(5),
        ));
        let mut providers = taskforge_providers::ProviderRegistry::from_config(
            &AppConfig::default(),
        );
        providers.register(
            Arc::new(EchoBackend {
                delay: backend_delay,
            }),
            "mock-model",
        );
        let providers = Arc::new(providers);
        let runner = Arc::new(AgentRunner::new(
            gateway.clone(),
            providers.clone(),
            AgentSettings::default(),
        ));
        let store = Arc::new(SessionStore::new(runner, 100));
        Arc::new(ApiState {
            store,
            providers,
            gateway,
        })
    }

    /// State with no usable backend at all.
    fn bare_state() -> SharedApiState {
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(EmptyTransport),
            Duration::from_secs(5),
        ));
        let providers = Arc::new(taskforge_providers::ProviderRegistry::from_config(
            &AppConfig::default(),
        ));
        let runner = Arc::new(AgentRunner::new(
            gateway.clone(),
            providers.clone(),
            AgentSettings::default(),
        ));
        let store = Arc::new(SessionStore::new(runner, 100));
        Arc::new(ApiState {
            store,
            providers,
            gateway,
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submit_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/sessions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn await_terminal(state: &SharedApiState, id: &str) {
        for _ in 0..200 {
            if state.store.snapshot(id).await.unwrap().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_provider() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(submit_request(json!({"goal": "x", "provider": "mistral"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("Unknown provider"));
    }

    #[tokio::test]
    async fn submit_rejects_empty_goal() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(submit_request(json!({"goal": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_rejects_unavailable_provider() {
        let router = build_router(bare_state());
        let response = router
            .oneshot(submit_request(json!({"goal": "x", "provider": "anthropic"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn submit_and_fetch_session() {
        let state = test_state(None);
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(submit_request(json!({"goal": "say hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let id = body["session_id"].as_str().unwrap().to_string();
        assert_eq!(body["provider"], "gemini");

        await_terminal(&state, &id).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["final_response"], "direct answer");
        assert!(body["messages"].as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn missing_session_is_404() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/sessions/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clear_conflicts_while_running() {
        // Slow backend keeps the session running while we clear
        let state = test_state(Some(Duration::from_secs(5)));
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(submit_request(json!({"goal": "slow goal"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["session_id"].as_str().unwrap().to_string();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/sessions/{id}/clear"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Stop the background run
        state.store.cancel(&id).await.unwrap();
    }

    #[tokio::test]
    async fn clear_succeeds_after_terminal() {
        let state = test_state(None);
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(submit_request(json!({"goal": "quick"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["session_id"].as_str().unwrap().to_string();
        await_terminal(&state, &id).await;

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/sessions/{id}/clear"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "initializing");
        assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_session_is_404() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/sessions/nope/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn providers_endpoint_reports_availability() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["default"], "gemini");

        let providers = body["providers"].as_array().unwrap();
        assert_eq!(providers.len(), 3);
        let gemini = providers.iter().find(|p| p["name"] == "gemini").unwrap();
        assert_eq!(gemini["available"], true);
        let openai = providers.iter().find(|p| p["name"] == "openai").unwrap();
        assert_eq!(openai["available"], false);
    }

    #[tokio::test]
    async fn tools_endpoint_reflects_discovery() {
        let state = test_state(None);
        let router = build_router(state.clone());

        // Before discovery the snapshot is empty
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/tools")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 0);

        state.gateway.discover().await.unwrap();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/tools")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["count"].as_u64().unwrap() >= 5);
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"add_author"));
    }

    #[tokio::test]
    async fn stream_of_finished_session_replays_terminal_event() {
        let state = test_state(None);
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(submit_request(json!({"goal": "quick"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["session_id"].as_str().unwrap().to_string();
        await_terminal(&state, &id).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sessions/{id}/stream"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: done"));
        assert!(text.contains("direct answer"));
    }
}
