//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `GET    /v1/ws`                   — WebSocket turn streaming (see [`crate::ws`])
//! - `POST   /v1/turns`                — Start a turn without streaming
//! - `GET    /v1/sessions/{id}`        — Session status
//! - `POST   /v1/sessions/{id}/cancel` — Cancel the active turn
//! - `GET    /v1/sessions/{id}/events` — SSE stream of a session's events
//! - `GET    /v1/tasks`                — Search tasks
//! - `POST   /v1/tasks`                — Create a task
//! - `GET    /v1/tasks/stats`          — Task counts
//! - `GET    /v1/tasks/{id}`           — One task
//! - `PATCH  /v1/tasks/{id}`           — Update a task
//! - `DELETE /v1/tasks/{id}`           — Delete a task
//! - `POST   /v1/documents`            — Ingest a text document
//! - `GET    /v1/tools`                — Registered tools

use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use taskrag_agent::{Pacing, StreamBroadcaster};
use taskrag_core::error::{RetrievalError, SessionError, TaskStoreError};
use taskrag_core::session::SessionId;
use taskrag_core::task::{NewTask, Task, TaskPatch, TaskQuery, TaskStats};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::SharedState;

// ── Errors ────────────────────────────────────────────────────────────────

/// JSON error body: `{ "error": <kind>, "message": <text> }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: kind.into(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match e {
            SessionError::Busy(_) => StatusCode::CONFLICT,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, e.kind(), e.to_string())
    }
}

impl From<TaskStoreError> for ApiError {
    fn from(e: TaskStoreError) -> Self {
        let (status, kind) = match e {
            TaskStoreError::NotFound(_) => (StatusCode::NOT_FOUND, "TaskNotFound"),
            TaskStoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            TaskStoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "TaskStoreUnavailable"),
        };
        Self::new(status, kind, e.to_string())
    }
}

impl From<RetrievalError> for ApiError {
    fn from(e: RetrievalError) -> Self {
        let status = match e {
            RetrievalError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.kind(), e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/ws", get(crate::ws::ws_handler))
        .route("/turns", post(start_turn_handler))
        .route("/sessions/{id}", get(session_status_handler))
        .route("/sessions/{id}/cancel", post(cancel_handler))
        .route("/sessions/{id}/events", get(session_events_handler))
        .route("/tasks", get(search_tasks_handler).post(create_task_handler))
        .route("/tasks/stats", get(task_stats_handler))
        .route(
            "/tasks/{id}",
            get(get_task_handler)
                .patch(update_task_handler)
                .delete(delete_task_handler),
        )
        .route("/documents", post(ingest_document_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── Turns & sessions ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartTurnRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTurnResponse {
    pub session_id: String,
    pub accepted: bool,
}

/// `POST /v1/turns`: start a turn and follow it via `/sessions/{id}/events`.
async fn start_turn_handler(
    State(state): State<SharedState>,
    Json(req): Json<StartTurnRequest>,
) -> ApiResult<(StatusCode, Json<StartTurnResponse>)> {
    if req.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ValidationError",
            "message must not be empty",
        ));
    }
    let session_id = req.session_id.map(SessionId::from).unwrap_or_default();
    let handle = state.sessions.start_turn(session_id.clone(), req.message)?;
    drop(handle);

    Ok((
        StatusCode::ACCEPTED,
        Json(StartTurnResponse {
            session_id: session_id.to_string(),
            accepted: true,
        }),
    ))
}

async fn session_status_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<taskrag_core::session::SessionStatus>> {
    Ok(Json(state.sessions.get_status(&SessionId::from(id))?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub session_id: String,
    /// Whether a running turn was asked to stop.
    pub cancelled: bool,
}

/// `POST /v1/sessions/{id}/cancel` always answers 200; cancelling nothing is fine.
async fn cancel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let session_id = SessionId::from(id);
    let cancelled = state.sessions.cancel(&session_id);
    Json(CancelResponse {
        session_id: session_id.to_string(),
        cancelled,
    })
}

/// `GET /v1/sessions/{id}/events` as SSE, one `data:` line per event.
async fn session_events_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>> {
    let session_id = SessionId::from(id);
    let receiver = state.sessions.subscribe(&session_id)?;
    info!(%session_id, "SSE subscriber attached");

    let stream = StreamBroadcaster::attach(receiver, Pacing::Immediate)
        .into_stream()
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_type()).data(data))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Tasks ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub count: usize,
}

fn parse_task_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| {
        ApiError::new(StatusCode::BAD_REQUEST, "ValidationError", "task id must be a UUID")
    })
}

async fn search_tasks_handler(
    State(state): State<SharedState>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let tasks = state.tasks.search(query).await?;
    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

async fn create_task_handler(
    State(state): State<SharedState>,
    Json(req): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.tasks.create(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn task_stats_handler(State(state): State<SharedState>) -> ApiResult<Json<TaskStats>> {
    Ok(Json(state.tasks.stats().await?))
}

async fn get_task_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get(parse_task_id(&id)?).await?))
}

async fn update_task_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    let id = parse_task_id(&id)?;
    if patch.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ValidationError",
            "nothing to update",
        ));
    }
    Ok(Json(state.tasks.update(id, patch).await?))
}

async fn delete_task_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.delete(parse_task_id(&id)?).await?))
}

// ── Documents ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestDocumentRequest {
    #[serde(default)]
    pub document_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestDocumentResponse {
    pub document_id: String,
    pub chunks: usize,
}

async fn ingest_document_handler(
    State(state): State<SharedState>,
    Json(req): Json<IngestDocumentRequest>,
) -> ApiResult<(StatusCode, Json<IngestDocumentResponse>)> {
    if req.text.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ValidationError",
            "text must not be empty",
        ));
    }
    let document_id = req
        .document_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let chunks = state
        .retrieval
        .ingest(&document_id, &req.text)
        .await
        .inspect_err(|e| warn!(%document_id, error = %e, "Document ingestion failed"))?;

    Ok((
        StatusCode::CREATED,
        Json(IngestDocumentResponse {
            document_id,
            chunks,
        }),
    ))
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
    pub count: usize,
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .tools
        .definitions()
        .into_iter()
        .map(|d| ToolInfo {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        })
        .collect();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn start_turn_is_accepted_then_status_reports_done() {
        let state = test_state(ScriptedProvider::text(&["Hello"]));
        let (status, json) = send(
            v1_router(state.clone()),
            post_json("/turns", serde_json::json!({ "session_id": "s-1", "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["session_id"], "s-1");
        assert_eq!(json["accepted"], true);

        // Wait for the background turn to finish.
        for _ in 0..100 {
            if !state.sessions.get_status(&SessionId::from("s-1")).unwrap().busy {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (status, json) = send(v1_router(state), get("/sessions/s-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "done");
        assert_eq!(json["turn_count"], 1);
    }

    #[tokio::test]
    async fn busy_session_returns_conflict() {
        let state = test_state(ScriptedProvider::hanging());
        let app = v1_router(state.clone());
        let (status, _) = send(
            app.clone(),
            post_json("/turns", serde_json::json!({ "session_id": "s-2", "message": "one" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, json) = send(
            app.clone(),
            post_json("/turns", serde_json::json!({ "session_id": "s-2", "message": "two" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "SessionBusyError");

        let (status, json) = send(app, post_json("/sessions/s-2/cancel", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cancelled"], true);
    }

    #[tokio::test]
    async fn cancel_unknown_session_is_ok() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, json) = send(
            v1_router(state),
            post_json("/sessions/nobody/cancel", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cancelled"], false);
    }

    #[tokio::test]
    async fn unknown_session_status_is_404() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, json) = send(v1_router(state), get("/sessions/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "SessionNotFoundError");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, _) = send(
            v1_router(state),
            post_json("/turns", serde_json::json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_crud_round() {
        let state = test_state(ScriptedProvider::text(&[]));
        let app = v1_router(state);

        let (status, created) = send(
            app.clone(),
            post_json("/tasks", serde_json::json!({ "title": "Review report" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let patch = Request::builder()
            .method("PATCH")
            .uri(format!("/tasks/{id}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"status":"completed"}"#))
            .unwrap();
        let (status, updated) = send(app.clone(), patch).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "completed");

        let (_, stats) = send(app.clone(), get("/tasks/stats")).await;
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["by_status"]["completed"], 1);

        let (_, list) = send(app.clone(), get("/tasks?text=review")).await;
        assert_eq!(list["count"], 1);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/tasks/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app.clone(), delete).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send(app, get(&format!("/tasks/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "TaskNotFound");
    }

    #[tokio::test]
    async fn bad_task_id_is_400() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, _) = send(v1_router(state), get("/tasks/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ingest_document_then_search() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, json) = send(
            v1_router(state.clone()),
            post_json(
                "/documents",
                serde_json::json!({
                    "document_id": "handbook",
                    "text": "Expense reports are due on the fifth of every month."
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["chunks"], 1);

        let result = state.retrieval.retrieve("expense reports", 3).await.unwrap();
        assert_eq!(result.chunks[0].document_id, "handbook");
    }

    #[tokio::test]
    async fn lists_registered_tools() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, json) = send(v1_router(state), get("/tools")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 6);
        let names: Vec<&str> = json["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"document_search"));
        assert!(names.contains(&"task_create"));
    }

    #[tokio::test]
    async fn events_for_unknown_session_is_404() {
        let state = test_state(ScriptedProvider::text(&[]));
        let (status, _) = send(v1_router(state), get("/sessions/ghost/events")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let state = test_state(ScriptedProvider::text(&[]));
        let response = v1_router(state).oneshot(get("/ws")).await.unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }
}
