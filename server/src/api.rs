//! HTTP + WebSocket surface (§6). Thin adapter: handlers parse the request,
//! call the controller, and translate the result back to JSON/status codes.
//! No business logic lives here.

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::dto::{CreateTaskRequest, OptimizeRequest, TaskResponse, UpdateTaskRequest};
use shared::task::TaskId;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::controller::{Controller, ControllerError};

/// Bounds how long a single HTTP request may run (defense in depth against a
/// pathological optimize call hanging a worker thread, in the spirit of §5's
/// bounded-runtime requirement for the allocation strategies). Not applied to
/// `/ws`, which is a long-lived connection by design.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub broadcaster: Arc<Broadcaster>,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { controller, broadcaster }
    }
}

/// Builds the full router for §6's endpoint surface. The request-timeout
/// layer wraps everything except `/ws`, which is merged in afterwards so a
/// live WebSocket connection is never torn down by it.
pub fn create_router(state: AppState) -> Router {
    let http_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/v1/tasks/{id}/start", post(start_task))
        .route("/api/v1/tasks/{id}/complete", post(complete_task))
        .route("/api/v1/tasks/{id}/cancel", post(cancel_task))
        .route("/api/v1/tasks/{id}/reopen", post(reopen_task))
        .route("/api/v1/tasks/{id}/archive", post(archive_task))
        .route("/api/v1/tasks/{id}/restore", post(restore_task))
        .route("/api/v1/optimize", post(optimize))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_request_timeout))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        );

    Router::new()
        .merge(http_routes)
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn handle_request_timeout(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({"error": "request timed out"})),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "taskdog-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Query parameters for `GET /api/v1/tasks` (§6 filters): `all` includes
/// archived tasks, `tags` matches with OR semantics, `start_date`/`end_date`
/// bound `planned_start`/`planned_end`, `sort`/`reverse` order the result,
/// and `include_gantt` controls whether the allocation grids are populated
/// in the response (omitted by default to keep list payloads small).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListTasksQuery {
    all: bool,
    status: Option<String>,
    /// Comma-separated tag list (`?tags=urgent,writing`); axum's query
    /// extractor has no native support for repeated keys here.
    tags: Option<String>,
    start_date: Option<chrono::NaiveDate>,
    end_date: Option<chrono::NaiveDate>,
    sort: Option<String>,
    reverse: bool,
    include_gantt: bool,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let mut tasks = state.controller.list_tasks()?;

    if !query.all {
        tasks.retain(|t| !t.is_archived());
    }
    if let Some(status) = &query.status {
        tasks.retain(|t| t.status().as_str() == status.as_str());
    }
    if let Some(tags) = &query.tags {
        let wanted: Vec<&str> = tags.split(',').filter(|s| !s.is_empty()).collect();
        tasks.retain(|t| wanted.iter().any(|tag| t.tags().iter().any(|owned| owned == tag)));
    }
    if let Some(start_date) = query.start_date {
        tasks.retain(|t| t.planned_start().is_some_and(|d| d.date() >= start_date));
    }
    if let Some(end_date) = query.end_date {
        tasks.retain(|t| t.planned_end().is_some_and(|d| d.date() <= end_date));
    }

    sort_tasks(&mut tasks, query.sort.as_deref().unwrap_or("id"));
    if query.reverse {
        tasks.reverse();
    }

    let mut responses: Vec<TaskResponse> = tasks.iter().map(TaskResponse::from).collect();
    if !query.include_gantt {
        for response in &mut responses {
            response.daily_allocations.clear();
            response.actual_daily_hours.clear();
        }
    }
    Ok(Json(responses))
}

fn sort_tasks(tasks: &mut [shared::task::Task], field: &str) {
    match field {
        "name" => tasks.sort_by(|a, b| a.name().cmp(b.name())),
        "priority" => tasks.sort_by(|a, b| a.priority().unwrap_or(0).cmp(&b.priority().unwrap_or(0))),
        "deadline" => tasks.sort_by(|a, b| a.deadline().cmp(&b.deadline())),
        "status" => tasks.sort_by(|a, b| a.status().as_str().cmp(b.status().as_str())),
        _ => tasks.sort_by_key(|t| t.id()),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.controller.get_task(id)?;
    Ok(Json(TaskResponse::from(&task)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceUserName {
    source_user_name: Option<String>,
}

async fn create_task(
    State(state): State<AppState>,
    Query(source): Query<SourceUserName>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let task = state.controller.create_task(req, source.source_user_name).await?;
    info!(task_id = task.id(), "created task");
    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Query(source): Query<SourceUserName>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.controller.update_task(id, req, source.source_user_name).await?;
    Ok(Json(TaskResponse::from(&task)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Query(source): Query<SourceUserName>,
) -> Result<StatusCode, ApiError> {
    state.controller.delete_task(id, source.source_user_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

macro_rules! lifecycle_handler {
    ($name:ident, $method:ident) => {
        async fn $name(
            State(state): State<AppState>,
            Path(id): Path<TaskId>,
            Query(source): Query<SourceUserName>,
        ) -> Result<Json<TaskResponse>, ApiError> {
            let task = state.controller.$method(id, source.source_user_name).await?;
            Ok(Json(TaskResponse::from(&task)))
        }
    };
}

lifecycle_handler!(start_task, start_task);
lifecycle_handler!(complete_task, complete_task);
lifecycle_handler!(cancel_task, cancel_task);
lifecycle_handler!(reopen_task, reopen_task);
lifecycle_handler!(archive_task, archive_task);
lifecycle_handler!(restore_task, restore_task);

async fn optimize(
    State(state): State<AppState>,
    Query(source): Query<SourceUserName>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<shared::dto::OptimizeResult>, ApiError> {
    let result = state.controller.optimize(req, source.source_user_name).await?;
    Ok(Json(result))
}

/// Upgrades to a WebSocket connection and streams every broadcast event to
/// this client until it disconnects (§4.13, §6).
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (client_id, queue) = state.broadcaster.register();

    let mut recv_task = tokio::spawn(async move {
        // The client never sends meaningful payloads; this loop only exists
        // to detect disconnects (close frame, or any socket error).
        while let Some(message) = receiver.next().await {
            if message.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            event = queue.recv() => {
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = &mut recv_task => {
                break;
            }
        }
    }
    recv_task.abort();

    state.broadcaster.unregister(client_id);
}

/// Error wrapper giving `ControllerError` an `IntoResponse` impl without
/// `shared`/`server` taking on an axum dependency of their own.
struct ApiError(ControllerError);

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_hint()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
