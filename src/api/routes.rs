//! REST endpoints for creating and polling tasks.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, StoreError};
use crate::store::TaskStore;
use crate::task::{DEFAULT_KIND, Task};
use crate::worker::{Dispatcher, ExecutorRegistry};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub dispatcher: Arc<Dispatcher>,
    /// Consulted to reject submissions for kinds nothing can execute.
    pub executors: Arc<ExecutorRegistry>,
}

/// Build the Axum router with the task REST routes.
pub fn task_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}

fn store_error_response(e: &StoreError) -> Response {
    if e.is_not_found() {
        error_response(StatusCode::NOT_FOUND, e.to_string())
    } else {
        error!(error = %e, "Store operation failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "task store unavailable")
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskflow",
        "accepting": state.dispatcher.is_accepting().await,
        "queued": state.dispatcher.queued(),
        "abandoned": state.dispatcher.abandoned(),
        "workers": state.dispatcher.worker_count(),
    }))
}

// ── Tasks ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateTaskRequest {
    #[serde(default)]
    payload: serde_json::Value,
    kind: Option<String>,
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid task body");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {rejection}"));
        }
    };

    if body.payload.is_null() {
        return error_response(StatusCode::BAD_REQUEST, "payload cannot be empty");
    }

    let kind = body.kind.unwrap_or_else(|| DEFAULT_KIND.to_string());
    if !state.executors.has(&kind).await {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown task kind '{kind}'"),
        );
    }

    let task = Task::new(kind, body.payload);

    // Hold a queue place before persisting, so a rejected task leaves no record.
    let slot = match state.dispatcher.reserve(&task).await {
        Ok(slot) => slot,
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "Task rejected by dispatcher");
            let status = match e {
                DispatchError::Closed { .. }
                | DispatchError::QueueFull { .. }
                | DispatchError::SubmitTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::AlreadyStarted | DispatchError::NotStarted => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            return error_response(status, e.to_string());
        }
    };

    if let Err(e) = state.store.create(&task).await {
        return store_error_response(&e);
    }
    slot.send(task.clone());

    info!(task_id = %task.id, kind = %task.kind, "Task submitted");
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn list_tasks(State(state): State<AppState>) -> Response {
    match state.store.get_all().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => store_error_response(&e),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let task_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid task ID"),
    };

    match state.store.get(task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => store_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::config::DispatcherConfig;
    use crate::error::ExecutionError;
    use crate::store::MemoryTaskStore;
    use crate::worker::TaskExecutor;

    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        fn kind(&self) -> &str {
            "echo"
        }

        async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
            Ok(payload.clone())
        }
    }

    /// State with an unstarted dispatcher, so submitted tasks stay pending.
    fn state() -> AppState {
        state_with(DispatcherConfig::default())
    }

    fn state_with(config: DispatcherConfig) -> AppState {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let executors = Arc::new(ExecutorRegistry::new());
        assert!(executors.register_sync(Arc::new(Echo)));
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            Arc::clone(&store),
            Arc::clone(&executors),
        ));
        AppState {
            store,
            dispatcher,
            executors,
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn create_returns_pending_task() {
        let state = state();
        let app = task_routes(state.clone());

        let (status, json) = send(
            app,
            post_json("/tasks", json!({"payload": {"n": 1}, "kind": "echo"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["kind"], "echo");
        assert_eq!(json["payload"], json!({"n": 1}));

        let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
        assert!(state.store.get(id).await.is_ok());
        assert_eq!(state.dispatcher.queued(), 1);
    }

    #[tokio::test]
    async fn create_without_payload_is_bad_request() {
        let app = task_routes(state());
        let (status, json) = send(app, post_json("/tasks", json!({"kind": "echo"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "payload cannot be empty");
    }

    #[tokio::test]
    async fn create_with_malformed_body_is_bad_request() {
        let app = task_routes(state());
        let req = Request::post("/tasks")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("invalid body"));
    }

    #[tokio::test]
    async fn create_with_unknown_kind_is_bad_request() {
        let state = state();
        let app = task_routes(state.clone());
        let (status, _) = send(
            app,
            post_json("/tasks", json!({"payload": 1, "kind": "teleport"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_after_shutdown_is_unavailable() {
        let state = state();
        state.dispatcher.start().await.unwrap();
        state.dispatcher.shutdown().await.unwrap();

        let app = task_routes(state.clone());
        let (status, _) = send(
            app,
            post_json("/tasks", json!({"payload": 1, "kind": "echo"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(state.store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_on_full_queue_leaves_no_record() {
        let state = state_with(DispatcherConfig {
            queue_capacity: 1,
            submit_timeout: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        });

        let (status, _) = send(
            task_routes(state.clone()),
            post_json("/tasks", json!({"payload": 1, "kind": "echo"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(
            task_routes(state.clone()),
            post_json("/tasks", json!({"payload": 2, "kind": "echo"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().contains("Timed out"));

        let stored = state.store.get_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, json!(1));
        assert_eq!(state.dispatcher.queued(), 1);
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let app = task_routes(state());
        let (status, json) = send(app, get(&format!("/tasks/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn get_malformed_id_is_bad_request() {
        let app = task_routes(state());
        let (status, _) = send(app, get("/tasks/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_empty_store() {
        let app = task_routes(state());
        let (status, json) = send(app, get("/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([]));
    }

    #[tokio::test]
    async fn health_reports_dispatcher() {
        let app = task_routes(state());
        let (status, json) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["workers"], 5);
        assert_eq!(json["accepting"], true);
    }
}
