use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

use crate::pipeline::task::Task;
use crate::storage::queue::{self, WorkQueue};
use crate::utils::Shutdown;

/// Reasons a download request is turned away before queueing
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Forbidden")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("failed to enqueue task")]
    Queue,
}

impl IntakeError {
    fn status(&self) -> StatusCode {
        match self {
            IntakeError::Unauthorized => StatusCode::FORBIDDEN,
            IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            IntakeError::Queue => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            IntakeError::Unauthorized => "forbidden",
            IntakeError::Validation(_) => "invalid_request",
            IntakeError::Queue => "queue_unavailable",
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string()
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<JsonRejection> for IntakeError {
    fn from(rejection: JsonRejection) -> Self {
        IntakeError::Validation(rejection.body_text())
    }
}

/// Shared state of the intake handlers
#[derive(Clone)]
pub struct IntakeState {
    queue: Arc<dyn WorkQueue>,
    lane: String,
}

impl IntakeState {
    pub fn new(queue: Arc<dyn WorkQueue>, lane: impl Into<String>) -> Self {
        Self {
            queue,
            lane: lane.into(),
        }
    }
}

/// Chat identifiers arrive as strings or as integers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatRef {
    Text(String),
    Number(i64),
}

impl ChatRef {
    fn into_string(self) -> String {
        match self {
            ChatRef::Text(text) => text.trim().to_string(),
            ChatRef::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    #[serde(alias = "url")]
    source_url: String,
    #[serde(alias = "chat_id")]
    destination: ChatRef,
}

impl DownloadRequest {
    /// Check the request and turn it into a task with a fresh id
    fn into_task(self) -> Result<Task, IntakeError> {
        let source_url = self.source_url.trim();
        let parsed = Url::parse(source_url)
            .map_err(|e| IntakeError::Validation(format!("invalid source_url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IntakeError::Validation(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let destination = self.destination.into_string();
        if destination.is_empty() {
            return Err(IntakeError::Validation("destination must not be empty".to_string()));
        }

        Ok(Task::new(source_url, destination))
    }
}

/// Build the intake router; `/download` requires `Authorization: Bearer <api_token>`
pub fn router(state: IntakeState, api_token: String) -> Router {
    let expected = Arc::new(format!("Bearer {}", api_token));

    let protected = Router::new()
        .route("/download", post(request_download))
        .route_layer(middleware::from_fn_with_state(expected, require_bearer))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
}

/// Run the intake server until shutdown is requested
pub async fn serve(state: IntakeState, api_token: String, bind_address: &str, mut shutdown: Shutdown) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .context(format!("Failed to bind intake server to {}", bind_address))?;

    info!("Intake listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state, api_token))
        .with_graceful_shutdown(async move { shutdown.requested().await })
        .await
        .context("Intake server failed")?;

    info!("Intake stopped");
    Ok(())
}

async fn require_bearer(
    State(expected): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(value) if constant_time_eq(value.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            warn!("Rejected download request without a valid credential");
            IntakeError::Unauthorized.into_response()
        }
    }
}

/// Compares every byte regardless of where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn request_download(
    State(state): State<IntakeState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, IntakeError> {
    let Json(request) = body?;
    let task = request.into_task()?;

    queue::publish_json(state.queue.as_ref(), &state.lane, &task)
        .await
        .map_err(|e| {
            error!("Failed to enqueue task {}: {:#}", task.task_id, e);
            IntakeError::Queue
        })?;

    info!("Task {} created for URL: {}", task.task_id, task.source_url);

    Ok(Json(json!({
        "message": "Task is created",
        "task_id": task.task_id
    })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryQueue;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt; // for oneshot

    const TOKEN: &str = "s3cret";
    const LANE: &str = "download_tasks";

    fn app(queue: Arc<MemoryQueue>) -> Router {
        router(IntakeState::new(queue, LANE), TOKEN.to_string())
    }

    fn download(authorization: Option<&str>, body: &str) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/download")
            .header("content-type", "application/json");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_request_is_queued() {
        let queue = Arc::new(MemoryQueue::new());
        let request = download(
            Some("Bearer s3cret"),
            r#"{"url": "https://example.com/watch?v=1", "chat_id": "42"}"#,
        );

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["message"], "Task is created");
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let task: Task = queue::decode(&queue.consume(LANE).await.unwrap()).unwrap();
        assert_eq!(task.task_id, task_id);
        assert_eq!(task.source_url, "https://example.com/watch?v=1");
        assert_eq!(task.destination, "42");
    }

    #[tokio::test]
    async fn test_numeric_chat_id_and_new_field_names() {
        let queue = Arc::new(MemoryQueue::new());
        let request = download(
            Some("Bearer s3cret"),
            r#"{"source_url": "http://example.com/v", "destination": -100123}"#,
        );

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let task: Task = queue::decode(&queue.consume(LANE).await.unwrap()).unwrap();
        assert_eq!(task.destination, "-100123");
    }

    #[tokio::test]
    async fn test_missing_credential_is_forbidden() {
        let queue = Arc::new(MemoryQueue::new());
        let request = download(None, r#"{"url": "https://example.com/v", "chat_id": "42"}"#);

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(queue.pending(LANE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_credential_is_forbidden() {
        let queue = Arc::new(MemoryQueue::new());
        let request = download(
            Some("Bearer S3CRET"),
            r#"{"url": "https://example.com/v", "chat_id": "42"}"#,
        );

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "forbidden");
        assert_eq!(queue.pending(LANE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_token_without_scheme_is_forbidden() {
        let queue = Arc::new(MemoryQueue::new());
        let request = download(Some("s3cret"), r#"{"url": "https://example.com/v", "chat_id": "42"}"#);

        let response = app(queue).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        for url in ["not a url", "ftp://example.com/v", ""] {
            let body = json!({ "url": url, "chat_id": "42" }).to_string();
            let response = app(queue.clone())
                .oneshot(download(Some("Bearer s3cret"), &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "url {:?}", url);
        }
        assert_eq!(queue.pending(LANE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let response = app(queue.clone())
            .oneshot(download(Some("Bearer s3cret"), r#"{"url": "https://example.com/v"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_empty_destination_is_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let response = app(queue)
            .oneshot(download(
                Some("Bearer s3cret"),
                r#"{"url": "https://example.com/v", "chat_id": "  "}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_needs_no_credential() {
        let queue = Arc::new(MemoryQueue::new());
        let request = HttpRequest::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app(queue).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
