//! Browser UI and its JSON/SSE API.

mod chat;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::app::AppContext;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or out-of-range request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request conflicts with a reply still in progress.
    #[error("{0}")]
    Conflict(String),

    /// A background task failed.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!("Request failed: {}", self);
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
struct ServerStatusResponse {
    running: bool,
    pid: Option<u32>,
    closing: bool,
}

/// Build the application router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/server/status", get(server_status))
        .route("/api/server/start", post(start_server))
        .route("/api/server/stop", post(stop_server))
        .route("/api/chat", post(chat::chat))
        .route("/api/history", get(chat::history))
        .route("/api/history/clear", post(chat::clear_history))
        .route("/api/close", post(close_application).delete(cancel_close))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn server_status(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ServerStatusResponse>, ApiError> {
    let closing = ctx.shutdown().is_scheduled();
    let status = tokio::task::spawn_blocking(move || ctx.server_status()).await?;
    Ok(Json(ServerStatusResponse {
        running: status.is_running(),
        pid: status.pid(),
        closing,
    }))
}

async fn start_server(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let outcome = tokio::task::spawn_blocking(move || ctx.start_server()).await?;
    Ok(Json(StatusResponse {
        status: outcome.to_string(),
    }))
}

async fn stop_server(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let outcome = tokio::task::spawn_blocking(move || ctx.stop_server()).await?;
    Ok(Json(StatusResponse {
        status: outcome.to_string(),
    }))
}

async fn close_application(State(ctx): State<Arc<AppContext>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: ctx.close_application().await,
    })
}

async fn cancel_close(State(ctx): State<Arc<AppContext>>) -> Json<StatusResponse> {
    let status = if ctx.shutdown().cancel() {
        "Exit cancelled"
    } else {
        "No exit is pending"
    };
    Json(StatusResponse {
        status: status.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::context;
    use crate::shutdown::SHUTDOWN_DELAY;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, String) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_index_serves_ui() {
        let (status, body) = send(router(context(SHUTDOWN_DELAY)), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<html"));
    }

    #[tokio::test]
    async fn test_stop_without_server() {
        let (status, body) =
            send(router(context(SHUTDOWN_DELAY)), "POST", "/api/server/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"No server is running!"}"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_then_status() {
        let ctx = context(SHUTDOWN_DELAY);

        let (_, body) = send(router(ctx.clone()), "POST", "/api/server/start", None).await;
        assert!(body.contains("Server started with PID"));

        let (_, body) = send(router(ctx.clone()), "POST", "/api/server/start", None).await;
        assert_eq!(body, r#"{"status":"Server is already running!"}"#);

        let (_, body) = send(router(ctx.clone()), "GET", "/api/server/status", None).await;
        let status: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["running"], true);
        assert!(status["pid"].is_u64());

        let (_, body) = send(router(ctx), "POST", "/api/server/stop", None).await;
        assert_eq!(body, r#"{"status":"Server stopped successfully!"}"#);
    }

    #[tokio::test]
    async fn test_close_schedules_exit() {
        let ctx = context(SHUTDOWN_DELAY);
        let (status, body) = send(router(ctx.clone()), "POST", "/api/close", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Closing the app..."));
        assert!(ctx.shutdown().is_scheduled());

        let (_, body) = send(router(ctx.clone()), "DELETE", "/api/close", None).await;
        assert_eq!(body, r#"{"status":"Exit cancelled"}"#);
        assert!(!ctx.shutdown().is_scheduled());
    }
}
