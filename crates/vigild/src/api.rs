//! Axum HTTP API.

use crate::engine::{EngineError, EngineHandle};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use vigil_core::{gallery, ErrorResponse, InferResponse, MatchPolicy, SessionError};

/// Static facts about the running service, reported by `/api/status`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub service: String,
    pub device: String,
    pub graph_path: PathBuf,
    pub gallery_dir: PathBuf,
    pub match_policy: MatchPolicy,
    pub match_threshold: f32,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub info: Arc<ServiceInfo>,
}

/// Build the router: `POST /api/<service>/infer`, `GET /api/status`,
/// `GET /health`.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    let infer_path = format!("/api/{}/infer", state.info.service);
    Router::new()
        .route(&infer_path, post(infer_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error wrapper that renders as the FAILED wire object.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Session(SessionError::ImageDecode(_)) => StatusCode::BAD_REQUEST,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "infer request failed");
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

async fn infer_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InferResponse>, ApiError> {
    let result = state.engine.identify(body.to_vec()).await?;
    Ok(Json(InferResponse::from(&result)))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dir = state.info.gallery_dir.clone();
    let gallery_size = tokio::task::spawn_blocking(move || gallery::enumerate(&dir))
        .await
        .ok()
        .and_then(|listed| listed.ok())
        .map(|entries| entries.len());

    let info = &state.info;
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": info.service,
        "device": info.device,
        "graph": info.graph_path.display().to_string(),
        "gallery_dir": info.gallery_dir.display().to_string(),
        "gallery_size": gallery_size,
        "match_policy": info.match_policy.to_string(),
        "match_threshold": info.match_threshold,
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
