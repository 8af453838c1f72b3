//! REST API for the banking support agent
//!
//! Exposes the function dispatcher over HTTP so a web voice client can
//! forward tool-call batches and read service health.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::dispatcher::FunctionDispatcher;
use crate::models::ToolCall;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub calls: Vec<ToolCall>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<FunctionDispatcher>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "initialized": state.dispatcher.is_initialized(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Dispatch Endpoint
/// =============================

/// Runs a tool-call batch and returns one response per call, in request
/// order. Per-call failures ride inside the envelopes; a non-200 status
/// here means the request itself was malformed.
async fn dispatch(
    State(state): State<ApiState>,
    Json(req): Json<DispatchRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(batch_size = req.calls.len(), "Received dispatch request");

    if req.calls.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("calls must not be empty".into())),
        );
    }

    let responses = state.dispatcher.dispatch(req.calls).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "functionResponses": responses,
        }))),
    )
}

/// =============================
/// Stats Endpoint
/// =============================

async fn stats(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::OK,
        Json(ApiResponse::success(state.dispatcher.stats())),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(dispatcher: Arc<FunctionDispatcher>) -> Router {
    let state = ApiState { dispatcher };

    Router::new()
        .route("/health", get(health))
        .route("/api/dispatch", post(dispatch))
        .route("/api/stats", get(stats))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    dispatcher: Arc<FunctionDispatcher>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(dispatcher);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
