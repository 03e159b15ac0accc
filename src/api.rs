//! REST API server for the analysis orchestrator
//!
//! Thin HTTP surface over `Orchestrator::process_turn`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::AccountScope;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    /// Omitted on the first message; a new session id is generated
    pub session_id: Option<String>,
    pub message: String,
    /// Replaces the session scope when present
    pub account_ids: Option<Vec<String>>,
}

/// Omit `pattern` to drop every cached tool result
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CacheInvalidateRequest {
    pub pattern: Option<String>,
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
    pub orchestrator: Arc<Orchestrator>,
}

fn status_for(error: &OrchestrationError) -> StatusCode {
    match error {
        OrchestrationError::Validation(_) | OrchestrationError::SessionError(_) => {
            StatusCode::BAD_REQUEST
        }
        e if e.is_fatal() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "turns_recorded": state.orchestrator.audit_log().len().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Cache Endpoint
/// =============================

/// Called after the underlying data changed (e.g. a resource sync)
async fn invalidate_cache(
    State(state): State<ApiState>,
    Json(req): Json<CacheInvalidateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let removed = match req.pattern.as_deref().map(str::trim) {
        Some("") => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("pattern must not be empty".to_string())),
            )
        }
        Some(pattern) => state.orchestrator.invalidate_cache(pattern),
        None => state.orchestrator.clear_cache(),
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({ "removed": removed }))),
    )
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty".into())),
        );
    }

    let session_id = match req.session_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };
    let scope = req.account_ids.map(AccountScope::from_ids);

    info!(session_id = %session_id, "Received chat message");

    match state
        .orchestrator
        .process_turn(&session_id, &req.message, scope)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "turn_id": result.turn_id,
                "answer": result.answer,
                "findings": result.findings,
                "visualization": result.visualization,
                "tool_results": result.tool_results,
                "reasoning_trace": result.reasoning_trace,
                "phase_trace": result.phase_trace,
                "cycles": result.cycles,
                "planning_exhausted": result.planning_exhausted,
                "duration_ms": result.duration_ms,
            }))),
        ),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Chat turn failed");
            (
                status_for(&e),
                Json(ApiResponse::error(format!("Turn failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Session & Audit Endpoints
/// =============================

async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.sessions().load(&session_id).await {
        Ok(Some(session)) => (StatusCode::OK, Json(ApiResponse::success(session))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Unknown session: {}", session_id))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn get_turn(
    State(state): State<ApiState>,
    Path(turn_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let audit_log = state.orchestrator.audit_log();

    let record = match audit_log.get(turn_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(format!("Unknown turn: {}", turn_id))),
            )
        }
        Err(e) => return (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    };

    match audit_log.verify_integrity(turn_id).await {
        Ok(verified) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "record": record,
                "integrity_verified": verified,
            }))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:session_id", get(get_session))
        .route("/api/turns/:turn_id", get(get_turn))
        .route("/api/cache/invalidate", post(invalidate_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
