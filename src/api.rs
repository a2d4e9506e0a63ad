//! REST API gateway
//!
//! Thin HTTP surface over the pipeline: one advise endpoint and a health
//! check. The gateway owns no behavior beyond identity parsing and
//! response shaping.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::models::SessionState;
use crate::pipeline::{Pipeline, PipelineRequest};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdviseRequest {
    pub prompt: String,
    pub user_id: Option<String>,
    /// Clarifying rounds already spent in this conversation.
    #[serde(default)]
    pub clarify_round: u8,
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
    pub pipeline: Arc<Pipeline>,
}

/// =============================
/// Helpers — Identity Parsing
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

fn session_to_response(state: &SessionState) -> serde_json::Value {
    serde_json::json!({
        "response": state.response,
        "trace_id": state.trace_id,
        "answer_mode": state.meta.answer_mode,
        "citations": state
            .advisory_context
            .as_ref()
            .map(|c| c.citations.clone())
            .unwrap_or_default(),
        "invoked_tools": state.meta.invoked_tools,
        "routing": state.route,
        "clarification": state.clarification,
        "reason_codes": state.meta.reason_codes,
        "fallback_used": state.meta.fallback_used,
        "policy_version": state.meta.policy_version,
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Advise Endpoint
/// =============================

async fn advise(
    State(state): State<ApiState>,
    Json(req): Json<AdviseRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("prompt must not be empty".into())),
        );
    }

    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");
    info!(%user_id, "Received advise request");

    let session = state
        .pipeline
        .run(PipelineRequest {
            prompt: req.prompt,
            user_id,
            clarify_round: req.clarify_round,
        })
        .await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(session_to_response(&session))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/advise", post(advise))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<Pipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
