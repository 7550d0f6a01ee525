//! Liveness endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Server time, so devices can spot clock skew against their watermark
    pub server_time: String,
    pub auth_required: bool,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server_time: stash_engine::clock::to_iso8601(chrono::Utc::now().timestamp_millis().max(0) as u64),
        auth_required: state.config.auth_secret.is_some(),
    })
}

async fn root() -> &'static str {
    "Stash Sync Server"
}
