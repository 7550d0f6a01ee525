//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use stash_engine::SyncRecord;

use crate::auth::SyncIdentity;
use crate::error::Result;
use crate::handlers::{handle_download, handle_upload, DownloadQuery, UploadResponse};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/upload", post(upload_handler))
        .route("/sync/download", get(download_handler))
}

/// POST /sync/upload - Store one change from a device.
async fn upload_handler(
    State(state): State<AppState>,
    identity: SyncIdentity,
    Json(record): Json<SyncRecord>,
) -> Result<Json<UploadResponse>> {
    let response = handle_upload(&state.pool, &identity, record).await?;
    Ok(Json(response))
}

/// GET /sync/download - Changes from the user's other devices.
async fn download_handler(
    State(state): State<AppState>,
    identity: SyncIdentity,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<Vec<SyncRecord>>> {
    let records =
        handle_download(&state.pool, &identity, query, state.config.download_limit).await?;
    Ok(Json(records))
}
