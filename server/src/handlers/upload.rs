//! Upload handler - stores one outbox record from a device.

use crate::auth::SyncIdentity;
use crate::db;
use crate::error::{AppError, Result};
use serde::Serialize;
use sqlx::PgPool;
use stash_engine::SyncRecord;

/// Response for an upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// False when this exact record (same version) was already stored
    pub stored: bool,
    pub store: String,
    pub record_id: String,
    pub version: u64,
}

/// Check that a record was authored by the identity uploading it.
pub fn check_author(identity: &SyncIdentity, record: &SyncRecord) -> Result<()> {
    if record.user_id() != identity.user_id || record.device_id() != identity.device_id {
        return Err(AppError::Forbidden(
            "record author does not match request identity".to_string(),
        ));
    }
    if record.store().is_empty() || record.record_id().is_empty() {
        return Err(AppError::BadRequest(
            "store and recordId must be non-empty".to_string(),
        ));
    }
    Ok(())
}

/// Process an upload. Re-uploading a stored record is accepted and ignored.
pub async fn handle_upload(
    pool: &PgPool,
    identity: &SyncIdentity,
    record: SyncRecord,
) -> Result<UploadResponse> {
    check_author(identity, &record)?;

    let stored = db::insert_sync_record(pool, &record).await?;
    if stored {
        tracing::debug!(
            user = %identity.user_id,
            device = %identity.device_id,
            store = %record.store(),
            id = %record.record_id(),
            version = record.version(),
            "stored sync record"
        );
    } else {
        tracing::debug!(
            store = %record.store(),
            id = %record.record_id(),
            version = record.version(),
            "duplicate upload ignored"
        );
    }

    Ok(UploadResponse {
        stored,
        store: record.store().to_string(),
        record_id: record.record_id().to_string(),
        version: record.version(),
    })
}
