//! Download handler - serves other devices' records to a device.

use crate::auth::SyncIdentity;
use crate::db;
use crate::error::{AppError, Result};
use serde::Deserialize;
use sqlx::PgPool;
use stash_engine::SyncRecord;

/// Query parameters for a download.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// ISO-8601 receipt stamp of the last record the device downloaded;
    /// everything when absent
    pub since: Option<String>,
    /// Maximum number of records to return
    pub limit: Option<i64>,
}

/// Parse the `since` parameter into epoch milliseconds.
pub fn parse_since(since: Option<&str>) -> Result<i64> {
    let Some(since) = since.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    chrono::DateTime::parse_from_rfc3339(since)
        .map(|ts| ts.timestamp_millis().max(0))
        .map_err(|_| AppError::BadRequest(format!("invalid since timestamp: {}", since)))
}

/// Clamp a requested limit to `1..=max`, defaulting to `max`.
pub fn effective_limit(requested: Option<i64>, max: i64) -> i64 {
    requested.map(|l| l.clamp(1, max)).unwrap_or(max)
}

/// Process a download request.
pub async fn handle_download(
    pool: &PgPool,
    identity: &SyncIdentity,
    query: DownloadQuery,
    max_limit: i64,
) -> Result<Vec<SyncRecord>> {
    let since = parse_since(query.since.as_deref())?;
    let limit = effective_limit(query.limit, max_limit);

    let rows = db::get_records_since(pool, &identity.user_id, &identity.device_id, since, limit).await?;
    if rows.len() as i64 == limit {
        tracing::debug!(
            user = %identity.user_id,
            device = %identity.device_id,
            limit,
            "download page full, device will request the next page"
        );
    }

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.to_sync_record() {
            Ok(record) => records.push(record),
            Err(e) => {
                // Skip rows that no longer parse
                tracing::warn!(store = %row.store, id = %row.record_id, "skipping stored record: {}", e);
            }
        }
    }

    tracing::debug!(
        user = %identity.user_id,
        device = %identity.device_id,
        since,
        count = records.len(),
        "served download"
    );
    Ok(records)
}
