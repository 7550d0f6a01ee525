//! Database operations for the sync_records table.

use sqlx::{PgPool, Row};
use stash_engine::{SyncAction, SyncRecord};

/// A stored sync record row from the database.
#[derive(Debug)]
pub struct StoredSyncRecord {
    pub user_id: String,
    pub device_id: String,
    pub store: String,
    pub record_id: String,
    pub action: String,
    pub payload: serde_json::Value,
    pub timestamp: i64,
    pub version: i64,
    pub received_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredSyncRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredSyncRecord {
            user_id: row.try_get("user_id")?,
            device_id: row.try_get("device_id")?,
            store: row.try_get("store")?,
            record_id: row.try_get("record_id")?,
            action: row.try_get("action")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
            version: row.try_get("version")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl StoredSyncRecord {
    /// Convert a database row back into the wire record.
    pub fn to_sync_record(&self) -> Result<SyncRecord, stash_engine::Error> {
        let action = parse_action(&self.action)?;
        Ok(SyncRecord::new(
            self.store.as_str(),
            self.record_id.as_str(),
            action,
            self.payload.clone(),
            self.timestamp.max(0) as u64,
        )
        .by(self.device_id.as_str(), self.user_id.as_str())
        .with_version(self.version.max(0) as u64)
        .received(self.received_at.max(0) as u64))
    }
}

/// Textual form of an action as stored in the `action` column.
pub fn action_name(action: SyncAction) -> &'static str {
    match action {
        SyncAction::Create => "create",
        SyncAction::Update => "update",
        SyncAction::Delete => "delete",
    }
}

fn parse_action(name: &str) -> Result<SyncAction, stash_engine::Error> {
    match name {
        "create" => Ok(SyncAction::Create),
        "update" => Ok(SyncAction::Update),
        "delete" => Ok(SyncAction::Delete),
        other => Err(stash_engine::Error::Serialization(format!(
            "unknown sync action: {}",
            other
        ))),
    }
}

/// Store an uploaded record. Returns `false` when the same (user, device,
/// store, record, version) was already stored.
///
/// Receipt stamps are assigned under a per-user advisory lock held until
/// commit, so a download never sees a stamp before every smaller stamp of
/// that user is visible.
pub async fn insert_sync_record(pool: &PgPool, record: &SyncRecord) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::BIGINT)")
        .bind(record.user_id())
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO sync_records (
            user_id, device_id, store, record_id, action, payload, timestamp, version, received_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8,
            GREATEST(
                (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT,
                COALESCE((SELECT MAX(received_at) FROM sync_records WHERE user_id = $1), 0) + 1
            )
        )
        ON CONFLICT (user_id, device_id, store, record_id, version) DO NOTHING
        "#,
    )
    .bind(record.user_id())
    .bind(record.device_id())
    .bind(record.store())
    .bind(record.record_id())
    .bind(action_name(record.action()))
    .bind(record.payload())
    .bind(record.timestamp() as i64)
    .bind(record.version() as i64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() == 1)
}

/// Records of `user_id` uploaded by other devices and received after the
/// stamp `since`, in receipt order.
pub async fn get_records_since(
    pool: &PgPool,
    user_id: &str,
    device_id: &str,
    since: i64,
    limit: i64,
) -> Result<Vec<StoredSyncRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredSyncRecord>(
        r#"
        SELECT user_id, device_id, store, record_id, action, payload, timestamp, version, received_at
        FROM sync_records
        WHERE user_id = $1 AND device_id <> $2 AND received_at > $3
        ORDER BY received_at ASC
        LIMIT $4
        "#,
    )
    .bind(user_id)
    .bind(device_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names_round_trip() {
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            assert_eq!(parse_action(action_name(action)).unwrap(), action);
        }
        assert!(parse_action("upsert").is_err());
    }

    #[test]
    fn row_converts_to_wire_record() {
        let row = StoredSyncRecord {
            user_id: "alice".into(),
            device_id: "phone".into(),
            store: "notes".into(),
            record_id: "n1".into(),
            action: "update".into(),
            payload: json!({"id": "n1", "text": "hi"}),
            timestamp: 1_706_745_600_000,
            version: 3,
            received_at: 1_706_745_700_000,
        };
        let record = row.to_sync_record().unwrap();
        assert_eq!(record.action(), SyncAction::Update);
        assert_eq!(record.device_id(), "phone");
        assert_eq!(record.version(), 3);
        assert_eq!(record.timestamp(), 1_706_745_600_000);
        assert_eq!(record.received_at(), Some(1_706_745_700_000));
    }
}
