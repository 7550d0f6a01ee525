//! Multi-device synchronization.
//!
//! Every local mutation is appended to an [`Outbox`] as an immutable
//! [`SyncRecord`]. A sync cycle ([`SyncCoordinator::perform_sync`]) uploads
//! the outbox, pages through the peer's changes after the download cursor,
//! detects and resolves conflicts, then prunes delivered entries and advances
//! the [`Watermark`].
//!
//! Two positions are tracked per device. The download cursor is the peer's
//! receipt stamp of the last record downloaded, so a change is fetched once
//! no matter how long its author held it offline. The watermark is this
//! device's clock at the end of its last cycle; local edits after it are the
//! ones that can conflict.

mod conflict;
mod coordinator;
mod http;
mod outbox;
mod transport;

pub use conflict::{ConflictLog, ConflictRecord};
pub use coordinator::{SyncCoordinator, SyncReport, SyncStatus};
pub use http::{HttpTransport, DEVICE_ID_HEADER, USER_ID_HEADER};
pub use outbox::{DeliveryState, Outbox, OutboxEntry};
pub use transport::{MemoryPeer, MemoryTransport, SyncTransport};

use crate::{error::Result, Error, RecordId, StoreName, Timestamp, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind of logged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// One logged mutation, as stored in the outbox and sent over the wire.
///
/// All fields are fixed at creation except `synced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    store: StoreName,
    record_id: RecordId,
    action: SyncAction,
    /// Full record after the mutation; `null` for deletes
    payload: Value,
    timestamp: Timestamp,
    device_id: String,
    user_id: String,
    version: Version,
    #[serde(default)]
    synced: bool,
    /// Receipt stamp assigned by the peer; strictly increasing per user,
    /// absent until the peer has stored the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    received_at: Option<Timestamp>,
}

impl SyncRecord {
    pub fn new(
        store: impl Into<StoreName>,
        record_id: impl Into<RecordId>,
        action: SyncAction,
        payload: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            store: store.into(),
            record_id: record_id.into(),
            action,
            payload,
            timestamp,
            device_id: String::new(),
            user_id: String::new(),
            version: 1,
            synced: false,
            received_at: None,
        }
    }

    /// Builder-style method to set the authoring device and user.
    pub fn by(mut self, device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self.user_id = user_id.into();
        self
    }

    /// Builder-style method to set the per-record version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Builder-style method for peers to stamp a stored record.
    pub fn received(mut self, received_at: Timestamp) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn action(&self) -> SyncAction {
        self.action
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn received_at(&self) -> Option<Timestamp> {
        self.received_at
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = true;
    }

    /// The payload's user-visible content, for comparison with a local record.
    pub fn content(&self) -> Option<Map<String, Value>> {
        let mut content = self.payload.as_object()?.clone();
        content.remove(crate::record::CREATED_AT);
        content.remove(crate::record::UPDATED_AT);
        Some(content)
    }
}

/// How conflicts are settled during a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Keep the local version, discard the remote change
    Client,
    /// Accept the remote change
    Server,
    /// The side with the newer timestamp wins
    #[default]
    LatestTimestamp,
    /// Record the conflict unresolved until [`SyncCoordinator::resolve_conflict`]
    Manual,
}

impl FromStr for ResolutionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(ResolutionPolicy::Client),
            "server" => Ok(ResolutionPolicy::Server),
            "latest" | "latest_timestamp" => Ok(ResolutionPolicy::LatestTimestamp),
            "manual" => Ok(ResolutionPolicy::Manual),
            other => Err(Error::InvalidConfig(format!(
                "unknown conflict policy: {other}"
            ))),
        }
    }
}

/// How a conflict was, or is to be, settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "camelCase")]
pub enum Resolution {
    KeepLocal,
    AcceptRemote,
    /// Write these fields as a new local version
    Merged(Map<String, Value>),
}

/// The time up to which this device is known to be reconciled with its peer.
/// Cloning shares the same cell.
#[derive(Debug, Clone, Default)]
pub struct Watermark(Arc<AtomicU64>);

impl Watermark {
    /// `None` until the first successful sync.
    pub fn get(&self) -> Option<Timestamp> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.0.store(ts, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format() {
        let record = SyncRecord::new("users", "u1", SyncAction::Update, json!({"id": "u1"}), 5)
            .by("device-a", "user-1")
            .with_version(3);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "store": "users",
                "recordId": "u1",
                "action": "update",
                "payload": {"id": "u1"},
                "timestamp": 5,
                "deviceId": "device-a",
                "userId": "user-1",
                "version": 3,
                "synced": false
            })
        );
        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn receipt_stamp_only_on_the_wire_once_stored() {
        let record = SyncRecord::new("users", "u1", SyncAction::Create, json!({"id": "u1"}), 5);
        let value = serde_json::to_value(record.clone().received(42)).unwrap();
        assert_eq!(value["receivedAt"], 42);

        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.received_at(), Some(42));
        assert_eq!(back.timestamp(), 5);
        assert_eq!(record.received_at(), None);
    }

    #[test]
    fn content_drops_timestamps() {
        let record = SyncRecord::new(
            "users",
            "u1",
            SyncAction::Update,
            json!({"id": "u1", "updatedAt": 9}),
            9,
        );
        assert_eq!(record.content().unwrap().len(), 1);
        let delete = SyncRecord::new("users", "u1", SyncAction::Delete, Value::Null, 9);
        assert_eq!(delete.content(), None);
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("Client".parse::<ResolutionPolicy>().unwrap(), ResolutionPolicy::Client);
        assert_eq!(
            "latest_timestamp".parse::<ResolutionPolicy>().unwrap(),
            ResolutionPolicy::LatestTimestamp
        );
        assert!(matches!(
            "coin-flip".parse::<ResolutionPolicy>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn watermark_is_shared() {
        let a = Watermark::default();
        let b = a.clone();
        assert_eq!(a.get(), None);
        b.set(42);
        assert_eq!(a.get(), Some(42));
    }
}
