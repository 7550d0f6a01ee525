//! Conflict log: every detected conflict, resolved or not.

use super::{Resolution, SyncRecord};
use crate::{RecordId, StoreName, Timestamp, Version};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// A record changed on both sides since the last watermark.
///
/// `Detected → Resolved`; never the other way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: String,
    pub store: StoreName,
    pub record_id: RecordId,
    pub local_payload: Value,
    pub remote_payload: Value,
    pub local_timestamp: Timestamp,
    pub remote_timestamp: Timestamp,
    pub remote_device_id: String,
    pub remote_version: Version,
    pub detected_at: Timestamp,
    pub resolved: bool,
    pub resolution: Option<Resolution>,
}

impl ConflictRecord {
    pub(crate) fn new(
        local_payload: Value,
        local_timestamp: Timestamp,
        remote: &SyncRecord,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            store: remote.store().to_string(),
            record_id: remote.record_id().to_string(),
            local_payload,
            remote_payload: remote.payload().clone(),
            local_timestamp,
            remote_timestamp: remote.timestamp(),
            remote_device_id: remote.device_id().to_string(),
            remote_version: remote.version(),
            detected_at,
            resolved: false,
            resolution: None,
        }
    }

    /// Identity of the remote change this conflict is about.
    fn same_change(&self, other: &ConflictRecord) -> bool {
        self.store == other.store
            && self.record_id == other.record_id
            && self.remote_device_id == other.remote_device_id
            && self.remote_version == other.remote_version
    }
}

#[derive(Debug, Default)]
pub struct ConflictLog {
    entries: Mutex<Vec<ConflictRecord>>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a conflict unless one already exists for the same remote change
    /// (store, record id, remote device and version). Returns whether it was
    /// added.
    pub fn record(&self, conflict: ConflictRecord) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|c| c.same_change(&conflict)) {
            return false;
        }
        entries.push(conflict);
        true
    }

    /// Mark a conflict resolved. Resolved conflicts stay resolved.
    pub fn resolve(&self, id: &str, resolution: Resolution) -> Option<ConflictRecord> {
        let mut entries = self.entries.lock();
        let conflict = entries.iter_mut().find(|c| c.id == id && !c.resolved)?;
        conflict.resolved = true;
        conflict.resolution = Some(resolution);
        Some(conflict.clone())
    }

    /// Whether an unresolved conflict exists for this record.
    pub fn has_unresolved(&self, store: &str, record_id: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|c| !c.resolved && c.store == store && c.record_id == record_id)
    }

    pub fn get(&self, id: &str) -> Option<ConflictRecord> {
        self.entries.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn all(&self) -> Vec<ConflictRecord> {
        self.entries.lock().clone()
    }

    pub fn unresolved(&self) -> Vec<ConflictRecord> {
        self.entries
            .lock()
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
