//! The outbox: local mutations waiting to be uploaded.

use super::{SyncAction, SyncRecord};
use crate::store::{MutationEvent, MutationKind, MutationObserver};
use crate::{Origin, RecordId, StoreName, Version};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// `Unsynced → UploadAttempted → {Synced | Unsynced}`; synced entries are
/// pruned at the end of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Unsynced,
    UploadAttempted,
    Synced,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub seq: u64,
    pub record: SyncRecord,
    pub state: DeliveryState,
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<OutboxEntry>,
    next_seq: u64,
    versions: HashMap<(StoreName, RecordId), Version>,
}

/// Append-only log of local mutations for one device.
#[derive(Debug)]
pub struct Outbox {
    device_id: String,
    user_id: String,
    inner: Mutex<Inner>,
}

impl Outbox {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a mutation, assigning the record's next version.
    pub fn log(
        &self,
        store: &str,
        record_id: &str,
        action: SyncAction,
        payload: Value,
        timestamp: u64,
    ) -> SyncRecord {
        let mut inner = self.inner.lock();
        let version = inner
            .versions
            .entry((store.to_string(), record_id.to_string()))
            .or_insert(0);
        *version += 1;
        let record = SyncRecord::new(store, record_id, action, payload, timestamp)
            .by(self.device_id.as_str(), self.user_id.as_str())
            .with_version(*version);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(OutboxEntry {
            seq,
            record: record.clone(),
            state: DeliveryState::Unsynced,
            attempts: 0,
        });
        record
    }

    /// Move every unsynced entry to `UploadAttempted` and hand them out in
    /// log order.
    pub(crate) fn begin_upload(&self) -> Vec<(u64, SyncRecord)> {
        let mut inner = self.inner.lock();
        inner
            .entries
            .iter_mut()
            .filter(|e| e.state == DeliveryState::Unsynced)
            .map(|e| {
                e.state = DeliveryState::UploadAttempted;
                e.attempts += 1;
                (e.seq, e.record.clone())
            })
            .collect()
    }

    /// Settle an attempted upload.
    pub(crate) fn complete(&self, seq: u64, delivered: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.seq == seq) {
            if delivered {
                entry.state = DeliveryState::Synced;
                entry.record.mark_synced();
            } else {
                entry.state = DeliveryState::Unsynced;
            }
        }
    }

    /// Drop synced entries. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.state != DeliveryState::Synced);
        before - inner.entries.len()
    }

    /// Records not yet confirmed uploaded.
    pub fn pending(&self) -> Vec<SyncRecord> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.state != DeliveryState::Synced)
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.state != DeliveryState::Synced)
            .count()
    }

    /// Whether any entry, delivered or not, is about this record.
    pub fn touches(&self, store: &str, record_id: &str) -> bool {
        self.inner
            .lock()
            .entries
            .iter()
            .any(|e| e.record.store() == store && e.record.record_id() == record_id)
    }

    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.inner.lock().entries.clone()
    }
}

impl MutationObserver for Outbox {
    fn on_mutation(&self, event: &MutationEvent) {
        if event.origin != Origin::Local {
            return;
        }
        let Some(id) = &event.id else {
            return;
        };
        let (action, payload) = match event.kind {
            MutationKind::Create => (SyncAction::Create, event.after.clone()),
            MutationKind::Update => (SyncAction::Update, event.after.clone()),
            MutationKind::Delete => (SyncAction::Delete, None),
            MutationKind::Clear => return,
        };
        let payload = payload.map(|r| r.into_value()).unwrap_or(Value::Null);
        self.log(&event.store, id, action, payload, event.timestamp);
    }
}
