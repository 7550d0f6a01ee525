//! Transport seam between a device and its remote peer.

use super::SyncRecord;
use crate::{error::Result, Error, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Moves sync records between this device and the remote peer.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Deliver one local record to the peer.
    async fn upload(&self, record: &SyncRecord) -> Result<()>;

    /// Records from this user's other devices that the peer received after
    /// the receipt stamp `since`, in receipt order.
    ///
    /// The peer may cap the page size; callers page by passing the last
    /// record's [`SyncRecord::received_at`] until a page comes back empty.
    async fn download(&self, since: Timestamp) -> Result<Vec<SyncRecord>>;
}

/// An in-process peer shared by several devices.
///
/// Applies the same rules as the server: uploads are idempotent per
/// (user, device, store, record, version) and stamped with a strictly
/// increasing receipt stamp, and downloads are scoped to the requesting user,
/// exclude the requesting device and may be capped per page.
#[derive(Debug, Default)]
pub struct MemoryPeer {
    records: Mutex<Vec<SyncRecord>>,
    unreachable: AtomicBool,
    rejected_uploads: AtomicUsize,
    // 0 means no cap
    download_limit: AtomicUsize,
}

impl MemoryPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport for one device talking to this peer.
    pub fn connect(self: &Arc<Self>, device_id: impl Into<String>, user_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            peer: self.clone(),
            device_id: device_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Make every call fail with a network error until reset.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Fail the next `n` uploads with a network error.
    pub fn reject_next_uploads(&self, n: usize) {
        self.rejected_uploads.store(n, Ordering::SeqCst);
    }

    /// Return at most `limit` records per download, like a server's
    /// `DOWNLOAD_LIMIT`. `None` removes the cap.
    pub fn set_download_limit(&self, limit: Option<usize>) {
        self.download_limit.store(limit.unwrap_or(0), Ordering::SeqCst);
    }

    /// Everything the peer holds, in arrival order.
    pub fn records(&self) -> Vec<SyncRecord> {
        self.records.lock().clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Network("peer unreachable".into()));
        }
        Ok(())
    }

    fn accept(&self, record: &SyncRecord) -> Result<()> {
        self.check_reachable()?;
        let rejected = self
            .rejected_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if rejected.is_ok() {
            return Err(Error::Network("upload rejected".into()));
        }

        let mut records = self.records.lock();
        let duplicate = records.iter().any(|r| {
            r.user_id() == record.user_id()
                && r.device_id() == record.device_id()
                && r.store() == record.store()
                && r.record_id() == record.record_id()
                && r.version() == record.version()
        });
        if !duplicate {
            let received_at = records.last().and_then(SyncRecord::received_at).unwrap_or(0) + 1;
            records.push(record.clone().received(received_at));
        }
        Ok(())
    }

    fn changes_for(&self, user_id: &str, device_id: &str, since: Timestamp) -> Result<Vec<SyncRecord>> {
        self.check_reachable()?;
        let limit = match self.download_limit.load(Ordering::SeqCst) {
            0 => usize::MAX,
            n => n,
        };
        // arrival order is receipt order
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| {
                r.user_id() == user_id
                    && r.device_id() != device_id
                    && r.received_at().is_some_and(|at| at > since)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

/// One device's connection to a [`MemoryPeer`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peer: Arc<MemoryPeer>,
    device_id: String,
    user_id: String,
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn upload(&self, record: &SyncRecord) -> Result<()> {
        self.peer.accept(record)
    }

    async fn download(&self, since: Timestamp) -> Result<Vec<SyncRecord>> {
        self.peer.changes_for(&self.user_id, &self.device_id, since)
    }
}
