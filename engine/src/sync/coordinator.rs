//! The sync cycle and its connectivity-aware timer.

use super::{
    ConflictLog, ConflictRecord, HttpTransport, Outbox, Resolution, ResolutionPolicy, SyncAction,
    SyncRecord, SyncTransport, Watermark,
};
use crate::task::TaskHandle;
use crate::{error::Result, Database, Error, Origin, Record, SyncConfig, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters from one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub uploaded: usize,
    pub upload_failed: usize,
    pub downloaded: usize,
    pub applied: usize,
    /// Conflicts detected in this cycle
    pub conflicts: usize,
    pub apply_failed: usize,
    pub pruned: usize,
    /// Download requests made; the last one returns an empty page
    pub pages: usize,
    /// Watermark after the cycle
    pub watermark: Timestamp,
    /// Download cursor after the cycle
    pub cursor: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub in_progress: bool,
    pub auto_sync: bool,
    pub pending: usize,
    pub unresolved_conflicts: usize,
    pub last_sync: Option<Timestamp>,
    pub watermark: Option<Timestamp>,
    pub cursor: Option<Timestamp>,
}

enum Outcome {
    Applied,
    Unchanged,
    Conflict { applied: bool },
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncCoordinator {
    db: Arc<Database>,
    config: SyncConfig,
    transport: Arc<dyn SyncTransport>,
    outbox: Arc<Outbox>,
    conflicts: ConflictLog,
    watermark: Watermark,
    cursor: Watermark,
    online: AtomicBool,
    in_progress: AtomicBool,
    last_sync: AtomicU64,
    auto_sync_enabled: AtomicBool,
    auto_sync: Mutex<Option<TaskHandle>>,
}

impl SyncCoordinator {
    /// Create a coordinator and start logging local mutations of `db`.
    pub fn new(db: Arc<Database>, config: SyncConfig, transport: Arc<dyn SyncTransport>) -> Arc<Self> {
        let outbox = Arc::new(Outbox::new(config.device_id.as_str(), config.user_id.as_str()));
        db.subscribe(outbox.clone());
        Arc::new(Self {
            db,
            config,
            transport,
            outbox,
            conflicts: ConflictLog::new(),
            watermark: Watermark::default(),
            cursor: Watermark::default(),
            online: AtomicBool::new(true),
            in_progress: AtomicBool::new(false),
            last_sync: AtomicU64::new(0),
            auto_sync_enabled: AtomicBool::new(false),
            auto_sync: Mutex::new(None),
        })
    }

    /// Coordinator talking to `config.base_url` over HTTP.
    pub fn over_http(db: Arc<Database>, config: SyncConfig) -> Result<Arc<Self>> {
        let transport = HttpTransport::from_config(&config)?;
        Ok(Self::new(db, config, Arc::new(transport)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared handle to this device's watermark.
    pub fn watermark(&self) -> Watermark {
        self.watermark.clone()
    }

    /// Shared handle to the peer receipt stamp of the last record downloaded.
    pub fn cursor(&self) -> Watermark {
        self.cursor.clone()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Local mutations not yet confirmed uploaded.
    pub fn pending(&self) -> Vec<SyncRecord> {
        self.outbox.pending()
    }

    /// Every conflict recorded, resolved or not.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.all()
    }

    pub fn unresolved_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.unresolved()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            online: self.is_online(),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            auto_sync: self.auto_sync_enabled.load(Ordering::SeqCst),
            pending: self.outbox.pending_count(),
            unresolved_conflicts: self.conflicts.unresolved().len(),
            last_sync: match self.last_sync.load(Ordering::SeqCst) {
                0 => None,
                ts => Some(ts),
            },
            watermark: self.watermark.get(),
            cursor: self.cursor.get(),
        }
    }

    /// Run one cycle: upload, download, reconcile, clean up.
    ///
    /// Fails with `Offline` while offline and `SyncInProgress` if another
    /// cycle is running. Per-record upload and apply failures are logged and
    /// counted, not returned.
    pub async fn perform_sync(&self) -> Result<SyncReport> {
        if !self.is_online() {
            return Err(Error::Offline);
        }
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(Error::SyncInProgress);
        }
        let _running = Running(&self.in_progress);
        let since = self.watermark.get().unwrap_or(0);
        let mut report = SyncReport::default();

        for (seq, record) in self.outbox.begin_upload() {
            match self.transport.upload(&record).await {
                Ok(()) => {
                    self.outbox.complete(seq, true);
                    report.uploaded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        store = %record.store(),
                        id = %record.record_id(),
                        version = record.version(),
                        %err,
                        "upload failed, will retry next cycle"
                    );
                    self.outbox.complete(seq, false);
                    report.upload_failed += 1;
                }
            }
        }

        // page until the peer has nothing newer; the cursor moves after
        // each page so a failed request resumes where it stopped
        let mut cursor = self.cursor.get().unwrap_or(0);
        loop {
            let changes = match self.transport.download(cursor).await {
                Ok(changes) => changes,
                Err(err) => {
                    tracing::warn!(%err, cursor, "download failed");
                    return Err(err);
                }
            };
            report.pages += 1;
            if changes.is_empty() {
                break;
            }
            report.downloaded += changes.len();
            self.reconcile_page(&changes, since, &mut report);

            match changes.iter().filter_map(SyncRecord::received_at).max() {
                Some(next) if next > cursor => {
                    cursor = next;
                    self.cursor.set(next);
                }
                _ => {
                    tracing::warn!(cursor, "peer sent records without newer receipt stamps");
                    break;
                }
            }
        }

        report.pruned = self.outbox.prune();
        let now = self.db.now();
        self.watermark.set(now);
        self.last_sync.store(now, Ordering::SeqCst);
        report.watermark = now;
        report.cursor = self.cursor.get();

        tracing::info!(
            uploaded = report.uploaded,
            upload_failed = report.upload_failed,
            downloaded = report.downloaded,
            pages = report.pages,
            applied = report.applied,
            conflicts = report.conflicts,
            "sync cycle complete"
        );
        Ok(report)
    }

    fn reconcile_page(&self, changes: &[SyncRecord], since: Timestamp, report: &mut SyncReport) {
        for remote in changes {
            match self.reconcile(remote, since) {
                Ok(Outcome::Applied) => report.applied += 1,
                Ok(Outcome::Unchanged) => {}
                Ok(Outcome::Conflict { applied }) => {
                    report.conflicts += 1;
                    if applied {
                        report.applied += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        store = %remote.store(),
                        id = %remote.record_id(),
                        %err,
                        "failed to apply remote change"
                    );
                    report.apply_failed += 1;
                }
            }
        }
    }

    /// Every downloaded change is new to this device, so it conflicts when
    /// the local record was also edited after the watermark and differs.
    fn reconcile(&self, remote: &SyncRecord, since: Timestamp) -> Result<Outcome> {
        if remote.device_id() == self.config.device_id {
            return Ok(Outcome::Unchanged);
        }
        self.db.definition(remote.store())?;

        // only records edited on this device, or still in conflict, can
        // conflict again
        let open_conflict = self.conflicts.has_unresolved(remote.store(), remote.record_id());
        let local = if open_conflict || self.outbox.touches(remote.store(), remote.record_id()) {
            self.db.get(remote.store(), remote.record_id())?
        } else {
            None
        };
        if let Some(local) = local {
            let local_ts = local.last_modified().unwrap_or(0);
            let differs = remote.content().as_ref() != Some(&local.content());
            if differs && (open_conflict || local_ts > since) {
                return self.handle_conflict(local, local_ts, remote);
            }
        }

        self.apply_remote(remote.store(), remote.record_id(), remote.payload())?;
        Ok(Outcome::Applied)
    }

    fn handle_conflict(&self, local: Record, local_ts: Timestamp, remote: &SyncRecord) -> Result<Outcome> {
        let conflict = ConflictRecord::new(local.into_value(), local_ts, remote, self.db.now());
        let conflict_id = conflict.id.clone();
        if !self.conflicts.record(conflict) {
            tracing::debug!(
                store = %remote.store(),
                id = %remote.record_id(),
                "conflict already recorded"
            );
            return Ok(Outcome::Unchanged);
        }

        let resolution = match self.config.policy {
            ResolutionPolicy::Client => Some(Resolution::KeepLocal),
            ResolutionPolicy::Server => Some(Resolution::AcceptRemote),
            ResolutionPolicy::LatestTimestamp if remote.timestamp() > local_ts => {
                Some(Resolution::AcceptRemote)
            }
            ResolutionPolicy::LatestTimestamp => Some(Resolution::KeepLocal),
            ResolutionPolicy::Manual => None,
        };
        tracing::info!(
            store = %remote.store(),
            id = %remote.record_id(),
            policy = ?self.config.policy,
            resolution = ?resolution,
            "conflict detected"
        );

        let Some(resolution) = resolution else {
            return Ok(Outcome::Conflict { applied: false });
        };
        let applied = resolution == Resolution::AcceptRemote;
        if applied {
            self.apply_remote(remote.store(), remote.record_id(), remote.payload())?;
        }
        self.conflicts.resolve(&conflict_id, resolution);
        Ok(Outcome::Conflict { applied })
    }

    /// Write a remote payload locally without logging it to the outbox.
    /// A `null` payload deletes.
    fn apply_remote(&self, store: &str, record_id: &str, payload: &Value) -> Result<()> {
        if payload.is_null() {
            return self.db.delete_from(store, record_id, Origin::Remote);
        }
        let record = Record::from_value(payload.clone())?;
        self.db.put_from(store, record, Origin::Remote)?;
        Ok(())
    }

    /// Settle an unresolved conflict by hand.
    ///
    /// `Merged` fields are written as a new local version, so they are
    /// uploaded on the next cycle like any local edit.
    pub fn resolve_conflict(&self, conflict_id: &str, resolution: Resolution) -> Result<ConflictRecord> {
        let conflict = self.conflicts.get(conflict_id).ok_or_else(|| Error::NotFound {
            store: "conflicts".into(),
            id: conflict_id.to_string(),
        })?;
        if conflict.resolved {
            return Err(Error::validation("resolution", "conflict is already resolved"));
        }

        match &resolution {
            Resolution::KeepLocal => {}
            Resolution::AcceptRemote => {
                self.apply_remote(&conflict.store, &conflict.record_id, &conflict.remote_payload)?;
            }
            Resolution::Merged(fields) => {
                let key_path = &self.db.definition(&conflict.store)?.key_path;
                let mut record = Record::from(fields.clone());
                if record.get(key_path).is_none() {
                    record.set(key_path.clone(), Value::from(conflict.record_id.clone()));
                }
                self.db.put(&conflict.store, record)?;
            }
        }

        tracing::info!(conflict = conflict_id, resolution = ?resolution, "conflict resolved");
        self.conflicts
            .resolve(conflict_id, resolution)
            .ok_or_else(|| Error::validation("resolution", "conflict is already resolved"))
    }

    /// Record a local mutation by hand, for changes made outside the database.
    pub fn log_change(&self, store: &str, record_id: &str, action: SyncAction, payload: Value) -> SyncRecord {
        self.outbox.log(store, record_id, action, payload, self.db.now())
    }

    /// Report a connectivity change. Going offline stops the auto-sync
    /// timer; coming back online restarts it and triggers an immediate sync
    /// if auto-sync is enabled. Cycles already running are not cancelled.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }
        tracing::info!(online, "connectivity changed");
        if !online {
            self.stop_timer();
        } else if self.auto_sync_enabled.load(Ordering::SeqCst) {
            self.start_timer();
            let sync = self.clone();
            tokio::spawn(async move { sync.run_logged().await });
        }
    }

    /// Sync every `auto_sync_interval` while online. Must be called from
    /// within a tokio runtime.
    pub fn start_auto_sync(self: &Arc<Self>) {
        self.auto_sync_enabled.store(true, Ordering::SeqCst);
        if self.is_online() {
            self.start_timer();
        }
    }

    pub fn stop_auto_sync(&self) {
        self.auto_sync_enabled.store(false, Ordering::SeqCst);
        self.stop_timer();
    }

    fn start_timer(self: &Arc<Self>) {
        let mut slot = self.auto_sync.lock();
        if slot.as_ref().is_some_and(TaskHandle::is_running) {
            return;
        }
        let sync = Arc::downgrade(self);
        *slot = Some(TaskHandle::spawn_periodic(
            "auto-sync",
            self.config.auto_sync_interval,
            move || {
                let sync = sync.clone();
                async move {
                    if let Some(sync) = sync.upgrade() {
                        sync.run_logged().await;
                    }
                }
            },
        ));
    }

    fn stop_timer(&self) {
        if let Some(mut timer) = self.auto_sync.lock().take() {
            timer.stop();
        }
    }

    async fn run_logged(&self) {
        match self.perform_sync().await {
            Ok(_) => {}
            Err(Error::SyncInProgress) => tracing::debug!("sync already running, skipping tick"),
            Err(err) => tracing::warn!(%err, "automatic sync failed"),
        }
    }
}
