//! BackupCoordinator - snapshot capture, verified restore, retention and
//! export/import.
//!
//! Snapshots are kept in memory, most recent first, capped at
//! [`BackupConfig::max_backups`]. Restore verifies the snapshot checksum
//! before touching any store and refuses a corrupt snapshot outright; after
//! that, per-record failures are logged and skipped. Restore is not atomic
//! across stores.

mod crypto;
mod snapshot;

pub use crypto::{is_sealed, ExportCipher};
pub use snapshot::{BackupKind, BackupMetadata, BackupSnapshot, BackupSummary, BACKUP_FORMAT_VERSION};

use crate::sync::Watermark;
use crate::task::TaskHandle;
use crate::{
    error::Result, BackupConfig, Database, Error, Origin, QueryOptions, Record, StoreName, Timestamp,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// What to capture, and how to export it later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    /// Only these stores; all stores when `None`
    pub include_stores: Option<Vec<StoreName>>,
    #[serde(default)]
    pub exclude_stores: Vec<StoreName>,
    /// Export as compact JSON rather than pretty-printed
    #[serde(default)]
    pub compress: bool,
    /// Export inside an AES-256-GCM envelope
    #[serde(default)]
    pub encrypt: bool,
}

impl BackupOptions {
    pub fn include(mut self, stores: &[&str]) -> Self {
        self.include_stores = Some(stores.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn exclude(mut self, store: impl Into<StoreName>) -> Self {
        self.exclude_stores.push(store.into());
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }
}

/// How a restored record meets an existing record with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Replace unconditionally
    #[default]
    Overwrite,
    /// Leave the existing record untouched
    Skip,
    /// Shallow-merge backup fields over the existing record
    Merge,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    #[serde(default)]
    pub clear_existing: bool,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    pub include_stores: Option<Vec<StoreName>>,
}

impl RestoreOptions {
    pub fn clear_existing(mut self) -> Self {
        self.clear_existing = true;
        self
    }

    pub fn strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn include(mut self, stores: &[&str]) -> Self {
        self.include_stores = Some(stores.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Restored records per store
    pub per_store: BTreeMap<StoreName, usize>,
}

#[derive(Debug, Clone)]
struct StoredBackup {
    snapshot: BackupSnapshot,
    compress: bool,
    encrypt: bool,
}

pub struct BackupCoordinator {
    db: Arc<Database>,
    config: BackupConfig,
    /// Most recent first
    backups: RwLock<VecDeque<StoredBackup>>,
    watermark: Option<Watermark>,
}

impl BackupCoordinator {
    pub fn new(db: Arc<Database>, config: BackupConfig) -> Self {
        Self {
            db,
            config,
            backups: RwLock::new(VecDeque::new()),
            watermark: None,
        }
    }

    /// Record this sync watermark in every snapshot taken.
    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Copy every selected store into a new snapshot.
    pub fn create_full_backup(&self, options: &BackupOptions) -> Result<BackupSnapshot> {
        self.capture(options, BackupKind::Full, None, |_| true)
    }

    /// Copy the records of each selected store modified strictly after the
    /// reference backup's timestamp (the epoch without one).
    pub fn create_incremental_backup(
        &self,
        since_backup_id: Option<&str>,
        options: &BackupOptions,
    ) -> Result<BackupSnapshot> {
        let since: Timestamp = match since_backup_id {
            Some(id) => self.find(id)?.snapshot.timestamp,
            None => 0,
        };
        self.capture(
            options,
            BackupKind::Incremental,
            since_backup_id.map(str::to_string),
            |record| record.last_modified().map_or(true, |t| t > since),
        )
    }

    fn capture(
        &self,
        options: &BackupOptions,
        kind: BackupKind,
        base: Option<String>,
        keep: impl Fn(&Record) -> bool,
    ) -> Result<BackupSnapshot> {
        let mut stores = BTreeMap::new();
        for store in self.select_stores(options)? {
            let records: Vec<Record> = self
                .db
                .get_all(&store, &QueryOptions::default())?
                .into_iter()
                .filter(|r| keep(r))
                .collect();
            stores.insert(store, records);
        }

        let id = format!("backup-{}", uuid::Uuid::new_v4());
        let snapshot = BackupSnapshot::new(id, self.db.now(), kind, stores)?
            .with_base(base)?
            .with_watermark(self.watermark.as_ref().and_then(Watermark::get))?;

        tracing::info!(
            id = %snapshot.id,
            kind = ?kind,
            records = snapshot.metadata.total_records,
            bytes = snapshot.metadata.byte_size,
            "created backup"
        );
        self.retain(StoredBackup {
            snapshot: snapshot.clone(),
            compress: options.compress,
            encrypt: options.encrypt,
        });
        Ok(snapshot)
    }

    fn select_stores(&self, options: &BackupOptions) -> Result<Vec<StoreName>> {
        let selected = match &options.include_stores {
            Some(include) => {
                for store in include {
                    self.db.definition(store)?;
                }
                include.clone()
            }
            None => self.db.stores(),
        };
        Ok(selected
            .into_iter()
            .filter(|s| !options.exclude_stores.contains(s))
            .collect())
    }

    fn retain(&self, backup: StoredBackup) {
        let mut backups = self.backups.write();
        backups.retain(|b| b.snapshot.id != backup.snapshot.id);
        backups.push_front(backup);
        while backups.len() > self.config.max_backups.max(1) {
            if let Some(evicted) = backups.pop_back() {
                tracing::debug!(id = %evicted.snapshot.id, "evicted oldest backup");
            }
        }
    }

    fn find(&self, id: &str) -> Result<StoredBackup> {
        self.backups
            .read()
            .iter()
            .find(|b| b.snapshot.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                store: "backups".into(),
                id: id.to_string(),
            })
    }

    /// Restore a snapshot. The checksum is verified before any mutation; a
    /// mismatch fails with `CorruptBackup` and changes nothing.
    pub fn restore_from_backup(&self, id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let snapshot = self.find(id)?.snapshot;
        if let Err(err) = snapshot.verify() {
            tracing::warn!(id, %err, "refusing to restore corrupt backup");
            return Err(err);
        }

        let mut report = RestoreReport::default();
        for (store, records) in &snapshot.stores {
            if let Some(include) = &options.include_stores {
                if !include.contains(store) {
                    continue;
                }
            }
            let key_path = match self.db.definition(store) {
                Ok(def) => def.key_path.clone(),
                Err(err) => {
                    tracing::warn!(store = %store, %err, "skipping store missing from database");
                    report.failed += records.len();
                    continue;
                }
            };
            if options.clear_existing {
                self.db.clear_from(store, Origin::Restore)?;
            }

            let mut restored = 0;
            for record in records {
                match self.apply(store, &key_path, record, options.merge_strategy) {
                    Ok(true) => restored += 1,
                    Ok(false) => report.skipped += 1,
                    Err(err) => {
                        tracing::warn!(
                            store = %store,
                            id = ?record.key(&key_path),
                            %err,
                            "failed to restore record"
                        );
                        report.failed += 1;
                    }
                }
            }
            report.restored += restored;
            report.per_store.insert(store.clone(), restored);
        }

        tracing::info!(
            id,
            restored = report.restored,
            skipped = report.skipped,
            failed = report.failed,
            "restored backup"
        );
        Ok(report)
    }

    /// Returns whether the record was written.
    fn apply(
        &self,
        store: &str,
        key_path: &str,
        record: &Record,
        strategy: MergeStrategy,
    ) -> Result<bool> {
        let id = record
            .key(key_path)
            .ok_or_else(|| Error::validation(key_path, "backup record has no key"))?;
        let existing = self.db.get(store, &id)?;
        let record = match (strategy, existing) {
            (MergeStrategy::Skip, Some(_)) => return Ok(false),
            (MergeStrategy::Merge, Some(mut existing)) => {
                existing.merge_from(record);
                existing
            }
            _ => record.clone(),
        };
        self.db.put_from(store, record, Origin::Restore)?;
        Ok(true)
    }

    /// Retained backups, most recent first.
    pub fn list_backups(&self) -> Vec<BackupSummary> {
        self.backups
            .read()
            .iter()
            .map(|b| b.snapshot.summary())
            .collect()
    }

    pub fn get_backup(&self, id: &str) -> Option<BackupSnapshot> {
        self.find(id).ok().map(|b| b.snapshot)
    }

    pub fn delete_backup(&self, id: &str) -> bool {
        let mut backups = self.backups.write();
        let before = backups.len();
        backups.retain(|b| b.snapshot.id != id);
        backups.len() != before
    }

    /// Check a retained snapshot's checksum.
    pub fn verify_backup(&self, id: &str) -> Result<()> {
        self.find(id)?.snapshot.verify()
    }

    /// Serialize a snapshot for transport, honouring the `compress` and
    /// `encrypt` options it was created with.
    pub fn export_backup(&self, id: &str) -> Result<Vec<u8>> {
        let backup = self.find(id)?;
        let json = if backup.compress {
            backup.snapshot.to_json()?
        } else {
            backup.snapshot.to_json_pretty()?
        };
        if backup.encrypt {
            self.cipher()?.seal(&json)
        } else {
            Ok(json)
        }
    }

    /// Accept an exported snapshot, encrypted or not, and retain it. Only
    /// structure is checked here; the checksum is checked on restore.
    pub fn import_backup(&self, data: &[u8]) -> Result<BackupSummary> {
        let (json, encrypt) = if is_sealed(data) {
            (self.cipher()?.open(data)?, true)
        } else {
            (data.to_vec(), false)
        };
        let snapshot = BackupSnapshot::from_json(&json)?;
        let summary = snapshot.summary();
        tracing::info!(id = %summary.id, records = summary.total_records, "imported backup");
        self.retain(StoredBackup {
            snapshot,
            compress: !json.contains(&b'\n'),
            encrypt,
        });
        Ok(summary)
    }

    pub fn export_to_file(&self, id: &str, path: impl AsRef<Path>) -> Result<()> {
        let data = self.export_backup(id)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn import_from_file(&self, path: impl AsRef<Path>) -> Result<BackupSummary> {
        let data = std::fs::read(path)?;
        self.import_backup(&data)
    }

    fn cipher(&self) -> Result<ExportCipher> {
        let key = self
            .config
            .encryption_key
            .as_deref()
            .ok_or_else(|| Error::Encryption("no encryption key configured".into()))?;
        ExportCipher::from_hex(key)
    }

    /// Take a full backup every `interval` until the handle stops.
    pub fn start_auto_backup(self: &Arc<Self>, interval: Duration, options: BackupOptions) -> TaskHandle {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        TaskHandle::spawn_periodic("auto-backup", interval, move || {
            let coordinator = coordinator.clone();
            let options = options.clone();
            async move {
                if let Some(coordinator) = coordinator.upgrade() {
                    if let Err(err) = coordinator.create_full_backup(&options) {
                        tracing::warn!(%err, "automatic backup failed");
                    }
                }
            }
        })
    }
}
