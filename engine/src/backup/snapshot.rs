//! Backup snapshots and their integrity metadata.
//!
//! A snapshot is serialized deterministically (`BTreeMap`s throughout, and
//! `serde_json` objects are key-sorted), so the SHA-256 checksum computed over
//! the serialized snapshot with `metadata.checksum` set to `""` is stable
//! across export and import.

use crate::{error::Result, Error, Record, StoreName, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

const REQUIRED_FIELDS: &[&str] = &["id", "timestamp", "formatVersion", "stores", "metadata"];
const REQUIRED_METADATA: &[&str] = &["totalRecords", "perStoreCounts", "byteSize", "checksum"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Full,
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub total_records: usize,
    pub per_store_counts: BTreeMap<StoreName, usize>,
    /// Length of the compact JSON encoding of `stores`
    pub byte_size: usize,
    /// Hex SHA-256 of the snapshot serialized with this field empty
    pub checksum: String,
}

/// A point-in-time copy of selected stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub id: String,
    pub timestamp: Timestamp,
    pub format_version: u32,
    #[serde(default)]
    pub kind: BackupKind,
    /// Reference snapshot of an incremental backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backup_id: Option<String>,
    /// Sync watermark at capture time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_watermark: Option<Timestamp>,
    pub stores: BTreeMap<StoreName, Vec<Record>>,
    pub metadata: BackupMetadata,
}

/// Listing entry without the record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub id: String,
    pub timestamp: Timestamp,
    pub kind: BackupKind,
    pub base_backup_id: Option<String>,
    pub total_records: usize,
    pub byte_size: usize,
}

impl BackupSnapshot {
    /// Build a sealed snapshot: counts, byte size and checksum filled in.
    pub fn new(
        id: impl Into<String>,
        timestamp: Timestamp,
        kind: BackupKind,
        stores: BTreeMap<StoreName, Vec<Record>>,
    ) -> Result<Self> {
        let mut snapshot = Self {
            id: id.into(),
            timestamp,
            format_version: BACKUP_FORMAT_VERSION,
            kind,
            base_backup_id: None,
            sync_watermark: None,
            stores,
            metadata: BackupMetadata::default(),
        };
        snapshot.seal()?;
        Ok(snapshot)
    }

    pub fn with_base(mut self, base_backup_id: Option<String>) -> Result<Self> {
        self.base_backup_id = base_backup_id;
        self.seal()?;
        Ok(self)
    }

    pub fn with_watermark(mut self, watermark: Option<Timestamp>) -> Result<Self> {
        self.sync_watermark = watermark;
        self.seal()?;
        Ok(self)
    }

    /// Recompute counts, byte size and checksum from the current content.
    pub fn seal(&mut self) -> Result<()> {
        self.metadata.per_store_counts = self
            .stores
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect();
        self.metadata.total_records = self.metadata.per_store_counts.values().sum();
        self.metadata.byte_size = serde_json::to_vec(&self.stores)?.len();
        self.metadata.checksum = self.compute_checksum()?;
        Ok(())
    }

    /// Checksum of the canonical serialization with the checksum field empty.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.metadata.checksum = String::new();
        let bytes = serde_json::to_vec(&unsealed)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Fail with `CorruptBackup` unless the stored checksum matches.
    pub fn verify(&self) -> Result<()> {
        let actual = self.compute_checksum()?;
        if actual != self.metadata.checksum {
            return Err(Error::CorruptBackup(format!(
                "checksum mismatch for backup {}: expected {}, computed {}",
                self.id, self.metadata.checksum, actual
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            kind: self.kind,
            base_backup_id: self.base_backup_id.clone(),
            total_records: self.metadata.total_records,
            byte_size: self.metadata.byte_size,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse an exported snapshot, checking structural completeness first.
    /// The checksum is not verified here; restore does that.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidBackup(format!("not valid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidBackup("expected a JSON object".into()))?;
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(Error::InvalidBackup(format!("missing field: {missing}")));
        }
        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::InvalidBackup("metadata must be an object".into()))?;
        if let Some(missing) = REQUIRED_METADATA.iter().find(|f| !metadata.contains_key(**f)) {
            return Err(Error::InvalidBackup(format!("missing field: metadata.{missing}")));
        }

        let snapshot: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidBackup(e.to_string()))?;
        if snapshot.format_version > BACKUP_FORMAT_VERSION {
            return Err(Error::InvalidBackup(format!(
                "unsupported backup format version: {} (max supported: {})",
                snapshot.format_version, BACKUP_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}
