//! Configuration types.
//!
//! [`DbConfig`] declares the stores and their indexes; it is the only thing
//! needed to open a [`Database`](crate::Database). [`EngineConfig`] carries
//! the tunables of the cache, backup and sync layers.

use crate::sync::ResolutionPolicy;
use crate::{error::Result, Error, RuleSet, StoreName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// A single field or an ordered list of fields addressing a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Composite(Vec<String>),
}

impl KeyPath {
    /// Stable textual form: `email` or `last+first`.
    pub fn name(&self) -> String {
        match self {
            KeyPath::Single(f) => f.clone(),
            KeyPath::Composite(fs) => fs.join("+"),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(field: &str) -> Self {
        KeyPath::Single(field.to_string())
    }
}

/// A secondary index on a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Declaration of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDefinition {
    pub name: StoreName,
    /// Field holding the record key
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Generate integer keys instead of UUIDs when a record has none
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    /// Validation rules applied on every write
    #[serde(default, skip_serializing_if = "RuleSet::is_empty")]
    pub rules: RuleSet,
}

fn default_key_path() -> String {
    "id".to_string()
}

impl StoreDefinition {
    pub fn new(name: impl Into<StoreName>) -> Self {
        Self {
            name: name.into(),
            key_path: default_key_path(),
            auto_increment: false,
            indexes: Vec::new(),
            rules: RuleSet::new(),
        }
    }

    pub fn key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Look up an index by name.
    pub fn get_index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Database declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    pub name: String,
    pub version: u32,
    pub stores: Vec<StoreDefinition>,
}

impl DbConfig {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    /// Builder-style method to add a store.
    pub fn with_store(mut self, store: StoreDefinition) -> Self {
        self.stores.push(store);
        self
    }

    pub fn get_store(&self, name: &str) -> Option<&StoreDefinition> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Reject empty names and duplicate store or index names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("database name is empty".into()));
        }
        let mut store_names = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() || store.key_path.is_empty() {
                return Err(Error::InvalidConfig(
                    "store name and key path must be non-empty".into(),
                ));
            }
            if !store_names.insert(store.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate store: {}",
                    store.name
                )));
            }
            let mut index_names = HashSet::new();
            for index in &store.indexes {
                if !index_names.insert(index.name.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate index {} on store {}",
                        index.name, store.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Query cache tunables.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached results
    pub capacity: usize,
    /// Maximum total estimated size of cached results
    pub max_bytes: usize,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_bytes: 8 * 1024 * 1024,
            default_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Backup tunables.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Snapshots retained; the oldest is evicted beyond this
    pub max_backups: usize,
    /// Hex-encoded 32-byte key used when exporting with `encrypt`
    pub encryption_key: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_backups: 10,
            encryption_key: None,
        }
    }
}

/// Sync tunables and identity.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub device_id: String,
    pub user_id: String,
    pub auth_token: Option<String>,
    /// Base URL of the remote peer; `None` when a custom transport is used
    pub base_url: Option<String>,
    pub auto_sync_interval: Duration,
    pub policy: ResolutionPolicy,
}

impl SyncConfig {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            auth_token: None,
            base_url: None,
            auto_sync_interval: Duration::from_secs(30),
            policy: ResolutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load from `STASH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let device_id = env::var("STASH_DEVICE_ID")
            .map_err(|_| Error::InvalidConfig("STASH_DEVICE_ID is required".into()))?;
        let user_id = env::var("STASH_USER_ID")
            .map_err(|_| Error::InvalidConfig("STASH_USER_ID is required".into()))?;

        let mut config = Self::new(device_id, user_id);
        config.auth_token = env::var("STASH_AUTH_TOKEN").ok();
        config.base_url = env::var("STASH_SYNC_URL").ok();

        if let Ok(secs) = env::var("STASH_SYNC_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| Error::InvalidConfig("invalid STASH_SYNC_INTERVAL_SECS".into()))?;
            config.auto_sync_interval = Duration::from_secs(secs);
        }
        if let Ok(policy) = env::var("STASH_CONFLICT_POLICY") {
            config.policy = policy.parse()?;
        }

        Ok(config)
    }
}

/// All engine tunables.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub backup: BackupConfig,
}
