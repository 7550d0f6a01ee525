//! # Stash Engine
//!
//! An embeddable, local-first data layer.
//!
//! This crate provides a keyed object store with secondary indexes, a cached
//! and scored search layer, checksummed backups, and a multi-device sync
//! engine with conflict detection.
//!
//! ## Design Principles
//!
//! - **Explicit handles**: a [`Database`] is opened from a [`DbConfig`] and
//!   closed by its owner; there is no global instance
//! - **One backend interface**: the indexed and flat backends behave the same
//!   for the same calls; callers never branch on [`BackendKind`]
//! - **Injected time**: everything that stamps or expires reads a
//!   [`Clock`](clock::Clock), so tests drive time with a
//!   [`ManualClock`](clock::ManualClock)
//! - **Fail closed on corruption**: a backup whose checksum does not verify is
//!   never restored
//!
//! ## Core Concepts
//!
//! ### Records and stores
//!
//! A [`Record`] is a JSON object living in exactly one store. Every store has
//! a key field (`id` by default), optional secondary indexes and an optional
//! [`RuleSet`] evaluated on each write.
//!
//! ### Indexes and search
//!
//! The [`IndexEngine`] keeps field indexes in step with the store through
//! mutation events, caches query results with a TTL, and ranks full-text
//! matches.
//!
//! ### Backups
//!
//! The [`BackupCoordinator`] captures full and incremental
//! [`BackupSnapshot`](backup::BackupSnapshot)s, verifies their SHA-256
//! checksum before restoring, and exports them as (optionally encrypted)
//! JSON.
//!
//! ### Sync
//!
//! The [`SyncCoordinator`] logs local mutations to an outbox and reconciles
//! with a remote peer through a [`SyncTransport`](sync::SyncTransport):
//! upload, download, conflict resolution, cleanup.
//!
//! ## Quick Start
//!
//! ```rust
//! use stash_engine::{
//!     BackendKind, Database, DbConfig, IndexDefinition, QueryOptions, Record, StoreDefinition,
//! };
//! use serde_json::json;
//!
//! // 1. Declare the stores
//! let config = DbConfig::new("clinic", 1).with_store(
//!     StoreDefinition::new("users").index(IndexDefinition::new("by_email", "email").unique()),
//! );
//!
//! // 2. Open a database
//! let db = Database::open(config, BackendKind::Indexed).unwrap();
//!
//! // 3. Write and query
//! let record = Record::from_value(json!({"name": "Ada", "email": "ada@example.com"})).unwrap();
//! let id = db.add("users", record).unwrap();
//!
//! let found = db
//!     .find_by_index("users", "by_email", &json!("ada@example.com"), &QueryOptions::default())
//!     .unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].key("id"), Some(id));
//! ```

pub mod backend;
pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod index;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod sync;
pub mod task;

// Re-export main types at crate root
pub use backend::BackendKind;
pub use backup::{BackupCoordinator, BackupOptions, MergeStrategy, RestoreOptions, RestoreReport};
pub use config::{
    BackupConfig, CacheConfig, DbConfig, EngineConfig, IndexDefinition, KeyPath, StoreDefinition,
    SyncConfig,
};
pub use error::Error;
pub use index::{CacheOptions, IndexEngine, QueryMetrics, SearchHit, SearchOptions};
pub use query::{QueryOptions, SortDirection};
pub use record::{Origin, Record};
pub use schema::{FieldType, Rule, RuleSet};
pub use store::{Database, MutationEvent, MutationKind, MutationObserver};
pub use sync::{
    ConflictRecord, Resolution, ResolutionPolicy, SyncAction, SyncCoordinator, SyncRecord,
    SyncReport, SyncStatus,
};
pub use task::TaskHandle;

/// Type aliases for clarity
pub type RecordId = String;
pub type StoreName = String;
pub type Version = u64;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
