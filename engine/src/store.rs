//! Database - the object store handle.
//!
//! A [`Database`] is opened explicitly from a [`DbConfig`] and a
//! [`BackendKind`], and released with [`Database::close`]. It validates and
//! stamps records, delegates storage to its backend, and tells registered
//! [`MutationObserver`]s about every successful write so indexes and the
//! sync outbox stay in step with the data.

use crate::backend::{BackendKind, StorageBackend};
use crate::clock::{SharedClock, SystemClock};
use crate::record::{key_string, CREATED_AT, UPDATED_AT};
use crate::{
    error::Result, DbConfig, Error, Origin, QueryOptions, Record, RecordId, StoreDefinition,
    StoreName, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// What kind of write happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    /// Whole store emptied
    Clear,
}

/// A successful write, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub store: StoreName,
    /// `None` for [`MutationKind::Clear`]
    pub id: Option<RecordId>,
    pub kind: MutationKind,
    pub before: Option<Record>,
    pub after: Option<Record>,
    pub origin: Origin,
    pub timestamp: Timestamp,
}

/// Receives every successful write.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent);
}

/// Forwards events to an observer without keeping it alive.
struct WeakObserver<T>(Weak<T>);

impl<T: MutationObserver> MutationObserver for WeakObserver<T> {
    fn on_mutation(&self, event: &MutationEvent) {
        if let Some(observer) = self.0.upgrade() {
            observer.on_mutation(event);
        }
    }
}

/// An open database.
pub struct Database {
    config: DbConfig,
    backend: Box<dyn StorageBackend>,
    clock: SharedClock,
    observers: RwLock<Vec<Arc<dyn MutationObserver>>>,
    /// Next auto-increment key per store, seeded lazily from existing data
    sequences: Mutex<HashMap<StoreName, u64>>,
    open: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.config.name)
            .field("version", &self.config.version)
            .field("backend", &self.backend.kind())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Database {
    /// Open a database on the system clock.
    pub fn open(config: DbConfig, kind: BackendKind) -> Result<Arc<Self>> {
        Self::open_with_clock(config, kind, Arc::new(SystemClock))
    }

    /// Open a database reading time from `clock`.
    pub fn open_with_clock(
        config: DbConfig,
        kind: BackendKind,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let backend = kind.open(&config);
        tracing::debug!(
            name = %config.name,
            version = config.version,
            stores = config.stores.len(),
            backend = ?kind,
            "opened database"
        );
        Ok(Arc::new(Self {
            config,
            backend,
            clock,
            observers: RwLock::new(Vec::new()),
            sequences: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
        }))
    }

    /// Release the handle. Later calls fail with [`Error::Closed`].
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.observers.write().clear();
            tracing::debug!(name = %self.config.name, "closed database");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Names of all declared stores, in declaration order.
    pub fn stores(&self) -> Vec<StoreName> {
        self.config.stores.iter().map(|s| s.name.clone()).collect()
    }

    /// The definition of one store.
    pub fn definition(&self, store: &str) -> Result<&StoreDefinition> {
        self.config
            .get_store(store)
            .ok_or_else(|| Error::StoreNotFound(store.to_string()))
    }

    /// Register an observer for all future writes.
    pub fn subscribe(&self, observer: Arc<dyn MutationObserver>) {
        self.observers.write().push(observer);
    }

    /// Register an observer that the database must not keep alive, such as
    /// a coordinator that itself holds the database.
    pub fn subscribe_weak<T: MutationObserver + 'static>(&self, observer: &Arc<T>) {
        self.subscribe(Arc::new(WeakObserver(Arc::downgrade(observer))));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn notify(&self, event: MutationEvent) {
        for observer in self.observers.read().iter() {
            observer.on_mutation(&event);
        }
    }

    /// Insert a new record and return its key. A missing key is generated
    /// (UUID, or the next integer for auto-increment stores) and both
    /// timestamps are set to now.
    pub fn add(&self, store: &str, mut record: Record) -> Result<RecordId> {
        self.ensure_open()?;
        let def = self.definition(store)?;
        let id = self.key_or_generate(def, &mut record)?;

        let now = self.now();
        record.set(CREATED_AT, Value::from(now));
        record.set(UPDATED_AT, Value::from(now));
        def.rules.validate(&record)?;

        self.backend.insert(store, &id, record.clone())?;
        self.notify(MutationEvent {
            store: store.to_string(),
            id: Some(id.clone()),
            kind: MutationKind::Create,
            before: None,
            after: Some(record),
            origin: Origin::Local,
            timestamp: now,
        });
        Ok(id)
    }

    /// Fetch a record. A missing id is `Ok(None)`, not an error.
    pub fn get(&self, store: &str, id: &str) -> Result<Option<Record>> {
        self.ensure_open()?;
        self.definition(store)?;
        self.backend.get(store, id)
    }

    /// All records matching `options`.
    pub fn get_all(&self, store: &str, options: &QueryOptions) -> Result<Vec<Record>> {
        self.ensure_open()?;
        self.definition(store)?;
        Ok(options.apply(self.backend.scan(store)?))
    }

    /// Insert or replace. `createdAt` survives from the previous version,
    /// `updatedAt` is set to now.
    pub fn put(&self, store: &str, mut record: Record) -> Result<RecordId> {
        self.ensure_open()?;
        let def = self.definition(store)?;
        let id = self.key_or_generate(def, &mut record)?;

        let now = self.now();
        let created = self
            .backend
            .get(store, &id)?
            .and_then(|prev| prev.created_at())
            .unwrap_or(now);
        record.set(CREATED_AT, Value::from(created));
        record.set(UPDATED_AT, Value::from(now));

        self.write(store, id, record, Origin::Local, now)
    }

    /// Same as [`Database::put`]: a missing record is created, never an error.
    pub fn update(&self, store: &str, record: Record) -> Result<RecordId> {
        self.put(store, record)
    }

    /// Remove a record. Deleting a missing id is a no-op.
    pub fn delete(&self, store: &str, id: &str) -> Result<()> {
        self.delete_from(store, id, Origin::Local)
    }

    /// Records whose value at the named index equals `value`, then filtered,
    /// ordered and paginated by `options`.
    pub fn find_by_index(
        &self,
        store: &str,
        index: &str,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        self.definition(store)?;
        Ok(options.apply(self.backend.find_by_index(store, index, value)?))
    }

    pub fn count(&self, store: &str) -> Result<usize> {
        self.ensure_open()?;
        self.backend.count(store)
    }

    /// Remove every record in a store.
    pub fn clear(&self, store: &str) -> Result<()> {
        self.clear_from(store, Origin::Local)
    }

    /// Write a record as-is, without touching its timestamps. Used when
    /// applying remote changes and restoring backups.
    pub(crate) fn put_from(&self, store: &str, mut record: Record, origin: Origin) -> Result<RecordId> {
        self.ensure_open()?;
        let def = self.definition(store)?;
        let id = self.key_or_generate(def, &mut record)?;
        let now = self.now();
        self.write(store, id, record, origin, now)
    }

    pub(crate) fn delete_from(&self, store: &str, id: &str, origin: Origin) -> Result<()> {
        self.ensure_open()?;
        self.definition(store)?;
        if let Some(before) = self.backend.delete(store, id)? {
            self.notify(MutationEvent {
                store: store.to_string(),
                id: Some(id.to_string()),
                kind: MutationKind::Delete,
                before: Some(before),
                after: None,
                origin,
                timestamp: self.now(),
            });
        }
        Ok(())
    }

    /// Emits a `Delete` per removed record, then one `Clear`.
    pub(crate) fn clear_from(&self, store: &str, origin: Origin) -> Result<()> {
        self.ensure_open()?;
        let key_path = &self.definition(store)?.key_path;
        let removed = self.backend.scan(store)?;
        self.backend.clear(store)?;
        let now = self.now();
        for record in removed {
            self.notify(MutationEvent {
                store: store.to_string(),
                id: record.key(key_path),
                kind: MutationKind::Delete,
                before: Some(record),
                after: None,
                origin,
                timestamp: now,
            });
        }
        self.notify(MutationEvent {
            store: store.to_string(),
            id: None,
            kind: MutationKind::Clear,
            before: None,
            after: None,
            origin,
            timestamp: now,
        });
        Ok(())
    }

    fn write(
        &self,
        store: &str,
        id: RecordId,
        record: Record,
        origin: Origin,
        now: Timestamp,
    ) -> Result<RecordId> {
        self.definition(store)?.rules.validate(&record)?;
        let before = self.backend.put(store, &id, record.clone())?;
        let kind = if before.is_some() {
            MutationKind::Update
        } else {
            MutationKind::Create
        };
        self.notify(MutationEvent {
            store: store.to_string(),
            id: Some(id.clone()),
            kind,
            before,
            after: Some(record),
            origin,
            timestamp: now,
        });
        Ok(id)
    }

    /// Read the record's key, generating one if the key field is absent.
    fn key_or_generate(&self, def: &StoreDefinition, record: &mut Record) -> Result<RecordId> {
        match record.get(&def.key_path) {
            Some(Value::Null) | None => {
                let key = if def.auto_increment {
                    Value::from(self.next_sequence(def)?)
                } else {
                    Value::from(uuid::Uuid::new_v4().to_string())
                };
                record.set(def.key_path.clone(), key.clone());
                key_string(&key).ok_or_else(|| Error::validation(&def.key_path, "invalid key"))
            }
            Some(value) => key_string(value).ok_or_else(|| {
                Error::validation(&def.key_path, "key must be a non-empty string or a number")
            }),
        }
    }

    fn next_sequence(&self, def: &StoreDefinition) -> Result<u64> {
        let mut sequences = self.sequences.lock();
        let next = match sequences.get(&def.name) {
            Some(next) => *next,
            None => {
                let max = self
                    .backend
                    .scan(&def.name)?
                    .iter()
                    .filter_map(|r| r.get(&def.key_path).and_then(Value::as_u64))
                    .max()
                    .unwrap_or(0);
                max + 1
            }
        };
        sequences.insert(def.name.clone(), next + 1);
        Ok(next)
    }
}
