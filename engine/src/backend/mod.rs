//! Storage backends.
//!
//! A [`StorageBackend`] holds the records of every declared store. Two
//! implementations exist and are chosen once, when the database is opened:
//!
//! - [`IndexedBackend`]: structured tables kept in key order, with secondary
//!   indexes maintained on every write.
//! - [`FlatBackend`]: a flat list of serialized entries answered by linear
//!   scan, for environments without a structured store.
//!
//! Each call is atomic with respect to itself and nothing more.

mod flat;
mod indexed;

pub use flat::FlatBackend;
pub use indexed::IndexedBackend;

use crate::{error::Result, DbConfig, Error, IndexDefinition, Record, RecordId, StoreDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Which backend to open a database with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Indexed,
    Flat,
}

impl BackendKind {
    /// Build a backend of this kind holding the stores declared in `config`.
    pub fn open(self, config: &DbConfig) -> Box<dyn StorageBackend> {
        match self {
            BackendKind::Indexed => Box::new(IndexedBackend::new(config)),
            BackendKind::Flat => Box::new(FlatBackend::new(config)),
        }
    }
}

/// Record storage for all declared stores.
pub trait StorageBackend: Send + Sync + Debug {
    fn kind(&self) -> BackendKind;

    /// Insert a new record. Fails with `DuplicateKey` if `id` exists or a
    /// unique index already holds the record's value.
    fn insert(&self, store: &str, id: &RecordId, record: Record) -> Result<()>;

    /// Fetch a record; absence is not an error.
    fn get(&self, store: &str, id: &str) -> Result<Option<Record>>;

    /// Insert or replace, returning the previous record if any.
    fn put(&self, store: &str, id: &RecordId, record: Record) -> Result<Option<Record>>;

    /// Remove a record, returning it if it existed.
    fn delete(&self, store: &str, id: &str) -> Result<Option<Record>>;

    /// Every record in the store, in backend order.
    fn scan(&self, store: &str) -> Result<Vec<Record>>;

    /// Records whose value at the index's key path equals `value`.
    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> Result<Vec<Record>>;

    fn count(&self, store: &str) -> Result<usize>;

    fn clear(&self, store: &str) -> Result<()>;
}

/// Canonical form of an index value, used as the index map key.
pub(crate) fn index_key(value: &Value) -> String {
    value.to_string()
}

pub(crate) fn find_index<'a>(
    def: &'a StoreDefinition,
    index: &str,
) -> Result<&'a IndexDefinition> {
    def.get_index(index).ok_or_else(|| {
        Error::InvalidConfig(format!("no index {} on store {}", index, def.name))
    })
}

/// Check unique indexes against existing records, ignoring the record being
/// replaced (`id`).
pub(crate) fn check_unique<'a>(
    def: &StoreDefinition,
    id: &str,
    record: &Record,
    existing: impl Iterator<Item = &'a Record> + Clone,
) -> Result<()> {
    for index in def.indexes.iter().filter(|i| i.unique) {
        let Some(value) = record.key_path_value(&index.key_path) else {
            continue;
        };
        let clash = existing.clone().any(|other| {
            other.key(&def.key_path).as_deref() != Some(id)
                && other.key_path_value(&index.key_path).as_ref() == Some(&value)
        });
        if clash {
            return Err(Error::DuplicateKey {
                store: def.name.clone(),
                id: format!("{}={}", index.name, value),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    //! Both backends must answer identical calls identically.

    use super::*;
    use crate::{IndexDefinition, QueryOptions, SortDirection, StoreDefinition};
    use serde_json::json;

    fn config() -> DbConfig {
        DbConfig::new("test", 1).with_store(
            StoreDefinition::new("users")
                .index(IndexDefinition::new("by_email", "email").unique())
                .index(IndexDefinition::new("by_role", "role")),
        )
    }

    fn record(v: Value) -> Record {
        Record::from_value(v).unwrap()
    }

    fn seeded(kind: BackendKind) -> Box<dyn StorageBackend> {
        let backend = kind.open(&config());
        for (id, email, role) in [
            ("u3", "c@x.com", "doctor"),
            ("u1", "a@x.com", "patient"),
            ("u2", "b@x.com", "doctor"),
        ] {
            backend
                .insert(
                    "users",
                    &id.to_string(),
                    record(json!({"id": id, "email": email, "role": role})),
                )
                .unwrap();
        }
        backend
    }

    fn sorted_ids(records: Vec<Record>) -> Vec<String> {
        let opts = QueryOptions::new().order_by("id", SortDirection::Asc);
        opts.apply(records)
            .iter()
            .map(|r| r.key("id").unwrap())
            .collect()
    }

    #[test]
    fn parity_crud() {
        for kind in [BackendKind::Indexed, BackendKind::Flat] {
            let backend = seeded(kind);
            assert_eq!(backend.count("users").unwrap(), 3, "{kind:?}");
            assert_eq!(
                backend.get("users", "u1").unwrap().unwrap().get("email"),
                Some(&json!("a@x.com"))
            );
            assert!(backend.get("users", "missing").unwrap().is_none());

            let prev = backend
                .put(
                    "users",
                    &"u1".to_string(),
                    record(json!({"id": "u1", "email": "a@y.com", "role": "patient"})),
                )
                .unwrap();
            assert!(prev.is_some());

            assert!(backend.delete("users", "u2").unwrap().is_some());
            assert!(backend.delete("users", "u2").unwrap().is_none());
            assert_eq!(sorted_ids(backend.scan("users").unwrap()), vec!["u1", "u3"]);
        }
    }

    #[test]
    fn parity_duplicate_key() {
        for kind in [BackendKind::Indexed, BackendKind::Flat] {
            let backend = seeded(kind);
            let err = backend
                .insert(
                    "users",
                    &"u1".to_string(),
                    record(json!({"id": "u1", "email": "z@x.com"})),
                )
                .unwrap_err();
            assert!(matches!(err, Error::DuplicateKey { .. }), "{kind:?}");
        }
    }

    #[test]
    fn parity_unique_index() {
        for kind in [BackendKind::Indexed, BackendKind::Flat] {
            let backend = seeded(kind);
            let err = backend
                .put(
                    "users",
                    &"u9".to_string(),
                    record(json!({"id": "u9", "email": "a@x.com"})),
                )
                .unwrap_err();
            assert!(matches!(err, Error::DuplicateKey { .. }), "{kind:?}");
            // the failed write left nothing behind
            assert!(backend.get("users", "u9").unwrap().is_none());
            // re-putting a record with its own unique value is fine
            backend
                .put(
                    "users",
                    &"u1".to_string(),
                    record(json!({"id": "u1", "email": "a@x.com", "role": "admin"})),
                )
                .unwrap();
        }
    }

    #[test]
    fn parity_find_by_index() {
        for kind in [BackendKind::Indexed, BackendKind::Flat] {
            let backend = seeded(kind);
            let doctors = backend
                .find_by_index("users", "by_role", &json!("doctor"))
                .unwrap();
            assert_eq!(sorted_ids(doctors), vec!["u2", "u3"], "{kind:?}");

            backend
                .put(
                    "users",
                    &"u2".to_string(),
                    record(json!({"id": "u2", "email": "b@x.com", "role": "nurse"})),
                )
                .unwrap();
            let doctors = backend
                .find_by_index("users", "by_role", &json!("doctor"))
                .unwrap();
            assert_eq!(sorted_ids(doctors), vec!["u3"], "{kind:?}");

            assert!(matches!(
                backend.find_by_index("users", "by_age", &json!(1)),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn parity_clear_and_unknown_store() {
        for kind in [BackendKind::Indexed, BackendKind::Flat] {
            let backend = seeded(kind);
            backend.clear("users").unwrap();
            assert_eq!(backend.count("users").unwrap(), 0);
            assert!(backend
                .find_by_index("users", "by_role", &json!("doctor"))
                .unwrap()
                .is_empty());
            assert!(matches!(
                backend.scan("nope"),
                Err(Error::StoreNotFound(_))
            ));
        }
    }
}
