//! Flat fallback backend: serialized entries in insertion order, every
//! lookup a linear scan.

use super::{check_unique, find_index, BackendKind, StorageBackend};
use crate::{error::Result, DbConfig, Error, Record, RecordId, StoreDefinition};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    store: String,
    id: RecordId,
    /// Serialized JSON, the way a string key-value store would hold it
    value: String,
}

impl Entry {
    fn decode(&self) -> Result<Record> {
        Ok(serde_json::from_str(&self.value)?)
    }
}

/// A single flat list of entries shared by all stores.
#[derive(Debug)]
pub struct FlatBackend {
    definitions: HashMap<String, StoreDefinition>,
    entries: RwLock<Vec<Entry>>,
}

impl FlatBackend {
    pub fn new(config: &DbConfig) -> Self {
        Self {
            definitions: config
                .stores
                .iter()
                .map(|def| (def.name.clone(), def.clone()))
                .collect(),
            entries: RwLock::new(Vec::new()),
        }
    }

    fn definition(&self, store: &str) -> Result<&StoreDefinition> {
        self.definitions
            .get(store)
            .ok_or_else(|| Error::StoreNotFound(store.to_string()))
    }

    fn decode_store(entries: &[Entry], store: &str) -> Result<Vec<Record>> {
        entries
            .iter()
            .filter(|e| e.store == store)
            .map(Entry::decode)
            .collect()
    }

    fn position(entries: &[Entry], store: &str, id: &str) -> Option<usize> {
        entries.iter().position(|e| e.store == store && e.id == id)
    }
}

impl StorageBackend for FlatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn insert(&self, store: &str, id: &RecordId, record: Record) -> Result<()> {
        let def = self.definition(store)?;
        let mut entries = self.entries.write();
        if Self::position(&entries, store, id).is_some() {
            return Err(Error::DuplicateKey {
                store: store.to_string(),
                id: id.clone(),
            });
        }
        let existing = Self::decode_store(&entries, store)?;
        check_unique(def, id, &record, existing.iter())?;
        entries.push(Entry {
            store: store.to_string(),
            id: id.clone(),
            value: serde_json::to_string(&record)?,
        });
        Ok(())
    }

    fn get(&self, store: &str, id: &str) -> Result<Option<Record>> {
        self.definition(store)?;
        let entries = self.entries.read();
        Self::position(&entries, store, id)
            .map(|pos| entries[pos].decode())
            .transpose()
    }

    fn put(&self, store: &str, id: &RecordId, record: Record) -> Result<Option<Record>> {
        let def = self.definition(store)?;
        let mut entries = self.entries.write();
        let existing = Self::decode_store(&entries, store)?;
        check_unique(def, id, &record, existing.iter())?;

        let value = serde_json::to_string(&record)?;
        match Self::position(&entries, store, id) {
            Some(pos) => {
                let previous = entries[pos].decode()?;
                entries[pos].value = value;
                Ok(Some(previous))
            }
            None => {
                entries.push(Entry {
                    store: store.to_string(),
                    id: id.clone(),
                    value,
                });
                Ok(None)
            }
        }
    }

    fn delete(&self, store: &str, id: &str) -> Result<Option<Record>> {
        self.definition(store)?;
        let mut entries = self.entries.write();
        match Self::position(&entries, store, id) {
            Some(pos) => entries.remove(pos).decode().map(Some),
            None => Ok(None),
        }
    }

    fn scan(&self, store: &str) -> Result<Vec<Record>> {
        self.definition(store)?;
        Self::decode_store(&self.entries.read(), store)
    }

    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> Result<Vec<Record>> {
        let index = find_index(self.definition(store)?, index)?;
        Ok(self
            .scan(store)?
            .into_iter()
            .filter(|r| r.key_path_value(&index.key_path).as_ref() == Some(value))
            .collect())
    }

    fn count(&self, store: &str) -> Result<usize> {
        self.definition(store)?;
        Ok(self.entries.read().iter().filter(|e| e.store == store).count())
    }

    fn clear(&self, store: &str) -> Result<()> {
        self.definition(store)?;
        self.entries.write().retain(|e| e.store != store);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_come_back_in_insertion_order() {
        let backend = FlatBackend::new(&DbConfig::new("t", 1).with_store(StoreDefinition::new("s")));
        for id in ["m", "a", "z"] {
            let r = Record::from_value(json!({"id": id})).unwrap();
            backend.insert("s", &id.to_string(), r).unwrap();
        }
        let ids: Vec<_> = backend
            .scan("s")
            .unwrap()
            .iter()
            .map(|r| r.key("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["m", "a", "z"]);
    }

    #[test]
    fn stores_share_one_list_without_leaking() {
        let config = DbConfig::new("t", 1)
            .with_store(StoreDefinition::new("a"))
            .with_store(StoreDefinition::new("b"));
        let backend = FlatBackend::new(&config);
        let r = Record::from_value(json!({"id": "1"})).unwrap();
        backend.insert("a", &"1".to_string(), r.clone()).unwrap();
        backend.insert("b", &"1".to_string(), r).unwrap();

        backend.clear("a").unwrap();
        assert_eq!(backend.count("a").unwrap(), 0);
        assert_eq!(backend.count("b").unwrap(), 1);
    }
}
