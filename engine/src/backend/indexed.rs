//! Structured backend: key-ordered tables with maintained secondary indexes.

use super::{find_index, index_key, BackendKind, StorageBackend};
use crate::{error::Result, DbConfig, Error, Record, RecordId, StoreDefinition, StoreName};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index name → index value → record ids.
type IndexMaps = HashMap<String, BTreeMap<String, BTreeSet<RecordId>>>;

#[derive(Debug)]
struct Table {
    def: StoreDefinition,
    records: BTreeMap<RecordId, Record>,
    indexes: IndexMaps,
}

impl Table {
    fn new(def: StoreDefinition) -> Self {
        let indexes = def
            .indexes
            .iter()
            .map(|i| (i.name.clone(), BTreeMap::new()))
            .collect();
        Self {
            def,
            records: BTreeMap::new(),
            indexes,
        }
    }

    fn unindex(&mut self, id: &str, record: &Record) {
        for index in &self.def.indexes {
            let Some(value) = record.key_path_value(&index.key_path) else {
                continue;
            };
            if let Some(map) = self.indexes.get_mut(&index.name) {
                let key = index_key(&value);
                if let Some(ids) = map.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }
    }

    fn reindex(&mut self, id: &RecordId, record: &Record) {
        for index in &self.def.indexes {
            let Some(value) = record.key_path_value(&index.key_path) else {
                continue;
            };
            self.indexes
                .entry(index.name.clone())
                .or_default()
                .entry(index_key(&value))
                .or_default()
                .insert(id.clone());
        }
    }

    /// Unique-index check against the index maps rather than a scan.
    fn check_unique_indexed(&self, id: &str, record: &Record) -> Result<()> {
        for index in self.def.indexes.iter().filter(|i| i.unique) {
            let Some(value) = record.key_path_value(&index.key_path) else {
                continue;
            };
            let holders = self
                .indexes
                .get(&index.name)
                .and_then(|m| m.get(&index_key(&value)));
            if holders.is_some_and(|ids| ids.iter().any(|other| other != id)) {
                return Err(Error::DuplicateKey {
                    store: self.def.name.clone(),
                    id: format!("{}={}", index.name, value),
                });
            }
        }
        Ok(())
    }

    fn write(&mut self, id: &RecordId, record: Record) -> Option<Record> {
        let previous = self.records.remove(id);
        if let Some(prev) = &previous {
            self.unindex(id, prev);
        }
        self.reindex(id, &record);
        self.records.insert(id.clone(), record);
        previous
    }
}

/// Key-ordered tables, one per store, guarded by a single lock.
#[derive(Debug)]
pub struct IndexedBackend {
    tables: RwLock<HashMap<StoreName, Table>>,
}

impl IndexedBackend {
    pub fn new(config: &DbConfig) -> Self {
        let tables = config
            .stores
            .iter()
            .map(|def| (def.name.clone(), Table::new(def.clone())))
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Run `f` against one table while holding the write lock: one call,
    /// one transaction.
    fn with_table_mut<T>(&self, store: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(store)
            .ok_or_else(|| Error::StoreNotFound(store.to_string()))?;
        f(table)
    }

    fn with_table<T>(&self, store: &str, f: impl FnOnce(&Table) -> Result<T>) -> Result<T> {
        let tables = self.tables.read();
        let table = tables
            .get(store)
            .ok_or_else(|| Error::StoreNotFound(store.to_string()))?;
        f(table)
    }
}

impl StorageBackend for IndexedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Indexed
    }

    fn insert(&self, store: &str, id: &RecordId, record: Record) -> Result<()> {
        self.with_table_mut(store, |table| {
            if table.records.contains_key(id) {
                return Err(Error::DuplicateKey {
                    store: store.to_string(),
                    id: id.clone(),
                });
            }
            table.check_unique_indexed(id, &record)?;
            table.write(id, record);
            Ok(())
        })
    }

    fn get(&self, store: &str, id: &str) -> Result<Option<Record>> {
        self.with_table(store, |table| Ok(table.records.get(id).cloned()))
    }

    fn put(&self, store: &str, id: &RecordId, record: Record) -> Result<Option<Record>> {
        self.with_table_mut(store, |table| {
            table.check_unique_indexed(id, &record)?;
            Ok(table.write(id, record))
        })
    }

    fn delete(&self, store: &str, id: &str) -> Result<Option<Record>> {
        self.with_table_mut(store, |table| {
            let previous = table.records.remove(id);
            if let Some(prev) = &previous {
                table.unindex(id, prev);
            }
            Ok(previous)
        })
    }

    fn scan(&self, store: &str) -> Result<Vec<Record>> {
        self.with_table(store, |table| Ok(table.records.values().cloned().collect()))
    }

    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> Result<Vec<Record>> {
        self.with_table(store, |table| {
            find_index(&table.def, index)?;
            let ids = table
                .indexes
                .get(index)
                .and_then(|m| m.get(&index_key(value)));
            Ok(ids
                .into_iter()
                .flatten()
                .filter_map(|id| table.records.get(id).cloned())
                .collect())
        })
    }

    fn count(&self, store: &str) -> Result<usize> {
        self.with_table(store, |table| Ok(table.records.len()))
    }

    fn clear(&self, store: &str) -> Result<()> {
        self.with_table_mut(store, |table| {
            table.records.clear();
            for map in table.indexes.values_mut() {
                map.clear();
            }
            Ok(())
        })
    }
}
