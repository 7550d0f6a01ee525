//! IndexEngine - field indexes, a query result cache and scored search on
//! top of a [`Database`].
//!
//! Field indexes map a canonical value to the sorted ids of the records
//! holding it. They are built by a full scan on first use (or explicitly with
//! [`IndexEngine::build_index`]) and then maintained incrementally from the
//! database's mutation events, so their content always equals what a fresh
//! scan would produce.
//!
//! Cached results are keyed by caller-chosen strings. Keys prefixed with
//! `"{store}:"` are invalidated whenever that store changes.

mod cache;
mod metrics;
mod search;

pub use cache::QueryCache;
pub use metrics::QueryMetrics;
pub use search::{score_record, score_term, tokenize, SearchHit, SearchOptions};

use crate::backend::index_key;
use crate::store::{MutationEvent, MutationKind, MutationObserver};
use crate::task::TaskHandle;
use crate::{error::Result, CacheConfig, Database, QueryOptions, Record, RecordId, StoreName};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Canonical value → sorted record ids.
pub type FieldIndex = BTreeMap<String, Vec<RecordId>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    store: StoreName,
    field: String,
}

impl IndexKey {
    fn new(store: &str, field: &str) -> Self {
        Self {
            store: store.to_string(),
            field: field.to_string(),
        }
    }
}

/// Per-call cache behaviour for [`IndexEngine::optimized_query`].
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Falls back to the configured default TTL
    pub ttl: Option<Duration>,
    pub use_cache: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            use_cache: true,
        }
    }
}

impl CacheOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            use_cache: true,
        }
    }

    /// Always compute, never read or write the cache.
    pub fn bypass() -> Self {
        Self {
            ttl: None,
            use_cache: false,
        }
    }
}

pub struct IndexEngine {
    db: Arc<Database>,
    config: CacheConfig,
    cache: RwLock<QueryCache>,
    indexes: RwLock<HashMap<IndexKey, FieldIndex>>,
    metrics: Mutex<QueryMetrics>,
}

impl IndexEngine {
    /// Create an engine and subscribe it to the database's mutations.
    pub fn new(db: Arc<Database>, config: CacheConfig) -> Arc<Self> {
        let engine = Arc::new(Self {
            cache: RwLock::new(QueryCache::new(&config)),
            db: db.clone(),
            config,
            indexes: RwLock::new(HashMap::new()),
            metrics: Mutex::new(QueryMetrics::default()),
        });
        db.subscribe_weak(&engine);
        engine
    }

    /// Cache-aside: return the cached result for `cache_key` if present and
    /// unexpired, else run `compute`, cache its result and return it.
    ///
    /// A result too large for the cache is returned uncached.
    pub fn optimized_query<T, F>(&self, cache_key: &str, options: CacheOptions, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let started = Instant::now();
        let now = self.db.now();

        if options.use_cache {
            let cached = self.cache.write().get(cache_key, now);
            if let Some(result) = cached.and_then(|v| serde_json::from_value(v).ok()) {
                let mut metrics = self.metrics.lock();
                metrics.cache_hits += 1;
                metrics.record(started.elapsed());
                return Ok(result);
            }
        }

        let result = compute()?;

        if options.use_cache {
            let value = serde_json::to_value(&result)?;
            let ttl = options.ttl.unwrap_or(self.config.default_ttl);
            if let Err(err) = self
                .cache
                .write()
                .insert(cache_key.to_string(), value, ttl, now)
            {
                tracing::debug!(key = cache_key, %err, "result not cached");
            }
        }

        let mut metrics = self.metrics.lock();
        if options.use_cache {
            metrics.cache_misses += 1;
        }
        metrics.record(started.elapsed());
        Ok(result)
    }

    /// Records whose `field` equals `value`, answered from the field index.
    /// The index is built by a full scan if it does not exist yet.
    pub fn optimized_search(&self, store: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
        let started = Instant::now();
        let key = IndexKey::new(store, field);

        let prebuilt = self.indexes.read().contains_key(&key);
        if !prebuilt {
            self.build_index(store, field)?;
        }

        let ids = self
            .indexes
            .read()
            .get(&key)
            .and_then(|index| index.get(&index_key(value)))
            .cloned()
            .unwrap_or_default();
        let records = ids
            .iter()
            .filter_map(|id| self.db.get(store, id).transpose())
            .collect::<Result<Vec<_>>>()?;

        let mut metrics = self.metrics.lock();
        if prebuilt {
            metrics.index_hits += 1;
        }
        metrics.record(started.elapsed());
        Ok(records)
    }

    /// Build (or rebuild) the index on `field` by a full scan of `store`,
    /// replacing any existing one. Returns the number of distinct values.
    pub fn build_index(&self, store: &str, field: &str) -> Result<usize> {
        let key_field = self.db.definition(store)?.key_path.clone();
        // Held across the scan so concurrent mutations land after it.
        let mut indexes = self.indexes.write();
        let records = self.db.get_all(store, &QueryOptions::default())?;
        let index = index_from_scan(&records, &key_field, field);
        let distinct = index.len();
        indexes.insert(IndexKey::new(store, field), index);
        tracing::debug!(store, field, records = records.len(), distinct, "built index");
        Ok(distinct)
    }

    /// Move `id` from `old_value` to `new_value` in the index on `field`.
    /// Does nothing if that index has not been built.
    pub fn update_index(
        &self,
        store: &str,
        field: &str,
        old_value: Option<&Value>,
        new_value: Option<&Value>,
        id: &str,
    ) {
        if let Some(index) = self.indexes.write().get_mut(&IndexKey::new(store, field)) {
            apply_update(index, old_value, new_value, id);
        }
    }

    /// A copy of the index on `field`, if built.
    pub fn index_snapshot(&self, store: &str, field: &str) -> Option<FieldIndex> {
        self.indexes.read().get(&IndexKey::new(store, field)).cloned()
    }

    pub fn drop_index(&self, store: &str, field: &str) -> bool {
        self.indexes
            .write()
            .remove(&IndexKey::new(store, field))
            .is_some()
    }

    /// Fields of `store` that currently have an index, sorted.
    pub fn indexed_fields(&self, store: &str) -> Vec<String> {
        let mut fields: Vec<String> = self
            .indexes
            .read()
            .keys()
            .filter(|k| k.store == store)
            .map(|k| k.field.clone())
            .collect();
        fields.sort();
        fields
    }

    /// Score every record of `store` against the whitespace-separated terms
    /// of `query` over `fields`, best first.
    pub fn full_text_search(
        &self,
        store: &str,
        query: &str,
        fields: &[&str],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        let key_field = self.db.definition(store)?.key_path.clone();
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .db
            .get_all(store, &QueryOptions::default())?
            .into_iter()
            .filter_map(|record| {
                let score = score_record(&record, &terms, fields, options.fuzzy);
                (score >= options.min_score).then(|| SearchHit {
                    id: record.key(&key_field).unwrap_or_default(),
                    score,
                    record,
                })
            })
            .collect();
        search::rank(&mut hits);
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }

        self.metrics.lock().record(started.elapsed());
        Ok(hits)
    }

    /// Whether an unexpired result is cached under `cache_key`.
    pub fn is_cached(&self, cache_key: &str) -> bool {
        self.cache.read().contains(cache_key, self.db.now())
    }

    /// Drop cached results whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) -> usize {
        self.cache.write().invalidate(prefix)
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Drop expired cache entries now.
    pub fn sweep_cache(&self) -> usize {
        let swept = self.cache.write().sweep_expired(self.db.now());
        if swept > 0 {
            tracing::debug!(swept, "swept expired cache entries");
        }
        swept
    }

    /// Sweep expired entries every `sweep_interval` until the handle stops.
    pub fn start_cache_sweep(self: &Arc<Self>) -> TaskHandle {
        let engine: Weak<Self> = Arc::downgrade(self);
        TaskHandle::spawn_periodic("cache-sweep", self.config.sweep_interval, move || {
            let engine = engine.clone();
            async move {
                if let Some(engine) = engine.upgrade() {
                    engine.sweep_cache();
                }
            }
        })
    }

    pub fn metrics(&self) -> QueryMetrics {
        *self.metrics.lock()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = QueryMetrics::default();
    }
}

impl MutationObserver for IndexEngine {
    fn on_mutation(&self, event: &MutationEvent) {
        self.invalidate(&format!("{}:", event.store));

        let mut indexes = self.indexes.write();
        for (key, index) in indexes.iter_mut().filter(|(k, _)| k.store == event.store) {
            match (event.kind, &event.id) {
                (MutationKind::Clear, _) => index.clear(),
                (_, Some(id)) => {
                    let old = event.before.as_ref().and_then(|r| r.get(&key.field));
                    let new = event.after.as_ref().and_then(|r| r.get(&key.field));
                    apply_update(index, old, new, id);
                }
                (_, None) => {}
            }
        }
    }
}

/// The index on `field` derived from scratch from `records`.
pub fn index_from_scan(records: &[Record], key_field: &str, field: &str) -> FieldIndex {
    let mut index = FieldIndex::new();
    for record in records {
        if let Some(id) = record.key(key_field) {
            apply_update(&mut index, None, record.get(field), &id);
        }
    }
    index
}

fn apply_update(index: &mut FieldIndex, old: Option<&Value>, new: Option<&Value>, id: &str) {
    if let Some(old) = old.filter(|v| !v.is_null()) {
        let key = index_key(old);
        if let Some(ids) = index.get_mut(&key) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                index.remove(&key);
            }
        }
    }
    if let Some(new) = new.filter(|v| !v.is_null()) {
        let ids = index.entry(index_key(new)).or_default();
        if let Err(pos) = ids.binary_search_by(|other| other.as_str().cmp(id)) {
            ids.insert(pos, id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{BackendKind, DbConfig, StoreDefinition};
    use serde_json::json;

    fn setup() -> (Arc<Database>, Arc<IndexEngine>, Arc<ManualClock>) {
        let clock = ManualClock::shared(0);
        let config = DbConfig::new("t", 1)
            .with_store(StoreDefinition::new("users"))
            .with_store(StoreDefinition::new("notes"));
        let db = Database::open_with_clock(config, BackendKind::Indexed, clock.clone()).unwrap();
        let engine = IndexEngine::new(db.clone(), CacheConfig::default());
        (db, engine, clock)
    }

    fn add(db: &Database, store: &str, v: Value) {
        db.add(store, Record::from_value(v).unwrap()).unwrap();
    }

    #[test]
    fn cache_aside_with_ttl() {
        let (_, engine, clock) = setup();
        let mut calls = 0;
        let mut run = || {
            engine
                .optimized_query("users:count", CacheOptions::ttl(Duration::from_secs(10)), || {
                    calls += 1;
                    Ok(calls)
                })
                .unwrap()
        };

        assert_eq!(run(), 1);
        assert_eq!(run(), 1);
        assert!(engine.is_cached("users:count"));

        clock.advance(10_000);
        assert!(!engine.is_cached("users:count"));
        assert_eq!(run(), 2);

        let m = engine.metrics();
        assert_eq!((m.total_queries, m.cache_hits, m.cache_misses), (3, 1, 2));
    }

    #[test]
    fn bypass_never_caches() {
        let (_, engine, _) = setup();
        let v: u32 = engine
            .optimized_query("k", CacheOptions::bypass(), || Ok(7))
            .unwrap();
        assert_eq!(v, 7);
        assert!(!engine.is_cached("k"));
        assert_eq!(engine.metrics().cache_misses, 0);
    }

    #[test]
    fn store_mutation_invalidates_its_prefix() {
        let (db, engine, _) = setup();
        engine
            .optimized_query("users:all", CacheOptions::default(), || Ok(0))
            .unwrap();
        engine
            .optimized_query("notes:all", CacheOptions::default(), || Ok(0))
            .unwrap();

        add(&db, "users", json!({"id": "u1"}));
        assert!(!engine.is_cached("users:all"));
        assert!(engine.is_cached("notes:all"));
    }

    #[test]
    fn search_builds_index_lazily_then_hits_it() {
        let (db, engine, _) = setup();
        add(&db, "users", json!({"id": "u1", "role": "doctor"}));
        add(&db, "users", json!({"id": "u2", "role": "patient"}));

        let found = engine
            .optimized_search("users", "role", &json!("doctor"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(engine.metrics().index_hits, 0);

        engine
            .optimized_search("users", "role", &json!("doctor"))
            .unwrap();
        assert_eq!(engine.metrics().index_hits, 1);
    }

    #[test]
    fn mutations_maintain_built_indexes() {
        let (db, engine, _) = setup();
        add(&db, "users", json!({"id": "u1", "role": "doctor"}));
        engine.build_index("users", "role").unwrap();

        add(&db, "users", json!({"id": "u2", "role": "doctor"}));
        db.put(
            "users",
            Record::from_value(json!({"id": "u1", "role": "nurse"})).unwrap(),
        )
        .unwrap();
        db.delete("users", "u2").unwrap();

        let index = engine.index_snapshot("users", "role").unwrap();
        assert_eq!(index.get("\"nurse\""), Some(&vec!["u1".to_string()]));
        assert!(!index.contains_key("\"doctor\""));

        let records = db.get_all("users", &QueryOptions::default()).unwrap();
        assert_eq!(index, index_from_scan(&records, "id", "role"));

        db.clear("users").unwrap();
        assert!(engine.index_snapshot("users", "role").unwrap().is_empty());
    }

    #[test]
    fn manual_update_index() {
        let (_, engine, _) = setup();
        engine.build_index("notes", "tag").unwrap();
        engine.update_index("notes", "tag", None, Some(&json!("a")), "n2");
        engine.update_index("notes", "tag", None, Some(&json!("a")), "n1");
        engine.update_index("notes", "tag", None, Some(&json!("a")), "n1");
        let index = engine.index_snapshot("notes", "tag").unwrap();
        assert_eq!(index.get("\"a\""), Some(&vec!["n1".to_string(), "n2".to_string()]));

        engine.update_index("notes", "tag", Some(&json!("a")), Some(&json!("b")), "n1");
        let index = engine.index_snapshot("notes", "tag").unwrap();
        assert_eq!(index.get("\"b\""), Some(&vec!["n1".to_string()]));
        assert_eq!(engine.indexed_fields("notes"), vec!["tag"]);
        assert!(engine.drop_index("notes", "tag"));
    }

    #[test]
    fn full_text_ranking() {
        let (db, engine, _) = setup();
        add(&db, "notes", json!({"id": "n1", "title": "cartridge refill"}));
        add(&db, "notes", json!({"id": "n2", "title": "car"}));
        add(&db, "notes", json!({"id": "n3", "title": "bicycle"}));

        let hits = engine
            .full_text_search("notes", "car", &["title"], &SearchOptions::default())
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let none = engine
            .full_text_search("notes", "car", &["title"], &SearchOptions::default().min_score(100.0))
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_drops_expired_entries() {
        let (_, engine, clock) = setup();
        engine
            .optimized_query("k", CacheOptions::ttl(Duration::from_secs(1)), || Ok(1))
            .unwrap();
        clock.advance(5_000);

        let mut sweep = engine.start_cache_sweep();
        tokio::time::sleep(engine.config.sweep_interval + Duration::from_secs(1)).await;
        assert_eq!(engine.cache.read().len(), 0);
        sweep.stop();
    }
}
