//! Query result cache with per-entry TTL.
//!
//! Bounded by entry count and by total estimated bytes. When a bound is hit,
//! the entry with the fewest hits goes first (oldest first among equals).
//! Expired entries are dropped lazily on read and eagerly by
//! [`QueryCache::sweep_expired`].

use crate::{error::Result, CacheConfig, Error, Timestamp};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Timestamp,
    ttl_ms: u64,
    hits: u64,
    size: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.inserted_at) >= self.ttl_ms
    }
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    max_bytes: usize,
    total_bytes: usize,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: config.capacity.max(1),
            max_bytes: config.max_bytes,
            total_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the estimated sizes of all entries.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, key: &str, now: Timestamp) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Look up an entry, counting a hit. Expired entries are removed.
    pub fn get(&mut self, key: &str, now: Timestamp) -> Option<Value> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    /// Cache `value` under `key` for `ttl`, evicting as needed.
    pub fn insert(&mut self, key: String, value: Value, ttl: Duration, now: Timestamp) -> Result<()> {
        let size = estimate_size(&value);
        if size > self.max_bytes {
            return Err(Error::CapacityExceeded {
                what: "query cache".into(),
                limit: self.max_bytes,
            });
        }

        self.remove(&key);
        while self.entries.len() >= self.capacity || self.total_bytes + size > self.max_bytes {
            if !self.evict_one() {
                break;
            }
        }

        self.total_bytes += size;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl_ms: ttl.as_millis() as u64,
                hits: 0,
                size,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&mut self, now: Timestamp) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate(&mut self, prefix: &str) -> usize {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            self.remove(key);
        }
        matching.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                a.hits
                    .cmp(&b.hits)
                    .then(a.inserted_at.cmp(&b.inserted_at))
                    .then(ka.cmp(kb))
            })
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                tracing::debug!(key = %key, "evicting cache entry");
                self.remove(&key)
            }
            None => false,
        }
    }
}

/// Estimated in-memory size: the length of the compact JSON encoding.
fn estimate_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(capacity: usize, max_bytes: usize) -> QueryCache {
        QueryCache::new(&CacheConfig {
            capacity,
            max_bytes,
            ..CacheConfig::default()
        })
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn entry_expires_after_ttl() {
        let mut cache = cache(10, 1024);
        cache.insert("k".into(), json!([1, 2]), TTL, 0).unwrap();
        assert_eq!(cache.get("k", 59_999), Some(json!([1, 2])));
        assert_eq!(cache.get("k", 60_000), None);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn evicts_fewest_hits_first() {
        let mut cache = cache(2, 1024);
        cache.insert("a".into(), json!(1), TTL, 0).unwrap();
        cache.insert("b".into(), json!(2), TTL, 1).unwrap();
        cache.get("a", 2);
        cache.insert("c".into(), json!(3), TTL, 3).unwrap();

        assert!(cache.contains("a", 4));
        assert!(!cache.contains("b", 4));
        assert!(cache.contains("c", 4));
    }

    #[test]
    fn byte_bound_evicts_and_rejects_oversized() {
        let mut cache = cache(10, 8);
        cache.insert("a".into(), json!("abcd"), TTL, 0).unwrap(); // 6 bytes
        cache.insert("b".into(), json!("xy"), TTL, 1).unwrap(); // 4 bytes
        assert!(!cache.contains("a", 2));
        assert_eq!(cache.total_bytes(), 4);

        let err = cache
            .insert("big".into(), json!("0123456789"), TTL, 2)
            .unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { limit: 8, .. }));
    }

    #[test]
    fn sweep_and_prefix_invalidation() {
        let mut cache = cache(10, 1024);
        cache.insert("users:all".into(), json!(1), Duration::from_secs(1), 0).unwrap();
        cache.insert("users:doctors".into(), json!(2), TTL, 0).unwrap();
        cache.insert("messages:all".into(), json!(3), TTL, 0).unwrap();

        assert_eq!(cache.sweep_expired(5_000), 1);
        assert_eq!(cache.invalidate("users:"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("messages:all", 5_000));
    }

    #[test]
    fn reinsert_replaces_size() {
        let mut cache = cache(10, 1024);
        cache.insert("k".into(), json!("aaaa"), TTL, 0).unwrap();
        cache.insert("k".into(), json!("a"), TTL, 0).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 3);
    }
}
