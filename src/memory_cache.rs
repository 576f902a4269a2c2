//! In-memory tier of the hybrid cache: a capacity-bounded LRU of
//! [`CacheEntry`] values.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cached value with its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: String,

    /// Milliseconds since the Unix epoch when the entry was written
    pub timestamp: i64,

    /// Expiry in epoch milliseconds; `None` never expires
    pub expires_at: Option<i64>,

    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub content_hash: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now_ms)
    }

    pub fn depends_on(&self, dependency: &str) -> bool {
        self.dependencies.contains(dependency)
    }
}

/// Entry as written to the persistent tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentCacheEntry {
    #[serde(flatten)]
    pub entry: CacheEntry,
    pub version: u32,
}

/// LRU map; the front of the map is the least recently used entry.
pub struct MemoryCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Look up a live entry and mark it most recently used. An expired entry
    /// is removed and reported as absent.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.shift_remove(key)?;
        if entry.is_expired(now_ms) {
            return None;
        }
        entries.insert(key.to_string(), entry.clone());
        Some(entry)
    }

    pub fn insert(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        Self::insert_locked(&mut entries, key, entry, self.capacity);
    }

    /// Insert an entry read from a slower tier. Skipped when `allowed`
    /// returns false (checked under the lock) or when the memory tier
    /// already holds an entry written at the same time or later.
    pub fn backfill<F>(&self, key: String, entry: CacheEntry, allowed: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.entries.lock();
        if !allowed() {
            return false;
        }
        if entries.get(&key).is_some_and(|current| current.timestamp >= entry.timestamp) {
            return false;
        }
        Self::insert_locked(&mut entries, key, entry, self.capacity);
        true
    }

    fn insert_locked(entries: &mut IndexMap<String, CacheEntry>, key: String, entry: CacheEntry, capacity: usize) {
        entries.shift_remove(&key);
        entries.insert(key, entry);
        while entries.len() > capacity {
            entries.shift_remove_index(0);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().shift_remove(key).is_some()
    }

    /// Remove every entry whose dependency set contains `dependency`,
    /// returning the removed keys
    pub fn remove_dependents(&self, dependency: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.lock().retain(|key, entry| {
            if entry.depends_on(dependency) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drop expired entries, returning the removed keys
    pub fn remove_expired(&self, now_ms: i64) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.lock().retain(|key, entry| {
            if entry.is_expired(now_ms) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, expires_at: Option<i64>) -> CacheEntry {
        CacheEntry {
            value: value.to_string(),
            timestamp: 0,
            expires_at,
            dependencies: BTreeSet::new(),
            content_hash: String::new(),
        }
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = MemoryCache::new(2);
        cache.insert("a".into(), entry("1", None));
        cache.insert("b".into(), entry("2", None));
        assert!(cache.get("a", 0).is_some());
        cache.insert("c".into(), entry("3", None));

        assert!(cache.get("b", 0).is_none());
        assert!(cache.get("a", 0).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let cache = MemoryCache::new(10);
        cache.insert("old".into(), entry("x", Some(100)));
        cache.insert("forever".into(), entry("y", None));

        assert!(cache.get("old", 50).is_some());
        assert!(cache.get("old", 100).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("forever", i64::MAX).is_some());
    }

    #[test]
    fn test_backfill_never_replaces_newer_entries() {
        let cache = MemoryCache::new(10);
        let mut newer = entry("new", None);
        newer.timestamp = 20;
        cache.insert("k".into(), newer);

        let mut older = entry("old", None);
        older.timestamp = 10;
        assert!(!cache.backfill("k".into(), older.clone(), || true));
        assert_eq!(cache.get("k", 0).unwrap().value, "new");

        assert!(!cache.backfill("other".into(), older.clone(), || false));
        assert!(cache.get("other", 0).is_none());

        assert!(cache.backfill("other".into(), older, || true));
        assert_eq!(cache.get("other", 0).unwrap().value, "old");
    }

    #[test]
    fn test_persistent_entry_json_shape() {
        let persisted = PersistentCacheEntry {
            entry: entry("css", None),
            version: 3,
        };
        let json = serde_json::to_value(&persisted).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["value"], "css");
        assert!(json["expiresAt"].is_null());
    }
}
