//! Two-tier cache: a memory LRU in front of a [`PersistentStore`].
//!
//! Reads check memory first and back-fill it on a persistent hit.
//! Concurrent misses for the same key share one persistent read; a write to
//! the key while that read is in flight supersedes it. Writes go to memory,
//! then to the store on a best-effort basis.

use crate::hash::ContentHash;
use crate::memory_cache::{CacheEntry, MemoryCache, PersistentCacheEntry};
use crate::store::PersistentStore;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Persistent read shared by every concurrent `get` of one key
#[derive(Default)]
struct PendingRead {
    result: OnceCell<Option<CacheEntry>>,
    /// Set when a write to the key lands while the read is in flight
    superseded: AtomicBool,
}

impl PendingRead {
    fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }
}

type InFlight = Arc<PendingRead>;

/// A waiter's handle on a pending read. Dropping it (on completion or
/// cancellation) removes the read from the in-flight map once the read has
/// finished or no other waiter holds it.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, InFlight>>,
    key: &'a str,
    read: InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        let Some(current) = in_flight.get(self.key) else {
            return;
        };
        // One reference is the map's, one is ours
        let last_waiter = Arc::strong_count(&self.read) <= 2;
        if Arc::ptr_eq(current, &self.read) && (self.read.result.initialized() || last_waiter) {
            in_flight.remove(self.key);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridCacheOptions {
    pub capacity: usize,
    /// TTL applied by [`HybridCache::set`]; `None` means entries never expire
    pub default_ttl: Option<Duration>,
    pub version: u32,
}

impl Default for HybridCacheOptions {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl: Some(Duration::from_secs(86_400)),
            version: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of requests served from either tier
    pub hit_rate: f64,
    pub memory_entries: usize,
    pub persistent_reads: u64,
    pub persistent_errors: u64,
    /// Persistent reads currently shared by waiting `get` calls
    pub pending_reads: usize,
}

pub struct HybridCache {
    memory: MemoryCache,
    store: Arc<dyn PersistentStore>,
    options: HybridCacheOptions,
    in_flight: Mutex<HashMap<String, InFlight>>,
    hits: AtomicU64,
    misses: AtomicU64,
    persistent_reads: AtomicU64,
    persistent_errors: AtomicU64,
}

impl HybridCache {
    pub fn new(store: Arc<dyn PersistentStore>, options: HybridCacheOptions) -> Self {
        Self {
            memory: MemoryCache::new(options.capacity),
            store,
            options,
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            persistent_reads: AtomicU64::new(0),
            persistent_errors: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u32 {
        self.options.version
    }

    /// Cached value for `key`, if present, current and unexpired
    pub async fn get(&self, key: &str) -> Option<String> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key, now_ms()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }

        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            read: Arc::clone(self.in_flight.lock().entry(key.to_string()).or_default()),
        };
        let read = &guard.read;

        let mut entry = read.result.get_or_init(|| self.read_persistent(key, read)).await.clone();

        // A write landed during the read; answer from the state it left behind
        if read.is_superseded() {
            entry = self.memory.get(key, now_ms());
        }
        drop(guard);

        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    async fn read_persistent(&self, key: &str, read: &PendingRead) -> Option<CacheEntry> {
        self.persistent_reads.fetch_add(1, Ordering::Relaxed);

        let persisted = match self.store.get(key).await {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return None,
            Err(e) => {
                self.persistent_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("persistent cache read for '{}' failed: {}", key, e);
                return None;
            }
        };

        if persisted.version != self.options.version {
            tracing::debug!(
                "cache entry '{}' has version {}, expected {}",
                key,
                persisted.version,
                self.options.version
            );
            if !read.is_superseded() {
                self.delete_persistent(key).await;
            }
            return None;
        }
        if persisted.entry.is_expired(now_ms()) {
            if !read.is_superseded() {
                self.delete_persistent(key).await;
            }
            return None;
        }

        self.memory
            .backfill(key.to_string(), persisted.entry.clone(), || !read.is_superseded());
        Some(persisted.entry)
    }

    /// Store `value` with the default TTL
    pub async fn set<I, S>(&self, key: &str, value: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_with_ttl(key, value, dependencies, self.options.default_ttl)
            .await
    }

    /// Store `value` in both tiers. A persistent write failure is logged and
    /// leaves the memory entry in place.
    pub async fn set_with_ttl<I, S>(&self, key: &str, value: &str, dependencies: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = now_ms();
        let entry = CacheEntry {
            value: value.to_string(),
            timestamp: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64)),
            dependencies: dependencies.into_iter().map(Into::into).collect::<BTreeSet<_>>(),
            content_hash: ContentHash::from_str_content(value).to_string(),
        };

        self.supersede(key);
        self.memory.insert(key.to_string(), entry.clone());

        let persisted = PersistentCacheEntry {
            entry,
            version: self.options.version,
        };
        if let Err(e) = self.store.put(key, &persisted).await {
            self.persistent_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("persistent cache write for '{}' failed: {}", key, e);
        }
    }

    pub async fn delete(&self, key: &str) {
        self.supersede(key);
        self.memory.remove(key);
        self.delete_persistent(key).await;
    }

    /// Remove every entry, in both tiers, whose dependency set contains
    /// `dependency`. Returns the number of distinct keys removed.
    pub async fn invalidate_dependency(&self, dependency: &str) -> usize {
        // The dependencies of an entry still being read are unknown
        self.supersede_all();
        let mut removed: HashSet<String> = self.memory.remove_dependents(dependency).into_iter().collect();

        match self.store.list_keys().await {
            Ok(keys) => {
                for key in keys {
                    match self.store.get(&key).await {
                        Ok(Some(persisted)) if persisted.entry.depends_on(dependency) => {
                            self.delete_persistent(&key).await;
                            removed.insert(key);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("persistent cache read for '{}' failed: {}", key, e),
                    }
                }
            }
            Err(e) => {
                self.persistent_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("listing persistent cache keys failed: {}", e);
            }
        }

        if !removed.is_empty() {
            tracing::debug!("invalidated {} entries depending on '{}'", removed.len(), dependency);
        }
        removed.len()
    }

    /// Sweep expired entries from both tiers, returning how many distinct
    /// keys were removed
    pub async fn cleanup(&self) -> usize {
        let now = now_ms();
        let mut removed: HashSet<String> = self.memory.remove_expired(now).into_iter().collect();

        match self.store.scan_expired(now).await {
            Ok(keys) => {
                for key in keys {
                    self.delete_persistent(&key).await;
                    removed.insert(key);
                }
            }
            Err(e) => {
                self.persistent_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("scanning persistent cache for expired entries failed: {}", e);
            }
        }
        removed.len()
    }

    pub async fn clear(&self) {
        self.supersede_all();
        self.memory.clear();
        if let Err(e) = self.store.clear().await {
            self.persistent_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("clearing persistent cache failed: {}", e);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
            memory_entries: self.memory.len(),
            persistent_reads: self.persistent_reads.load(Ordering::Relaxed),
            persistent_errors: self.persistent_errors.load(Ordering::Relaxed),
            pending_reads: self.in_flight.lock().len(),
        }
    }

    /// Detach the in-flight read of `key`, if any, so its result is neither
    /// back-filled nor handed to its waiters. Must run before the memory
    /// tier is touched.
    fn supersede(&self, key: &str) {
        if let Some(read) = self.in_flight.lock().remove(key) {
            read.superseded.store(true, Ordering::SeqCst);
        }
    }

    fn supersede_all(&self) {
        for (_, read) in self.in_flight.lock().drain() {
            read.superseded.store(true, Ordering::SeqCst);
        }
    }

    async fn delete_persistent(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            self.persistent_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("persistent cache delete for '{}' failed: {}", key, e);
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache_with(store: Arc<MemoryStore>) -> HybridCache {
        HybridCache::new(store, HybridCacheOptions::default())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        cache.set("k", ".a {}", ["rule:a"]).await;
        assert_eq!(cache.get("k").await.as_deref(), Some(".a {}"));
        assert_eq!(cache.get("missing").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[tokio::test]
    async fn test_hit_rate_is_zero_without_requests() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        assert_eq!(cache.stats().hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_persistent_hit_back_fills_memory() {
        let store = Arc::new(MemoryStore::new());
        cache_with(Arc::clone(&store)).set("k", "v", Vec::<String>::new()).await;

        let fresh = cache_with(Arc::clone(&store));
        assert_eq!(fresh.stats().memory_entries, 0);
        assert_eq!(fresh.get("k").await.as_deref(), Some("v"));
        assert_eq!(fresh.stats().memory_entries, 1);
        assert_eq!(fresh.get("k").await.as_deref(), Some("v"));
        assert_eq!(fresh.stats().persistent_reads, 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        cache_with(Arc::clone(&store)).set("k", "v", Vec::<String>::new()).await;

        let bumped = HybridCache::new(
            Arc::clone(&store) as Arc<dyn PersistentStore>,
            HybridCacheOptions {
                version: 2,
                ..HybridCacheOptions::default()
            },
        );
        assert_eq!(bumped.get("k").await, None);
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_dependency_only_touches_dependents() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(Arc::clone(&store));
        cache.set("a", "1", ["rule:p"]).await;
        cache.set("b", "2", ["rule:p", "rule:m"]).await;
        cache.set("c", "3", ["rule:m"]).await;

        assert_eq!(cache.invalidate_dependency("rule:p").await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("c").await.as_deref(), Some("3"));
        assert_eq!(store.list_keys().await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_cleanup_counts_expired() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        cache
            .set_with_ttl("gone", "x", Vec::<String>::new(), Some(Duration::ZERO))
            .await;
        cache.set_with_ttl("kept", "y", Vec::<String>::new(), None).await;
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.get("kept").await.as_deref(), Some("y"));
    }
}
