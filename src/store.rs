//! Persistent tier of the hybrid cache.
//!
//! [`PersistentStore`] is the narrow interface the cache needs. [`RedbStore`]
//! keeps entries in an embedded redb database; [`MemoryStore`] is a volatile
//! stand-in used when no cache path is configured and in tests.

use crate::errors::{JitError, Result};
use crate::memory_cache::PersistentCacheEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PersistentCacheEntry>>;

    async fn put(&self, key: &str, entry: &PersistentCacheEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Keys of entries that have expired at `now_ms`
    async fn scan_expired(&self, now_ms: i64) -> Result<Vec<String>>;
}

/// Volatile store backed by a hash map
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, PersistentCacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<PersistentCacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, entry: &PersistentCacheEntry) -> Result<()> {
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn scan_expired(&self, now_ms: i64) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.entry.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Store kept in a redb database file. Values are JSON-encoded
/// [`PersistentCacheEntry`] records; blocking database work runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open the database at `path`, creating it and its table if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(ENTRIES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| JitError::Store(format!("store task failed: {}", e)))?
    }

    fn read_all(db: &Database) -> Result<Vec<(String, PersistentCacheEntry)>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            match serde_json::from_slice::<PersistentCacheEntry>(value.value()) {
                Ok(entry) => out.push((key.value().to_string(), entry)),
                Err(e) => tracing::debug!("skipping unreadable cache row '{}': {}", key.value(), e),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl PersistentStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<PersistentCacheEntry>> {
        let key = key.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES_TABLE)?;
            let Some(value) = table.get(key.as_str())? else {
                return Ok(None);
            };
            Ok(Some(serde_json::from_slice(value.value())?))
        })
        .await
    }

    async fn put(&self, key: &str, entry: &PersistentCacheEntry) -> Result<()> {
        let key = key.to_string();
        let bytes = serde_json::to_vec(entry)?;
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(ENTRIES_TABLE)?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(ENTRIES_TABLE)?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.blocking(|db| {
            let write_txn = db.begin_write()?;
            write_txn.delete_table(ENTRIES_TABLE)?;
            {
                write_txn.open_table(ENTRIES_TABLE)?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.blocking(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ENTRIES_TABLE)?;
            let mut keys = Vec::new();
            for row in table.iter()? {
                let (key, _) = row?;
                keys.push(key.value().to_string());
            }
            Ok(keys)
        })
        .await
    }

    async fn scan_expired(&self, now_ms: i64) -> Result<Vec<String>> {
        self.blocking(move |db| {
            Ok(Self::read_all(db)?
                .into_iter()
                .filter(|(_, entry)| entry.entry.is_expired(now_ms))
                .map(|(key, _)| key)
                .collect())
        })
        .await
    }
}
