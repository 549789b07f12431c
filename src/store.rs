use crate::model::{BirdRecord, CacheEntry, HistoryEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const HISTORY_CAP: usize = 200;

const CACHE_KEY: &str = "cached-bird";
const HISTORY_KEY: &str = "view-history";
const INSTALL_KEY: &str = "installed-at";

/// The two durable storage areas: `Local` stays on this machine (cache,
/// history, install bookkeeping), `Synced` follows the user (preferences).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Local,
    Synced,
}

impl Namespace {
    fn file_name(&self) -> &'static str {
        match self {
            Namespace::Local => "local.json",
            Namespace::Synced => "synced.json",
        }
    }
}

/// Durable key-value storage. Calls suspend and resolve exactly once;
/// concurrent writers are last-write-wins per key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>>;
    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, ns: Namespace, key: &str) -> Result<()>;
}

/// File-backed store: one JSON document per namespace under the data dir.
#[derive(Debug)]
pub struct FileKvStore {
    dir: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

impl FileKvStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    fn path_for(&self, ns: Namespace) -> PathBuf {
        self.dir.join(ns.file_name())
    }

    fn read_doc(&self, ns: Namespace) -> Result<serde_json::Map<String, Value>> {
        let path = self.path_for(ns);
        if !path.exists() {
            return Ok(serde_json::Map::new());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read store file {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        let doc: serde_json::Map<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse store file {}", path.display()))?;
        Ok(doc)
    }

    fn write_doc(&self, ns: Namespace, doc: &serde_json::Map<String, Value>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create store directory {}", self.dir.display()))?;
        let path = self.path_for(ns);
        let text = serde_json::to_string_pretty(doc)?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write store file {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>> {
        let _held = self.guard.lock().await;
        Ok(self.read_doc(ns)?.get(key).cloned())
    }

    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()> {
        let _held = self.guard.lock().await;
        let mut doc = self.read_doc(ns)?;
        doc.insert(key.to_string(), value);
        self.write_doc(ns, &doc)
    }

    async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        let _held = self.guard.lock().await;
        let mut doc = self.read_doc(ns)?;
        if doc.remove(key).is_some() {
            self.write_doc(ns, &doc)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<(Namespace, String), Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryKvStore {
    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(Namespace, String), Value>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(&(ns, key.to_string())).cloned())
    }

    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()> {
        self.entries()?.insert((ns, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        self.entries()?.remove(&(ns, key.to_string()));
        Ok(())
    }
}

/// Single-slot, date + backend scoped cache of the current bird.
#[derive(Clone)]
pub struct SightingCache {
    store: std::sync::Arc<dyn KvStore>,
}

impl SightingCache {
    pub fn new(store: std::sync::Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self) -> Result<Option<CacheEntry>> {
        match self.store.get(Namespace::Local, CACHE_KEY).await? {
            Some(value) => {
                let entry = serde_json::from_value(value)
                    .context("cached-bird entry is malformed")?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let value = serde_json::to_value(entry)?;
        self.store.put(Namespace::Local, CACHE_KEY, value).await
    }

    pub async fn invalidate(&self) -> Result<()> {
        self.store.remove(Namespace::Local, CACHE_KEY).await
    }
}

/// Append-only, capacity-bounded log of resolved birds; the offline
/// fallback and the browsing source for the history UI.
#[derive(Clone)]
pub struct ViewHistory {
    store: std::sync::Arc<dyn KvStore>,
}

impl ViewHistory {
    pub fn new(store: std::sync::Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, record: &BirdRecord, resolved_at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.list().await?;
        entries.push(HistoryEntry {
            record: record.clone(),
            resolved_at,
        });
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_CAP;
            entries.drain(..excess);
        }
        let value = serde_json::to_value(&entries)?;
        self.store.put(Namespace::Local, HISTORY_KEY, value).await
    }

    /// Oldest first.
    pub async fn list(&self) -> Result<Vec<HistoryEntry>> {
        match self.store.get(Namespace::Local, HISTORY_KEY).await? {
            Some(value) => {
                let entries = serde_json::from_value(value)
                    .context("view-history entries are malformed")?;
                Ok(entries)
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn newest(&self) -> Result<Option<HistoryEntry>> {
        Ok(self.list().await?.pop())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(Namespace::Local, HISTORY_KEY).await
    }
}

/// Records the first-run timestamp once; later calls leave it untouched.
pub async fn ensure_install_stamp(store: &dyn KvStore, now: DateTime<Utc>) -> Result<()> {
    if store.get(Namespace::Local, INSTALL_KEY).await?.is_none() {
        store
            .put(Namespace::Local, INSTALL_KEY, Value::String(now.to_rfc3339()))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        FileKvStore, HISTORY_CAP, KvStore, MemoryKvStore, Namespace, SightingCache, ViewHistory,
        ensure_install_stamp,
    };
    use crate::model::{CacheEntry, PhotoBackend, test_record};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_store_round_trips_values_per_namespace() {
        let dir = tempdir().expect("tempdir");
        let store = FileKvStore::new(dir.path());

        store
            .put(Namespace::Local, "k", json!({"n": 1}))
            .await
            .expect("put local");
        store
            .put(Namespace::Synced, "k", json!({"n": 2}))
            .await
            .expect("put synced");

        assert_eq!(
            store.get(Namespace::Local, "k").await.expect("get"),
            Some(json!({"n": 1}))
        );
        assert_eq!(
            store.get(Namespace::Synced, "k").await.expect("get"),
            Some(json!({"n": 2}))
        );

        store.remove(Namespace::Local, "k").await.expect("remove");
        assert_eq!(store.get(Namespace::Local, "k").await.expect("get"), None);
        assert!(store.get(Namespace::Synced, "k").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn cache_is_single_slot() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = SightingCache::new(store);
        let today = Utc::now().date_naive();

        assert!(cache.get().await.expect("get").is_none());

        cache
            .put(&CacheEntry::new(test_record("Robin"), today))
            .await
            .expect("put");
        cache
            .put(&CacheEntry::new(test_record("Wren"), today))
            .await
            .expect("overwrite");

        let entry = cache.get().await.expect("get").expect("entry");
        assert_eq!(entry.record.common_name, "Wren");
        assert!(entry.is_valid(today, PhotoBackend::BirdLibrary));

        cache.invalidate().await.expect("invalidate");
        assert!(cache.get().await.expect("get").is_none());
    }

    #[tokio::test]
    async fn history_caps_at_two_hundred_with_fifo_eviction() {
        let store = Arc::new(MemoryKvStore::new());
        let history = ViewHistory::new(store);

        for i in 0..(HISTORY_CAP + 1) {
            let record = test_record(&format!("Bird {i}"));
            history.append(&record, Utc::now()).await.expect("append");
        }

        let entries = history.list().await.expect("list");
        assert_eq!(entries.len(), HISTORY_CAP);
        assert_eq!(entries[0].record.common_name, "Bird 1");
        assert_eq!(
            entries.last().expect("newest").record.common_name,
            format!("Bird {HISTORY_CAP}")
        );
    }

    #[tokio::test]
    async fn newest_returns_last_appended() {
        let store = Arc::new(MemoryKvStore::new());
        let history = ViewHistory::new(store);
        assert!(history.newest().await.expect("newest").is_none());

        history
            .append(&test_record("Robin"), Utc::now())
            .await
            .expect("append");
        history
            .append(&test_record("Wren"), Utc::now())
            .await
            .expect("append");

        let newest = history.newest().await.expect("newest").expect("entry");
        assert_eq!(newest.record.common_name, "Wren");

        history.clear().await.expect("clear");
        assert!(history.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn install_stamp_is_written_once() {
        let store = MemoryKvStore::new();
        let first = Utc::now();
        ensure_install_stamp(&store, first).await.expect("stamp");
        let stored = store
            .get(Namespace::Local, "installed-at")
            .await
            .expect("get")
            .expect("value");

        ensure_install_stamp(&store, Utc::now()).await.expect("stamp again");
        let stored_again = store
            .get(Namespace::Local, "installed-at")
            .await
            .expect("get")
            .expect("value");
        assert_eq!(stored, stored_again);
    }
}
