use crate::options::keys;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("state lock poisoned")]
    Poisoned,
}

/// Key/value persistence with per-entry expiry.
///
/// Backs the import lock, response caches, the rate-limit window and the
/// enrichment progress record. Expired entries read as absent.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `ttl = None` stores the value without expiry
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Store only when the key is absent or expired. Returns whether it was stored.
    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, StoreError>;

    /// Atomic read-modify-write. Returning `None` from `f` deletes the entry.
    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError>;

    /// Remove every entry whose key starts with `prefix`; returns how many went
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Typed helpers over any [`KvStore`]
pub trait KvStoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), StoreError>;
}

impl<S: KvStore + ?Sized> KvStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Layout changed or the entry was hand-edited; treat as missing
                warn!(key = %key, error = %e, "Discarding undecodable state entry");
                Ok(None)
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, raw, ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()).map(|ttl| Utc::now() + ttl);
        Self { value, expires_at }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

type Entries = HashMap<String, Entry>;

fn read_live(entries: &mut Entries, key: &str) -> Option<String> {
    let now = Utc::now();
    if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        entries.remove(key);
        return None;
    }
    entries.get(key).map(|e| e.value.clone())
}

fn apply_update(
    entries: &mut Entries,
    key: &str,
    ttl: Option<Duration>,
    f: &mut dyn FnMut(Option<String>) -> Option<String>,
) {
    let current = read_live(entries, key);
    match f(current) {
        Some(value) => {
            entries.insert(key.to_string(), Entry::new(value, ttl));
        }
        None => {
            entries.remove(key);
        }
    }
}

fn insert_if_absent(entries: &mut Entries, key: &str, value: String, ttl: Option<Duration>) -> bool {
    if read_live(entries, key).is_some() {
        return false;
    }
    entries.insert(key.to_string(), Entry::new(value, ttl));
    true
}

fn remove_prefix(entries: &mut Entries, prefix: &str) -> usize {
    let before = entries.len();
    entries.retain(|k, _| !k.starts_with(prefix));
    before - entries.len()
}

/// JSON-file backed store; every write is flushed with a temp-file rename
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileKvStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            match serde_json::from_str::<Entries>(&content) {
                Ok(mut entries) => {
                    let now = Utc::now();
                    entries.retain(|_, e| !e.is_expired(now));
                    debug!("Loaded {} state entries from {:?}", entries.len(), path);
                    entries
                }
                Err(e) => {
                    warn!(
                        "State file {:?} is corrupted ({}). Starting with empty state.",
                        path, e
                    );
                    Entries::new()
                }
            }
        } else {
            Entries::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Expired entries are dropped before every write
    fn persist(&self, entries: &mut Entries) -> Result<(), StoreError> {
        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired(now));

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string(entries).map_err(|source| StoreError::Encode {
            key: "*".to_string(),
            source,
        })?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, json).map_err(io_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(read_live(&mut entries, key))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        self.persist(&mut entries)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.persist(&mut entries)?;
        }
        Ok(())
    }

    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let stored = insert_if_absent(&mut entries, key, value, ttl);
        if stored {
            self.persist(&mut entries)?;
        }
        Ok(stored)
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        apply_update(&mut entries, key, ttl, f);
        self.persist(&mut entries)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = remove_prefix(&mut entries, prefix);
        if removed > 0 {
            self.persist(&mut entries)?;
        }
        Ok(removed)
    }
}

/// One JSON file per key under a directory. Used for large independent
/// values (response caches) so a write only touches its own file.
pub struct CacheDirKvStore {
    dir: PathBuf,
    // Serialises read-modify-write within the process
    guard: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedFile {
    key: String,
    #[serde(flatten)]
    entry: Entry,
}

impl CacheDirKvStore {
    /// Creates `dir` if needed and drops expired or unreadable entries
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let store = Self {
            dir: dir.to_path_buf(),
            guard: Mutex::new(()),
        };
        let now = Utc::now();
        let purged = store.remove_where(|file| file.map(|f| f.entry.is_expired(now)).unwrap_or(true))?;
        if purged > 0 {
            debug!(purged, dir = ?dir, "Purged expired cache entries");
        }
        Ok(store)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..32]))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Self::io_err(&path, source)),
        };
        match serde_json::from_str::<CachedFile>(&content) {
            Ok(file) if file.key == key && !file.entry.is_expired(Utc::now()) => Ok(Some(file.entry)),
            _ => {
                remove_file(&path)?;
                Ok(None)
            }
        }
    }

    fn write(&self, key: &str, entry: Entry) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let file = CachedFile {
            key: key.to_string(),
            entry,
        };
        let json = serde_json::to_string(&file).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        let temp_path = path.with_extension(format!("{}.tmp", std::process::id()));
        std::fs::write(&temp_path, json).map_err(|source| Self::io_err(&temp_path, source))?;
        std::fs::rename(&temp_path, &path).map_err(|source| Self::io_err(&path, source))
    }

    /// Remove every entry file for which `predicate` holds; `None` is an
    /// unreadable file
    fn remove_where(&self, mut predicate: impl FnMut(Option<&CachedFile>) -> bool) -> Result<usize, StoreError> {
        let listing = std::fs::read_dir(&self.dir).map_err(|source| Self::io_err(&self.dir, source))?;
        let mut removed = 0;
        for dir_entry in listing {
            let path = dir_entry.map_err(|source| Self::io_err(&self.dir, source))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str::<CachedFile>(&content).ok());
            if predicate(file.as_ref()) {
                remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

impl KvStore for CacheDirKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read(key)?.map(|e| e.value))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        self.write(key, Entry::new(value, ttl))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        remove_file(&self.path_for(key))
    }

    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        if self.read(key)?.is_some() {
            return Ok(false);
        }
        self.write(key, Entry::new(value, ttl))?;
        Ok(true)
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        let current = self.read(key)?.map(|e| e.value);
        match f(current) {
            Some(value) => self.write(key, Entry::new(value, ttl)),
            None => remove_file(&self.path_for(key)),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::Poisoned)?;
        self.remove_where(|file| file.map(|f| f.key.starts_with(prefix)).unwrap_or(false))
    }
}

fn is_cache_key(key: &str) -> bool {
    keys::CACHE_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// The on-disk store of one installation: response caches in a
/// [`CacheDirKvStore`], everything else in a small [`FileKvStore`]
pub struct StateStore {
    state: FileKvStore,
    cache: CacheDirKvStore,
}

impl StateStore {
    pub fn open(state_file: &Path, cache_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            state: FileKvStore::open(state_file)?,
            cache: CacheDirKvStore::open(cache_dir)?,
        })
    }

    fn route(&self, key: &str) -> &dyn KvStore {
        if is_cache_key(key) {
            &self.cache
        } else {
            &self.state
        }
    }
}

impl KvStore for StateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.route(key).get(key)
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.route(key).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.route(key).delete(key)
    }

    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, StoreError> {
        self.route(key).add(key, value, ttl)
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError> {
        self.route(key).update(key, ttl, f)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(self.state.delete_prefix(prefix)? + self.cache.delete_prefix(prefix)?)
    }
}

/// Process-local store for tests and dry runs
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<Entries>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(read_live(&mut entries, key))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(insert_if_absent(&mut entries, key, value, ttl))
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        apply_update(&mut entries, key, ttl, f);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(remove_prefix(&mut entries, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trips_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = FileKvStore::open(&path).unwrap();
        store.set("greeting", "hello".to_string(), None).unwrap();
        drop(store);

        let reopened = FileKvStore::open(&path).unwrap();
        assert_eq!(reopened.get("greeting").unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn test_file_store_drops_expired_entries_on_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = FileKvStore::open(&path).unwrap();
        store.set("stale", "x".to_string(), Some(Duration::from_secs(0))).unwrap();
        store.set("kept", "y".to_string(), None).unwrap();

        let on_disk: HashMap<String, serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert!(on_disk.contains_key("kept"));
    }

    fn json_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("json"))
            .count()
    }

    #[test]
    fn test_cache_dir_store_keeps_one_file_per_key() {
        let dir = TempDir::new().unwrap();
        let cache = CacheDirKvStore::open(dir.path()).unwrap();

        cache.set("reelbook_tmdb:movie/1?", "{}".to_string(), None).unwrap();
        cache.set("reelbook_tmdb:movie/2?", "{}".to_string(), None).unwrap();
        cache.set("reelbook_feed:https://x/", "<rss/>".to_string(), None).unwrap();
        assert_eq!(json_files(dir.path()), 3);
        assert_eq!(cache.get("reelbook_feed:https://x/").unwrap(), Some("<rss/>".to_string()));

        assert!(!cache.add("reelbook_tmdb:movie/1?", "[]".to_string(), None).unwrap());
        cache.update("reelbook_tmdb:movie/2?", None, &mut |_| None).unwrap();
        assert_eq!(cache.get("reelbook_tmdb:movie/2?").unwrap(), None);

        assert_eq!(cache.delete_prefix("reelbook_tmdb:").unwrap(), 1);
        assert_eq!(json_files(dir.path()), 1);
    }

    #[test]
    fn test_cache_dir_store_purges_expired_on_open() {
        let dir = TempDir::new().unwrap();
        let cache = CacheDirKvStore::open(dir.path()).unwrap();
        cache.set("reelbook_tmdb:old", "1".to_string(), Some(Duration::from_secs(0))).unwrap();
        cache.set("reelbook_tmdb:new", "2".to_string(), Some(Duration::from_secs(60))).unwrap();
        std::fs::write(dir.path().join("garbage.json"), "{not json").unwrap();
        drop(cache);

        let reopened = CacheDirKvStore::open(dir.path()).unwrap();
        assert_eq!(json_files(dir.path()), 1);
        assert_eq!(reopened.get("reelbook_tmdb:new").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_state_store_keeps_caches_out_of_state_file() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let cache_dir = dir.path().join("cache");

        let store = StateStore::open(&state_file, &cache_dir).unwrap();
        store.set(keys::IMPORT_LOCK, "held".to_string(), Some(Duration::from_secs(60))).unwrap();
        store
            .set("reelbook_tmdb:movie/949?", "x".repeat(4096), None)
            .unwrap();
        store
            .update(keys::RATE_LIMIT_WINDOW, None, &mut |_| Some("{}".to_string()))
            .unwrap();

        let state = std::fs::read_to_string(&state_file).unwrap();
        assert!(!state.contains("reelbook_tmdb:movie"));
        assert!(state.len() < 512);
        assert_eq!(json_files(&cache_dir), 1);

        assert_eq!(store.delete_prefix(keys::TMDB_CACHE_PREFIX).unwrap(), 1);
        drop(store);
        let reopened = StateStore::open(&state_file, &cache_dir).unwrap();
        assert_eq!(reopened.get(keys::IMPORT_LOCK).unwrap(), Some("held".to_string()));
        assert_eq!(reopened.get("reelbook_tmdb:movie/949?").unwrap(), None);
    }

    #[test]
    fn test_expired_entries_read_as_missing() {
        let store = MemoryKvStore::new();
        store.set("lock", "1".to_string(), Some(Duration::from_secs(0))).unwrap();
        assert_eq!(store.get("lock").unwrap(), None);

        store.set("lock", "1".to_string(), Some(Duration::from_secs(60))).unwrap();
        assert_eq!(store.get("lock").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_update_is_read_modify_write() {
        let store = MemoryKvStore::new();
        for _ in 0..3 {
            store
                .update("counter", None, &mut |current| {
                    let n: u32 = current.and_then(|c| c.parse().ok()).unwrap_or(0);
                    Some((n + 1).to_string())
                })
                .unwrap();
        }
        assert_eq!(store.get("counter").unwrap(), Some("3".to_string()));

        store.update("counter", None, &mut |_| None).unwrap();
        assert_eq!(store.get("counter").unwrap(), None);
    }

    #[test]
    fn test_add_only_when_absent() {
        let store = MemoryKvStore::new();
        assert!(store.add("lock", "a".to_string(), Some(Duration::from_secs(60))).unwrap());
        assert!(!store.add("lock", "b".to_string(), Some(Duration::from_secs(60))).unwrap());
        assert_eq!(store.get("lock").unwrap(), Some("a".to_string()));

        // An expired holder does not block
        store.set("stale", "old".to_string(), Some(Duration::from_secs(0))).unwrap();
        assert!(store.add("stale", "new".to_string(), None).unwrap());
    }

    #[test]
    fn test_delete_prefix() {
        let store = MemoryKvStore::new();
        store.set("tmdb:a", "1".to_string(), None).unwrap();
        store.set("tmdb:b", "2".to_string(), None).unwrap();
        store.set("other", "3".to_string(), None).unwrap();

        assert_eq!(store.delete_prefix("tmdb:").unwrap(), 2);
        assert_eq!(store.get("other").unwrap(), Some("3".to_string()));
    }

    #[test]
    fn test_json_helpers_discard_garbage() {
        let store = MemoryKvStore::new();
        store.set("progress", "{not json".to_string(), None).unwrap();
        let value: Option<Vec<u32>> = store.get_json("progress").unwrap();
        assert!(value.is_none());

        store.set_json("progress", &vec![1u32, 2, 3], None).unwrap();
        let value: Option<Vec<u32>> = store.get_json("progress").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
