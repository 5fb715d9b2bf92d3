use crate::store::{KvStore, KvStoreExt, StoreError};
use chrono::{DateTime, Utc};
use diary_sync_models::ImportLogEntry;
use std::sync::Arc;

/// Fixed identifiers of persisted state entries
pub mod keys {
    pub const IMPORT_LOCK: &str = "reelbook_import_lock";
    pub const FEED_CACHE_PREFIX: &str = "reelbook_feed:";
    pub const LAST_CHECK: &str = "reelbook_last_check";
    pub const LAST_IMPORT: &str = "reelbook_last_import";
    pub const IMPORT_LOG: &str = "reelbook_import_log";
    pub const ENRICHMENT_PROGRESS: &str = "reelbook_enrichment_progress";
    pub const RATE_LIMIT_WINDOW: &str = "reelbook_tmdb_rate_window";
    pub const TMDB_CACHE_PREFIX: &str = "reelbook_tmdb:";

    /// Response caches; kept apart from the small bookkeeping entries
    pub const CACHE_PREFIXES: [&str; 2] = [FEED_CACHE_PREFIX, TMDB_CACHE_PREFIX];

    /// Standalone counters written by older versions; cleared when a run completes
    pub const LEGACY_ENRICH_COUNTERS: [&str; 3] = [
        "reelbook_enrich_processed",
        "reelbook_enrich_updated",
        "reelbook_enrich_failed",
    ];
}

pub const IMPORT_LOG_CAPACITY: usize = 50;

/// Non-expiring bookkeeping: check/import timestamps and the rolling import log
#[derive(Clone)]
pub struct OptionStore {
    store: Arc<dyn KvStore>,
}

impl OptionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn last_check(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.get_json(keys::LAST_CHECK)
    }

    pub fn set_last_check(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.set_json(keys::LAST_CHECK, &at, None)
    }

    pub fn last_import(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.get_json(keys::LAST_IMPORT)
    }

    pub fn set_last_import(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.set_json(keys::LAST_IMPORT, &at, None)
    }

    /// Newest first
    pub fn import_log(&self) -> Result<Vec<ImportLogEntry>, StoreError> {
        Ok(self.store.get_json(keys::IMPORT_LOG)?.unwrap_or_default())
    }

    pub fn append_import_log(&self, entry: ImportLogEntry) -> Result<(), StoreError> {
        let mut encode_error = None;
        self.store.update(keys::IMPORT_LOG, None, &mut |current| {
            let mut log: Vec<ImportLogEntry> = current
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            log.insert(0, entry.clone());
            log.truncate(IMPORT_LOG_CAPACITY);
            match serde_json::to_string(&log) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    encode_error = Some(e);
                    None
                }
            }
        })?;
        match encode_error {
            Some(source) => Err(StoreError::Encode {
                key: keys::IMPORT_LOG.to_string(),
                source,
            }),
            None => Ok(()),
        }
    }
}
