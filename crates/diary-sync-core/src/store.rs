use crate::identity::{normalize, title_year_key};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diary_sync_models::{meta_keys, ContentRecord, IdentityKey, NewRecord, RecordId, RecordUpdate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity keys of every non-trashed record, split by kind
#[derive(Debug, Clone, Default)]
pub struct ExistingKeys {
    pub url_keys: HashSet<String>,
    pub title_year_keys: HashSet<String>,
}

impl ExistingKeys {
    pub fn contains(&self, url_key: &IdentityKey, title_year_key: &IdentityKey) -> bool {
        (!url_key.is_empty() && self.url_keys.contains(url_key.as_str()))
            || (!title_year_key.is_empty() && self.title_year_keys.contains(title_year_key.as_str()))
    }

    pub fn len(&self) -> usize {
        self.url_keys.len() + self.title_year_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.url_keys.is_empty() && self.title_year_keys.is_empty()
    }
}

/// Where content records live. Lookups ignore trashed records.
pub trait ContentStore: Send + Sync {
    fn find_by_identity_key(&self, key: &IdentityKey) -> Result<Option<ContentRecord>>;
    /// Exact match of the stored source URL against any of `urls`
    fn find_by_url_variants(&self, urls: &[String]) -> Result<Option<ContentRecord>>;
    /// Stored source URL containing `fragment`
    fn find_by_url_fragment(&self, fragment: &str) -> Result<Option<ContentRecord>>;
    fn get(&self, id: RecordId) -> Result<Option<ContentRecord>>;
    fn create(&self, record: NewRecord) -> Result<RecordId>;
    fn update(&self, id: RecordId, update: RecordUpdate) -> Result<()>;
    /// Merge `meta` into the record's metadata; other keys are untouched
    fn set_metadata(&self, id: RecordId, meta: &BTreeMap<String, String>) -> Result<()>;
    fn set_taxonomy_term(&self, id: RecordId, taxonomy: &str, term: &str) -> Result<()>;
    fn set_cover_image(&self, id: RecordId, attachment: &str) -> Result<()>;
    fn prefetch_identity_keys(&self) -> Result<ExistingKeys>;
    fn count_enrichable(&self) -> Result<usize>;
    /// Ids of non-trashed records in ascending order
    fn enrichable_ids(&self, offset: usize, limit: usize) -> Result<Vec<RecordId>>;

    /// Make buffered writes durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    next_id: RecordId,
    records: BTreeMap<RecordId, ContentRecord>,
}

struct Inner {
    data: RecordsFile,
    dirty: bool,
}

/// JSON-file content store.
///
/// Writes are buffered and made durable by [`ContentStore::flush`] (temp file
/// plus rename); dropping the store flushes as well.
pub struct FileContentStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl FileContentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read records file {:?}", path))?;
            serde_json::from_str::<RecordsFile>(&content)
                .with_context(|| format!("Records file {:?} is not valid JSON", path))?
        } else {
            RecordsFile::default()
        };
        info!("Loaded {} content records from {:?}", data.records.len(), path);

        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: Mutex::new(Inner { data, dirty: false }),
        })
    }

    /// Nothing is written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                data: RecordsFile::default(),
                dirty: false,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("content store lock poisoned"))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.data.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All records, trashed included, in id order
    pub fn all(&self) -> Result<Vec<ContentRecord>> {
        Ok(self.lock()?.data.records.values().cloned().collect())
    }

    fn with_record<F>(&self, id: RecordId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ContentRecord),
    {
        let mut inner = self.lock()?;
        let record = inner
            .data
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("content record {} does not exist", id))?;
        f(record);
        record.modified_at = Utc::now();
        inner.dirty = true;
        Ok(())
    }

    fn find_live<P>(&self, predicate: P) -> Result<Option<ContentRecord>>
    where
        P: Fn(&ContentRecord) -> bool,
    {
        let inner = self.lock()?;
        Ok(inner
            .data
            .records
            .values()
            .find(|r| !r.is_trashed() && predicate(r))
            .cloned())
    }

    fn write_file(path: &Path, data: &RecordsFile) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, path)?;
        debug!("Saved {} content records to {:?}", data.records.len(), path);
        Ok(())
    }
}

impl ContentStore for FileContentStore {
    fn find_by_identity_key(&self, key: &IdentityKey) -> Result<Option<ContentRecord>> {
        if key.is_empty() {
            return Ok(None);
        }
        self.find_live(|r| r.meta(meta_keys::IDENTITY_KEY) == Some(key.as_str()))
    }

    fn find_by_url_variants(&self, urls: &[String]) -> Result<Option<ContentRecord>> {
        self.find_live(|r| r.source_url().map(|u| urls.iter().any(|v| v == u)).unwrap_or(false))
    }

    fn find_by_url_fragment(&self, fragment: &str) -> Result<Option<ContentRecord>> {
        if fragment.is_empty() {
            return Ok(None);
        }
        self.find_live(|r| r.source_url().map(|u| u.contains(fragment)).unwrap_or(false))
    }

    fn get(&self, id: RecordId) -> Result<Option<ContentRecord>> {
        Ok(self.lock()?.data.records.get(&id).cloned())
    }

    fn create(&self, record: NewRecord) -> Result<RecordId> {
        let mut inner = self.lock()?;
        inner.data.next_id += 1;
        let id = inner.data.next_id;
        let now = Utc::now();
        inner.data.records.insert(
            id,
            ContentRecord {
                id,
                title: record.title,
                status: record.status,
                content: record.content,
                date: record.date,
                created_at: now,
                modified_at: now,
                meta: BTreeMap::new(),
                terms: BTreeMap::new(),
                cover_image: None,
            },
        );
        inner.dirty = true;
        Ok(id)
    }

    fn update(&self, id: RecordId, update: RecordUpdate) -> Result<()> {
        self.with_record(id, |record| {
            if let Some(title) = update.title {
                record.title = title;
            }
            if let Some(status) = update.status {
                record.status = status;
            }
            if let Some(content) = update.content {
                record.content = content;
            }
            if let Some(date) = update.date {
                record.date = Some(date);
            }
        })
    }

    fn set_metadata(&self, id: RecordId, meta: &BTreeMap<String, String>) -> Result<()> {
        self.with_record(id, |record| {
            for (key, value) in meta {
                record.meta.insert(key.clone(), value.clone());
            }
        })
    }

    fn set_taxonomy_term(&self, id: RecordId, taxonomy: &str, term: &str) -> Result<()> {
        self.with_record(id, |record| {
            record.terms.insert(taxonomy.to_string(), term.to_string());
        })
    }

    fn set_cover_image(&self, id: RecordId, attachment: &str) -> Result<()> {
        self.with_record(id, |record| {
            record.cover_image = Some(attachment.to_string());
        })
    }

    fn prefetch_identity_keys(&self) -> Result<ExistingKeys> {
        let inner = self.lock()?;
        let mut keys = ExistingKeys::default();
        for record in inner.data.records.values().filter(|r| !r.is_trashed()) {
            let stored = record
                .meta(meta_keys::IDENTITY_KEY)
                .map(IdentityKey::new)
                .or_else(|| record.source_url().map(|url| normalize(url, "", "")))
                .unwrap_or_default();
            if stored.is_title_year() {
                keys.title_year_keys.insert(stored.into_string());
            } else if !stored.is_empty() {
                keys.url_keys.insert(stored.into_string());
            }

            let ty = title_year_key(&record.title, record.meta(meta_keys::YEAR).unwrap_or(""));
            if !ty.is_empty() {
                keys.title_year_keys.insert(ty.into_string());
            }
        }
        debug!(
            url_keys = keys.url_keys.len(),
            title_year_keys = keys.title_year_keys.len(),
            "Prefetched identity keys"
        );
        Ok(keys)
    }

    fn count_enrichable(&self) -> Result<usize> {
        Ok(self.lock()?.data.records.values().filter(|r| !r.is_trashed()).count())
    }

    fn enrichable_ids(&self, offset: usize, limit: usize) -> Result<Vec<RecordId>> {
        Ok(self
            .lock()?
            .data
            .records
            .values()
            .filter(|r| !r.is_trashed())
            .skip(offset)
            .take(limit)
            .map(|r| r.id)
            .collect())
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            Self::write_file(path, &inner.data)?;
        }
        inner.dirty = false;
        Ok(())
    }
}

impl Drop for FileContentStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to save content records on shutdown: {}", e);
        }
    }
}

/// Poster handling collaborator
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Download `url` and attach it to the record; returns the attachment id
    async fn download_and_attach(&self, url: &str, record_id: RecordId) -> Result<String>;
    async fn set_as_cover_image(&self, record_id: RecordId, attachment_id: &str) -> Result<bool>;
}

const MAX_POSTER_BYTES: usize = 20 * 1024 * 1024;

/// Stores posters as files under a directory; the file name is the attachment id
pub struct LocalMediaLibrary {
    client: reqwest::Client,
    dir: PathBuf,
    store: Arc<dyn ContentStore>,
}

impl LocalMediaLibrary {
    pub fn new(dir: PathBuf, store: Arc<dyn ContentStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, dir, store })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `<record>-<hash of url>.<ext>`, extension taken from the URL path
fn poster_file_name(url: &str, record_id: RecordId) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif"))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{}-{}.{}", record_id, &digest[..12], ext)
}

#[async_trait]
impl MediaLibrary for LocalMediaLibrary {
    async fn download_and_attach(&self, url: &str, record_id: RecordId) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("poster download returned HTTP {}", response.status()));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("poster download returned an empty body"));
        }
        if bytes.len() > MAX_POSTER_BYTES {
            return Err(anyhow!("poster exceeds {} bytes", MAX_POSTER_BYTES));
        }

        let name = poster_file_name(url, record_id);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&name), &bytes).await?;
        debug!(record_id, attachment = %name, "Stored poster");
        Ok(name)
    }

    async fn set_as_cover_image(&self, record_id: RecordId, attachment_id: &str) -> Result<bool> {
        if !self.dir.join(attachment_id).exists() {
            return Ok(false);
        }
        self.store.set_cover_image(record_id, attachment_id)?;
        Ok(true)
    }
}
