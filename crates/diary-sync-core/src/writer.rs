use crate::content::{parse_title, parse_watch_date, source_hash, split_review};
use crate::identity::normalize;
use crate::store::{ContentStore, MediaLibrary};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use diary_sync_models::{meta_keys, IdentityKey, NewRecord, RawItem, RecordId, RecordStatus, YEAR_TAXONOMY};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-run import choices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub as_draft: bool,
}

/// A raw item interpreted into the fields that get persisted
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedItem {
    pub title: String,
    pub year: String,
    pub rating: String,
    pub link: String,
    pub identity_key: IdentityKey,
    pub watch_date: NaiveDate,
    pub body: String,
    pub image_urls: Vec<String>,
    pub poster_url: Option<String>,
    pub tmdb_id: String,
    pub status: RecordStatus,
    pub source_hash: String,
}

impl PreparedItem {
    pub fn new_record(&self) -> NewRecord {
        NewRecord {
            title: self.title.clone(),
            status: self.status,
            content: self.body.clone(),
            date: Some(self.watch_date),
        }
    }

    /// Metadata written on every import of this item. Rating is always
    /// written so a cleared rating clears the stored one.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            if !value.is_empty() {
                meta.insert(key.to_string(), value.to_string());
            }
        };
        put(meta_keys::LETTERBOXD_URL, &self.link);
        put(meta_keys::IDENTITY_KEY, self.identity_key.as_str());
        put(meta_keys::WATCH_DATE, &self.watch_date.format("%Y-%m-%d").to_string());
        put(meta_keys::POSTER_URL, self.poster_url.as_deref().unwrap_or(""));
        put(meta_keys::YEAR, &self.year);
        put(meta_keys::TMDB_ID, &self.tmdb_id);
        put(meta_keys::SOURCE_HASH, &self.source_hash);
        meta.insert(meta_keys::RATING.to_string(), self.rating.clone());
        meta
    }
}

/// Turns raw items into content records
pub struct ContentWriter {
    store: Arc<dyn ContentStore>,
    media: Option<Arc<dyn MediaLibrary>>,
}

impl ContentWriter {
    pub fn new(store: Arc<dyn ContentStore>, media: Option<Arc<dyn MediaLibrary>>) -> Self {
        Self { store, media }
    }

    /// Interpret `raw`. Fails only when the date cannot be parsed.
    pub fn prepare(&self, raw: &RawItem, options: &ImportOptions) -> Result<PreparedItem> {
        let parsed = parse_title(&raw.title, &raw.film_year, &raw.rating);
        let watch_date = parse_watch_date(&raw.pub_date)
            .ok_or_else(|| anyhow!("unparseable date '{}' for '{}'", raw.pub_date, parsed.title))?;

        let blocks = split_review(&raw.description);
        let body = blocks.body();
        let poster_url = raw
            .poster_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| blocks.first_image().map(str::to_string));
        let link = raw.link.trim().to_string();

        Ok(PreparedItem {
            identity_key: normalize(&link, &parsed.title, &parsed.year),
            source_hash: source_hash(&body),
            title: parsed.title,
            year: parsed.year,
            rating: parsed.rating,
            link,
            watch_date,
            body,
            image_urls: blocks.image_urls,
            poster_url,
            tmdb_id: raw.external_movie_id.trim().to_string(),
            status: RecordStatus::for_import(options.as_draft),
        })
    }

    /// Create the record, then metadata, year term and poster
    pub async fn write(&self, item: &PreparedItem) -> Result<RecordId> {
        let id = self.store.create(item.new_record())?;
        self.apply_metadata(id, item)?;
        self.sideload_poster(id, item.poster_url.as_deref()).await;
        debug!(record_id = id, title = %item.title, key = %item.identity_key, "Created record");
        Ok(id)
    }

    pub fn apply_metadata(&self, id: RecordId, item: &PreparedItem) -> Result<()> {
        self.store.set_metadata(id, &item.metadata())?;
        if !item.year.is_empty() {
            self.store.set_taxonomy_term(id, YEAR_TAXONOMY, &item.year)?;
        }
        Ok(())
    }

    /// Download the poster and make it the cover image when the record has
    /// none yet. Best effort: failures are logged and reported as `false`.
    pub async fn sideload_poster(&self, id: RecordId, poster_url: Option<&str>) -> bool {
        let (Some(media), Some(url)) = (&self.media, poster_url.filter(|u| !u.is_empty())) else {
            return false;
        };
        match self.store.get(id) {
            Ok(Some(record)) if record.cover_image.is_none() => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(record_id = id, error = %e, "Could not load record for poster sideload");
                return false;
            }
        }

        let attachment = match media.download_and_attach(url, id).await {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!(record_id = id, url = %url, error = %e, "Poster download failed");
                return false;
            }
        };
        match media.set_as_cover_image(id, &attachment).await {
            Ok(set) => set,
            Err(e) => {
                warn!(record_id = id, attachment = %attachment, error = %e, "Could not set cover image");
                false
            }
        }
    }
}
