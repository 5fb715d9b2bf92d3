use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RecordId = u64;

/// Taxonomy every film record is tagged with (one term: the film year)
pub const YEAR_TAXONOMY: &str = "film_year";

/// Metadata field names stored on a content record
pub mod meta_keys {
    pub const LETTERBOXD_URL: &str = "letterboxd_url";
    pub const IDENTITY_KEY: &str = "identity_key";
    pub const WATCH_DATE: &str = "watch_date";
    pub const POSTER_URL: &str = "poster_url";
    pub const RATING: &str = "rating";
    pub const YEAR: &str = "year";
    pub const TMDB_ID: &str = "tmdb_id";
    /// SHA-256 of the body as last rendered from the source
    pub const SOURCE_HASH: &str = "source_hash";

    // Written by enrichment
    pub const DIRECTOR: &str = "director";
    pub const IMDB_ID: &str = "imdb_id";
    pub const OVERVIEW: &str = "overview";
    pub const GENRES: &str = "genres";
    pub const STREAMING_PROVIDERS: &str = "streaming_providers";
    pub const STREAMING_LINK: &str = "streaming_link";
    pub const LAST_SYNC: &str = "last_sync";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Published,
    Trash,
}

impl RecordStatus {
    pub fn for_import(as_draft: bool) -> Self {
        if as_draft {
            RecordStatus::Draft
        } else {
            RecordStatus::Published
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Published => "published",
            RecordStatus::Trash => "trash",
        }
    }
}

/// One persisted film-watch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRecord {
    pub id: RecordId,
    pub title: String,
    pub status: RecordStatus,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub terms: BTreeMap<String, String>, // taxonomy -> term
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

impl ContentRecord {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_trashed(&self) -> bool {
        self.status == RecordStatus::Trash
    }

    pub fn source_url(&self) -> Option<&str> {
        self.meta(meta_keys::LETTERBOXD_URL)
    }
}

/// Fields needed to create a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub title: String,
    pub status: RecordStatus,
    pub content: String,
    pub date: Option<NaiveDate>,
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub status: Option<RecordStatus>,
    pub content: Option<String>,
    pub date: Option<NaiveDate>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.status.is_none() && self.content.is_none() && self.date.is_none()
    }
}
