use crate::enrichment::EnrichmentSettings;
use crate::writer::ImportOptions;
use chrono::NaiveDate;
use diary_sync_config::config::clamp_batch_size;
use diary_sync_config::{Config, CredentialStore};
use diary_sync_sources::TmdbClientConfig;
use std::time::Duration;

/// Everything one import or enrichment run reads from configuration,
/// resolved once up front and passed down explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub username: String,
    pub feed_url: String,
    pub as_draft: bool,
    pub start_date: Option<NaiveDate>,
    pub api_key: Option<String>,
    pub session_id: Option<String>,
    pub region: String,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub min_match_score: f64,
    pub enrich_on_import: bool,
    pub lock_ttl: Duration,
    /// Zero disables the feed cache
    pub feed_cache_ttl: Duration,
    pub tmdb: TmdbClientConfig,
}

impl RunContext {
    pub fn from_config(config: &Config, credentials: &CredentialStore) -> Self {
        Self::from_parts(
            config,
            credentials.get_tmdb_api_key(),
            credentials.get_tmdb_session_id().cloned(),
        )
    }

    fn from_parts(config: &Config, api_key: Option<String>, session_id: Option<String>) -> Self {
        Self {
            username: config.feed.username.trim().to_string(),
            feed_url: config.feed.feed_url(),
            as_draft: config.feed.import_as_draft,
            start_date: config.feed.start_date,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            session_id,
            region: config.tmdb.region.clone(),
            batch_size: config.enrichment.clamped_batch_size(),
            chunk_size: config.enrichment.chunk_size.max(1),
            min_match_score: config.tmdb.min_match_score,
            enrich_on_import: config.enrichment.enrich_on_import,
            lock_ttl: Duration::from_secs(config.import.lock_ttl_secs),
            feed_cache_ttl: Duration::from_secs(config.feed.cache_minutes * 60),
            tmdb: TmdbClientConfig::from(&config.tmdb),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            as_draft: self.as_draft,
        }
    }

    pub fn enrichment_settings(&self) -> EnrichmentSettings {
        EnrichmentSettings {
            batch_size: self.batch_size,
            chunk_size: self.chunk_size,
            region: self.region.clone(),
            min_match_score: self.min_match_score,
        }
    }

    /// Command-line override of the draft setting
    pub fn with_draft(mut self, as_draft: bool) -> Self {
        self.as_draft = self.as_draft || as_draft;
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        if let Some(size) = batch_size {
            self.batch_size = clamp_batch_size(size);
        }
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::from_parts(&Config::default(), None, None)
    }
}
