use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

/// Main settings: whose diary to import and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_url_template")]
    pub url_template: String,
    /// Entries watched before this date are not imported
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub import_as_draft: bool,
    #[serde(default = "default_feed_cache_minutes")]
    pub cache_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Region used for watch-provider lookups (ISO 3166-1)
    #[serde(default = "default_region")]
    pub region: String,
    /// Minimum fuzzy-search score before a candidate is attached
    #[serde(default = "default_min_match_score")]
    pub min_match_score: f64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_details_cache_days")]
    pub details_cache_days: u64,
    #[serde(default = "default_providers_cache_hours")]
    pub providers_cache_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Detail fetches are grouped into chunks of this size within a batch
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Enrich newly created records right after import
    #[serde(default = "default_true")]
    pub enrich_on_import: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

/// Auto-import schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
    #[serde(default = "default_true")]
    pub enrich_after_import: bool,
}

fn default_true() -> bool {
    true
}

fn default_url_template() -> String {
    "https://letterboxd.com/{username}/rss/".to_string()
}

fn default_feed_cache_minutes() -> u64 {
    10
}

fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_region() -> String {
    "US".to_string()
}

fn default_min_match_score() -> f64 {
    60.0
}

fn default_max_requests() -> u32 {
    40
}

fn default_period_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_details_cache_days() -> u64 {
    7
}

fn default_providers_cache_hours() -> u64 {
    12
}

fn default_batch_size() -> usize {
    20
}

fn default_chunk_size() -> usize {
    10
}

fn default_lock_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_schedule() -> String {
    // tokio-cron-scheduler expressions carry a seconds field
    "0 0 */6 * * *".to_string()
}

pub fn default_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: false,
        schedule: default_schedule(),
        run_on_startup: default_true(),
        enrich_after_import: default_true(),
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            url_template: default_url_template(),
            start_date: None,
            import_as_draft: false,
            cache_minutes: default_feed_cache_minutes(),
        }
    }
}

impl FeedConfig {
    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }

    pub fn feed_url(&self) -> String {
        self.url_template.replace("{username}", self.username.trim())
    }
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            region: default_region(),
            min_match_score: default_min_match_score(),
            max_requests: default_max_requests(),
            period_secs: default_period_secs(),
            max_retries: default_max_retries(),
            details_cache_days: default_details_cache_days(),
            providers_cache_hours: default_providers_cache_hours(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            enrich_on_import: default_true(),
        }
    }
}

impl EnrichmentConfig {
    pub fn clamped_batch_size(&self) -> usize {
        clamp_batch_size(self.batch_size)
    }
}

pub fn clamp_batch_size(batch_size: usize) -> usize {
    batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Missing file yields the defaults
    pub fn load_or_default(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.feed.url_template.contains("{username}") {
            return Err(anyhow::anyhow!("feed.url_template must contain {{username}}"));
        }
        if self.tmdb.max_requests == 0 {
            return Err(anyhow::anyhow!("tmdb.max_requests must be at least 1"));
        }
        if self.tmdb.period_secs == 0 {
            return Err(anyhow::anyhow!("tmdb.period_secs must be at least 1"));
        }
        if !(0.0..=200.0).contains(&self.tmdb.min_match_score) {
            return Err(anyhow::anyhow!("tmdb.min_match_score must be between 0 and 200"));
        }
        if self.tmdb.region.len() != 2 {
            return Err(anyhow::anyhow!("tmdb.region must be a two-letter country code"));
        }
        if self.enrichment.chunk_size == 0 {
            return Err(anyhow::anyhow!("enrichment.chunk_size must be at least 1"));
        }
        if self.import.lock_ttl_secs == 0 {
            return Err(anyhow::anyhow!("import.lock_ttl_secs must be at least 1"));
        }
        Ok(())
    }
}
