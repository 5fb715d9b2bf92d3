//! Resumable batch enrichment of content records from the movie database.
//!
//! All run state lives in the persisted [`EnrichmentProgress`]; a batch step
//! reads it, processes one slice of records and writes it back, so a run can
//! continue in another process from nothing but the state store.

use crate::matching::find_best_match;
use crate::reconciler::EnrichmentTrigger;
use crate::store::ContentStore;
use crate::writer::ContentWriter;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diary_sync_config::config::clamp_batch_size;
use diary_sync_config::options::keys;
use diary_sync_config::{KvStore, KvStoreExt};
use diary_sync_models::{
    meta_keys, ContentRecord, EnrichmentProgress, EnrichmentStatus, MovieMetadata, RecordId, PROGRESS_VERSION,
    YEAR_TAXONOMY,
};
use diary_sync_sources::tmdb::api::{extract_metadata, find_by_imdb_id, movie_details, watch_providers};
use diary_sync_sources::{ApiError, ProgressTracker, TmdbClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const RUNNING_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const COMPLETE_RETENTION: Duration = Duration::from_secs(60 * 60);

const MISSING_KEY_SUMMARY: &str = "TMDB API key is not configured. Add one with `reelbook config set-api-key`.";

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    pub batch_size: usize,
    /// Records written between store flushes
    pub chunk_size: usize,
    pub region: String,
    pub min_match_score: f64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            chunk_size: 10,
            region: "US".to_string(),
            min_match_score: 60.0,
        }
    }
}

/// How a record's movie id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Stored(u64),
    ImdbLookup(u64),
    Search(u64),
}

impl Resolution {
    fn tmdb_id(self) -> u64 {
        match self {
            Resolution::Stored(id) | Resolution::ImdbLookup(id) | Resolution::Search(id) => id,
        }
    }
}

pub struct EnrichmentOrchestrator {
    store: Arc<dyn ContentStore>,
    kv: Arc<dyn KvStore>,
    client: TmdbClient,
    writer: Arc<ContentWriter>,
    settings: EnrichmentSettings,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        kv: Arc<dyn KvStore>,
        client: TmdbClient,
        writer: Arc<ContentWriter>,
        settings: EnrichmentSettings,
    ) -> Self {
        let settings = EnrichmentSettings {
            batch_size: clamp_batch_size(settings.batch_size),
            chunk_size: settings.chunk_size.max(1),
            ..settings
        };
        Self {
            store,
            kv,
            client,
            writer,
            settings,
        }
    }

    pub fn settings(&self) -> &EnrichmentSettings {
        &self.settings
    }

    /// Current persisted run state, if any
    pub fn status(&self) -> Result<Option<EnrichmentProgress>> {
        Ok(self.kv.get_json::<EnrichmentProgress>(keys::ENRICHMENT_PROGRESS)?)
    }

    /// Drop the persisted run state and legacy counters
    pub fn reset(&self) -> Result<()> {
        self.kv.delete(keys::ENRICHMENT_PROGRESS)?;
        for key in keys::LEGACY_ENRICH_COUNTERS {
            self.kv.delete(key)?;
        }
        Ok(())
    }

    fn save(&self, progress: &EnrichmentProgress) -> Result<()> {
        let ttl = if progress.is_complete() {
            COMPLETE_RETENTION
        } else {
            RUNNING_RETENTION
        };
        self.kv.set_json(keys::ENRICHMENT_PROGRESS, progress, Some(ttl))?;
        Ok(())
    }

    /// Process batch number `batch` (1-based).
    ///
    /// Batch 1, `force`, a missing or outdated record, or a finished prior
    /// run start a new run. Asking for a batch the current run has already
    /// passed returns the stored state unchanged.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, batch: usize, force: bool) -> Result<EnrichmentProgress> {
        let stored = self.status()?;

        if !self.client.has_api_key() {
            let now = Utc::now();
            let mut progress = stored.unwrap_or_else(|| {
                EnrichmentProgress::start(uuid::Uuid::new_v4().to_string(), 0, self.settings.batch_size, now)
            });
            progress.status = EnrichmentStatus::Error;
            progress.summary = MISSING_KEY_SUMMARY.to_string();
            progress.updated_at = now;
            self.save(&progress)?;
            warn!("{}", MISSING_KEY_SUMMARY);
            return Ok(progress);
        }

        let (mut progress, batch) = match stored {
            Some(progress)
                if !force
                    && batch > 1
                    && progress.version == PROGRESS_VERSION
                    && progress.status == EnrichmentStatus::Running =>
            {
                if batch < progress.batch {
                    debug!(batch, next = progress.batch, "Batch already processed");
                    return Ok(progress);
                }
                (progress, batch)
            }
            _ => (self.start_run()?, 1),
        };

        let offset = progress.offset_for(batch);
        if offset >= progress.total {
            return self.complete(progress);
        }

        let ids = self.store.enrichable_ids(offset, progress.batch_size)?;
        if ids.is_empty() {
            // Records went away since the run was counted
            debug!(batch, offset, total = progress.total, "Empty batch slice; moving on");
            progress.batch = batch + 1;
            progress.updated_at = Utc::now();
            self.save(&progress)?;
            return Ok(progress);
        }

        let mut tracker = ProgressTracker::new(format!("Enrichment batch {}", batch), ids.len(), 10);
        self.process_slice(&ids, &mut tracker).await?;
        tracker.log_summary();

        progress.processed += ids.len();
        progress.updated += tracker.updated();
        progress.failed += tracker.failed();
        progress.batch = batch + 1;
        progress.updated_at = Utc::now();
        info!(
            batch,
            processed = progress.processed,
            total = progress.total,
            percent = progress.percent().round() as u64,
            "Enrichment batch finished"
        );

        if progress.processed >= progress.total {
            return self.complete(progress);
        }
        self.save(&progress)?;
        Ok(progress)
    }

    /// Run batches until the run is no longer `running`.
    ///
    /// Resumes a stored running run unless `force`; every iteration reads
    /// the next batch number back from the state store.
    pub async fn run_to_completion(&self, force: bool) -> Result<EnrichmentProgress> {
        self.run_to_completion_with(force, |_| {}).await
    }

    /// As [`Self::run_to_completion`], reporting the state after every batch
    #[instrument(skip(self, on_batch))]
    pub async fn run_to_completion_with<F>(&self, force: bool, mut on_batch: F) -> Result<EnrichmentProgress>
    where
        F: FnMut(&EnrichmentProgress) + Send,
    {
        let resume_from = match self.status()? {
            Some(p) if !force && p.is_running() && p.version == PROGRESS_VERSION => p.batch,
            _ => 1,
        };
        if resume_from > 1 {
            info!(batch = resume_from, "Resuming enrichment run");
        }

        let mut progress = self.run_batch(resume_from, force).await?;
        on_batch(&progress);
        while progress.is_running() {
            let next = match self.status()? {
                Some(stored) if stored.is_running() => stored.batch,
                Some(stored) => return Ok(stored),
                None => {
                    warn!("Enrichment state disappeared mid-run; stopping");
                    return Ok(progress);
                }
            };
            progress = self.run_batch(next, false).await?;
            on_batch(&progress);
        }
        Ok(progress)
    }

    fn start_run(&self) -> Result<EnrichmentProgress> {
        let total = self.store.count_enrichable()?;
        let progress = EnrichmentProgress::start(
            uuid::Uuid::new_v4().to_string(),
            total,
            self.settings.batch_size,
            Utc::now(),
        );
        info!(run_id = %progress.run_id, total, batch_size = progress.batch_size, "Starting enrichment run");
        self.save(&progress)?;
        Ok(progress)
    }

    fn complete(&self, mut progress: EnrichmentProgress) -> Result<EnrichmentProgress> {
        let now = Utc::now();
        let elapsed = (now - progress.started_at).to_std().unwrap_or_default();
        progress.status = EnrichmentStatus::Complete;
        progress.updated_at = now;
        progress.summary = format!(
            "Enrichment complete in {}: {:.0}% ({}/{} records), {} updated, {} failed",
            format_duration(elapsed),
            progress.percent(),
            progress.processed,
            progress.total,
            progress.updated,
            progress.failed
        );
        self.save(&progress)?;
        for key in keys::LEGACY_ENRICH_COUNTERS {
            self.kv.delete(key)?;
        }
        info!(run_id = %progress.run_id, "{}", progress.summary);
        Ok(progress)
    }

    /// Resolve ids one by one, then fetch details one record at a time,
    /// flushing the store after every chunk
    async fn process_slice(&self, ids: &[RecordId], tracker: &mut ProgressTracker) -> Result<()> {
        let mut resolved: Vec<(ContentRecord, Resolution)> = Vec::new();
        for (index, &id) in ids.iter().enumerate() {
            let Some(record) = self.store.get(id)? else {
                tracker.record_failed("missing");
                continue;
            };
            match self.resolve(&record).await {
                Ok(Some(resolution)) => resolved.push((record, resolution)),
                Ok(None) => {
                    debug!(record_id = id, title = %record.title, "No movie match");
                    tracker.record_failed("no match");
                }
                Err(e) => {
                    warn!(record_id = id, title = %record.title, error = %e, "Movie id lookup failed");
                    tracker.record_failed(api_failure_kind(&e));
                }
            }
            tracker.log_progress(index + 1);
        }

        for chunk in resolved.chunks(self.settings.chunk_size) {
            for (record, resolution) in chunk {
                match self.fetch_metadata(resolution.tmdb_id()).await {
                    Ok(metadata) => {
                        self.write_metadata(record, &metadata).await?;
                        debug!(record_id = record.id, ?resolution, "Enriched record");
                        tracker.record_updated();
                    }
                    Err(e) => {
                        warn!(record_id = record.id, error = %e, "Fetching movie details failed");
                        tracker.record_failed(api_failure_kind(&e));
                    }
                }
            }
            self.store.flush()?;
        }
        Ok(())
    }

    /// Stored movie id, then IMDb id lookup, then title/year search
    async fn resolve(&self, record: &ContentRecord) -> Result<Option<Resolution>, ApiError> {
        if let Some(id) = record.meta(meta_keys::TMDB_ID).and_then(|v| v.trim().parse::<u64>().ok()) {
            return Ok(Some(Resolution::Stored(id)));
        }
        if let Some(imdb_id) = record.meta(meta_keys::IMDB_ID) {
            if let Some(id) = find_by_imdb_id(&self.client, imdb_id).await? {
                return Ok(Some(Resolution::ImdbLookup(id)));
            }
        }
        let year = record.meta(meta_keys::YEAR).and_then(|y| y.parse::<u32>().ok());
        let found = find_best_match(&self.client, &record.title, year, self.settings.min_match_score).await?;
        Ok(found.map(|m| Resolution::Search(m.tmdb_id)))
    }

    async fn fetch_metadata(&self, tmdb_id: u64) -> Result<MovieMetadata, ApiError> {
        let details = movie_details(&self.client, tmdb_id).await?;
        // Streaming availability is optional
        let providers = match watch_providers(&self.client, tmdb_id).await {
            Ok(providers) => Some(providers),
            Err(e) => {
                debug!(tmdb_id, error = %e, "No watch providers");
                None
            }
        };
        Ok(extract_metadata(&details, providers.as_ref(), &self.settings.region))
    }

    async fn write_metadata(&self, record: &ContentRecord, metadata: &MovieMetadata) -> Result<()> {
        let mut meta = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                meta.insert(key.to_string(), value);
            }
        };
        put(meta_keys::TMDB_ID, Some(metadata.tmdb_id.to_string()).filter(|_| metadata.tmdb_id > 0));
        put(meta_keys::DIRECTOR, Some(metadata.directors.join(", ")));
        put(meta_keys::IMDB_ID, metadata.imdb_id.clone());
        put(meta_keys::OVERVIEW, metadata.overview.clone());
        put(meta_keys::GENRES, Some(metadata.genres.join(", ")));
        put(
            meta_keys::STREAMING_PROVIDERS,
            Some(serde_json::to_string(&metadata.streaming_providers)?),
        );
        put(meta_keys::STREAMING_LINK, metadata.streaming_link.clone());
        put(meta_keys::LAST_SYNC, Some(Utc::now().to_rfc3339()));
        if record.meta(meta_keys::POSTER_URL).is_none() {
            put(meta_keys::POSTER_URL, metadata.poster_url.clone());
        }
        let missing_year = record.meta(meta_keys::YEAR).is_none();
        if missing_year {
            put(meta_keys::YEAR, metadata.year.map(|y| y.to_string()));
        }
        self.store.set_metadata(record.id, &meta)?;

        if missing_year {
            if let Some(year) = metadata.year {
                self.store.set_taxonomy_term(record.id, YEAR_TAXONOMY, &year.to_string())?;
            }
        }

        let poster = record
            .meta(meta_keys::POSTER_URL)
            .map(str::to_string)
            .or_else(|| metadata.poster_url.clone());
        self.writer.sideload_poster(record.id, poster.as_deref()).await;
        Ok(())
    }

    /// Enrich one record outside a batch run. `Ok(false)` when no movie
    /// could be resolved or no API key is configured.
    pub async fn enrich_record(&self, id: RecordId) -> Result<bool> {
        if !self.client.has_api_key() {
            debug!(record_id = id, "Skipping enrichment: no API key");
            return Ok(false);
        }
        let Some(record) = self.store.get(id)? else {
            return Ok(false);
        };
        let Some(resolution) = self.resolve(&record).await? else {
            return Ok(false);
        };
        let metadata = self.fetch_metadata(resolution.tmdb_id()).await?;
        self.write_metadata(&record, &metadata).await?;
        Ok(true)
    }
}

#[async_trait]
impl EnrichmentTrigger for EnrichmentOrchestrator {
    async fn enrich_created(&self, record_id: RecordId) -> Result<()> {
        self.enrich_record(record_id).await.map(|_| ())
    }
}

fn api_failure_kind(error: &ApiError) -> &'static str {
    match error {
        ApiError::RateLimitExceeded { .. } => "rate limit",
        ApiError::Provider { status: 404, .. } => "not found",
        ApiError::Provider { .. } => "provider",
        _ => "request",
    }
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileContentStore;
    use crate::test_support::{RecordingMedia, RoutedTransport};
    use diary_sync_config::MemoryKvStore;
    use diary_sync_models::{NewRecord, RecordStatus, RecordUpdate};
    use diary_sync_sources::{SystemClock, TmdbClientConfig};
    use serde_json::json;

    struct Fixture {
        store: Arc<FileContentStore>,
        kv: Arc<MemoryKvStore>,
        transport: Arc<RoutedTransport>,
        media: Arc<RecordingMedia>,
    }

    impl Fixture {
        fn new(transport: RoutedTransport) -> Self {
            let store = Arc::new(FileContentStore::in_memory());
            Self {
                media: Arc::new(RecordingMedia::new(store.clone())),
                store,
                kv: Arc::new(MemoryKvStore::new()),
                transport: Arc::new(transport),
            }
        }

        fn add_film(&self, title: &str, year: &str, tmdb_id: Option<u64>) -> RecordId {
            let id = self
                .store
                .create(NewRecord {
                    title: title.to_string(),
                    status: RecordStatus::Published,
                    content: String::new(),
                    date: None,
                })
                .unwrap();
            let mut meta = BTreeMap::new();
            meta.insert(meta_keys::YEAR.to_string(), year.to_string());
            if let Some(tmdb_id) = tmdb_id {
                meta.insert(meta_keys::TMDB_ID.to_string(), tmdb_id.to_string());
            }
            self.store.set_metadata(id, &meta).unwrap();
            id
        }

        fn orchestrator(&self, api_key: Option<&str>, batch_size: usize) -> EnrichmentOrchestrator {
            let client = TmdbClient::new(
                TmdbClientConfig::default(),
                api_key.map(str::to_string),
                self.transport.clone(),
                self.kv.clone(),
                Arc::new(SystemClock),
            );
            let writer = Arc::new(ContentWriter::new(self.store.clone(), Some(self.media.clone())));
            EnrichmentOrchestrator::new(
                self.store.clone(),
                self.kv.clone(),
                client,
                writer,
                EnrichmentSettings {
                    batch_size,
                    chunk_size: 2,
                    ..EnrichmentSettings::default()
                },
            )
        }
    }

    fn movie(id: u64, title: &str, year: u32) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "release_date": format!("{}-06-01", year),
            "overview": format!("{} overview", title),
            "poster_path": format!("/{}.jpg", id),
            "genres": [{"name": "Crime"}],
            "credits": {"crew": [{"job": "Director", "name": "Michael Mann"}]},
            "external_ids": {"imdb_id": format!("tt{:07}", id)}
        })
    }

    /// Details for ids 1..=n plus US providers for id 1
    fn catalogue(n: u64) -> RoutedTransport {
        let mut transport = RoutedTransport::new().route(
            "movie/1/watch/providers",
            json!({"results": {"US": {"link": "https://tmdb.example/1", "flatrate": [{"provider_name": "Max"}]}}}),
        );
        for id in 1..=n {
            transport = transport.route(&format!("movie/{}?", id), movie(id, &format!("Film {}", id), 2000));
        }
        transport
    }

    #[tokio::test]
    async fn test_missing_api_key_sets_error_without_consuming_batch() {
        let fixture = Fixture::new(catalogue(1));
        fixture.add_film("Film 1", "2000", Some(1));

        let progress = fixture.orchestrator(None, 5).run_batch(1, false).await.unwrap();
        assert_eq!(progress.status, EnrichmentStatus::Error);
        assert_eq!(progress.batch, 1);
        assert!(progress.summary.contains("API key"));
        assert_eq!(fixture.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_batches_are_resumable_until_complete() {
        let fixture = Fixture::new(catalogue(12));
        for id in 1..=12 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }

        // A fresh orchestrator per step: nothing survives in memory
        let first = fixture.orchestrator(Some("key"), 5).run_batch(1, false).await.unwrap();
        assert!(first.is_running());
        assert_eq!(first.processed, 5);
        assert_eq!(first.batch, 2);

        let second = fixture.orchestrator(Some("key"), 5).run_batch(2, false).await.unwrap();
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.processed, 10);

        let third = fixture.orchestrator(Some("key"), 5).run_batch(3, false).await.unwrap();
        assert!(third.is_complete());
        assert_eq!(third.processed, third.total);
        assert_eq!(third.updated, 12);
        assert!(third.summary.contains("100%"));

        let record = fixture.store.get(1).unwrap().unwrap();
        assert_eq!(record.meta(meta_keys::DIRECTOR), Some("Michael Mann"));
        assert_eq!(record.meta(meta_keys::IMDB_ID), Some("tt0000001"));
        assert_eq!(record.meta(meta_keys::GENRES), Some("Crime"));
        assert_eq!(record.meta(meta_keys::STREAMING_LINK), Some("https://tmdb.example/1"));
        assert!(record.meta(meta_keys::STREAMING_PROVIDERS).unwrap_or_default().contains("Max"));
        assert!(record.cover_image.is_some());
    }

    #[tokio::test]
    async fn test_repeated_batch_number_is_not_double_counted() {
        let fixture = Fixture::new(catalogue(12));
        for id in 1..=12 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }
        let orchestrator = fixture.orchestrator(Some("key"), 5);
        orchestrator.run_batch(1, false).await.unwrap();
        orchestrator.run_batch(2, false).await.unwrap();
        let again = orchestrator.run_batch(2, false).await.unwrap();
        assert_eq!(again.processed, 10);
        assert_eq!(again.batch, 3);
    }

    #[tokio::test]
    async fn test_run_to_completion_and_legacy_counters() {
        let fixture = Fixture::new(catalogue(7));
        for id in 1..=7 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }
        for key in keys::LEGACY_ENRICH_COUNTERS {
            fixture.kv.set(key, "3".to_string(), None).unwrap();
        }

        let progress = fixture.orchestrator(Some("key"), 5).run_to_completion(false).await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.processed, 7);
        for key in keys::LEGACY_ENRICH_COUNTERS {
            assert!(fixture.kv.get(key).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_run_to_completion_resumes_stored_run() {
        let fixture = Fixture::new(catalogue(12));
        for id in 1..=12 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }
        let first = fixture.orchestrator(Some("key"), 5).run_batch(1, false).await.unwrap();
        let done = fixture.orchestrator(Some("key"), 5).run_to_completion(false).await.unwrap();
        assert_eq!(done.run_id, first.run_id);
        assert_eq!(done.processed, 12);
        // Each movie's details fetched exactly once
        assert_eq!(fixture.transport.requests_matching("movie/3?"), 1);
    }

    #[tokio::test]
    async fn test_records_trashed_mid_run_skip_forward() {
        let fixture = Fixture::new(catalogue(10));
        for id in 1..=10 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }
        let orchestrator = fixture.orchestrator(Some("key"), 5);
        orchestrator.run_batch(1, false).await.unwrap();
        for id in 1..=10 {
            fixture
                .store
                .update(
                    id,
                    RecordUpdate {
                        status: Some(RecordStatus::Trash),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let skipped = orchestrator.run_batch(2, false).await.unwrap();
        assert!(skipped.is_running());
        assert_eq!(skipped.batch, 3);
        let done = orchestrator.run_batch(3, false).await.unwrap();
        assert!(done.is_complete());
    }

    #[tokio::test]
    async fn test_resolution_by_imdb_id_and_search() {
        let transport = catalogue(2)
            .route("find/tt0113277", json!({"movie_results": [{"id": 1}]}))
            .route(
                "search/movie",
                json!({"results": [{"id": 2, "title": "Thief", "release_date": "1981-03-27", "popularity": 9.0}]}),
            );
        let fixture = Fixture::new(transport);
        let by_imdb = fixture.add_film("Heat", "1995", None);
        let mut meta = BTreeMap::new();
        meta.insert(meta_keys::IMDB_ID.to_string(), "tt0113277".to_string());
        fixture.store.set_metadata(by_imdb, &meta).unwrap();
        let by_search = fixture.add_film("Thief", "1981", None);

        let orchestrator = fixture.orchestrator(Some("key"), 5);
        assert!(orchestrator.enrich_record(by_imdb).await.unwrap());
        assert!(orchestrator.enrich_record(by_search).await.unwrap());

        assert_eq!(fixture.store.get(by_imdb).unwrap().unwrap().meta(meta_keys::TMDB_ID), Some("1"));
        assert_eq!(fixture.store.get(by_search).unwrap().unwrap().meta(meta_keys::TMDB_ID), Some("2"));
    }

    #[tokio::test]
    async fn test_unmatched_records_count_as_failed() {
        let transport = RoutedTransport::new().route("search/movie", json!({"results": []}));
        let fixture = Fixture::new(transport);
        fixture.add_film("Nothing Like It", "1990", None);

        let progress = fixture.orchestrator(Some("key"), 5).run_batch(1, false).await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.updated, 0);
    }

    #[tokio::test]
    async fn test_force_starts_a_new_run() {
        let fixture = Fixture::new(catalogue(6));
        for id in 1..=6 {
            fixture.add_film(&format!("Film {}", id), "2000", Some(id));
        }
        let first = fixture.orchestrator(Some("key"), 5).run_batch(1, false).await.unwrap();
        let forced = fixture.orchestrator(Some("key"), 5).run_batch(2, true).await.unwrap();
        assert_ne!(forced.run_id, first.run_id);
        assert_eq!(forced.processed, 5);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 2m");
    }
}
