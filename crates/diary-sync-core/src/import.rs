use crate::content::parse_watch_date;
use crate::context::RunContext;
use crate::csv_import::CsvImporter;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ContentStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diary_sync_config::options::keys;
use diary_sync_config::{KvStore, OptionStore, StoreError};
use diary_sync_models::{ImportLogEntry, ImportSource, ImportSummary};
use diary_sync_sources::{parse_feed, FeedFetcher, FetchError, ProgressTracker};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const FLUSH_EVERY: usize = 25;

/// Where feed documents come from
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        FeedFetcher::fetch(self, url).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedImportOptions {
    /// Ignore a cached copy of the feed
    pub force_refresh: bool,
}

/// Held for the duration of an import; released on drop
struct ImportLock {
    kv: Arc<dyn KvStore>,
}

impl ImportLock {
    fn acquire(kv: &Arc<dyn KvStore>, ttl: Duration) -> Result<Option<Self>, StoreError> {
        let acquired = kv.add(keys::IMPORT_LOCK, Utc::now().to_rfc3339(), Some(ttl))?;
        Ok(acquired.then(|| Self { kv: kv.clone() }))
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        match self.kv.delete(keys::IMPORT_LOCK) {
            Ok(()) => debug!("Released import lock"),
            Err(e) => warn!(error = %e, "Failed to release import lock; it expires on its own"),
        }
    }
}

/// Top-level import coordinator for the feed and for CSV exports
pub struct ImportOrchestrator {
    kv: Arc<dyn KvStore>,
    options: OptionStore,
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn ContentStore>,
    reconciler: Arc<Reconciler>,
    csv: CsvImporter,
}

impl ImportOrchestrator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn ContentStore>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            options: OptionStore::new(kv.clone()),
            csv: CsvImporter::new(store.clone(), reconciler.clone()),
            kv,
            feed,
            store,
            reconciler,
        }
    }

    /// Import the diary feed. Never fails: problems are reported in the summary.
    #[instrument(skip(self, ctx), fields(username = %ctx.username))]
    pub async fn run_feed_import(&self, ctx: &RunContext, opts: FeedImportOptions) -> ImportSummary {
        if ctx.username.trim().is_empty() {
            let summary = ImportSummary::error(
                ImportSource::Feed,
                "No diary username configured. Set one with `reelbook config set-username <name>`.",
            );
            self.record(&summary);
            return summary;
        }

        let lock = match ImportLock::acquire(&self.kv, ctx.lock_ttl) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                info!("Another import holds the lock; skipping");
                return ImportSummary::locked(ImportSource::Feed);
            }
            Err(e) => {
                let summary = ImportSummary::error(ImportSource::Feed, format!("Could not acquire import lock: {}", e));
                self.record(&summary);
                return summary;
            }
        };

        if let Err(e) = self.options.set_last_check(Utc::now()) {
            warn!(error = %e, "Could not record last check time");
        }

        let summary = match self.import_feed(ctx, opts).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Feed import failed");
                ImportSummary::error(ImportSource::Feed, format!("Feed import failed: {:#}", e))
            }
        };
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "Could not save content records");
        }
        self.record(&summary);
        drop(lock);
        summary
    }

    /// Import a CSV or ZIP export. Never fails: problems are reported in the summary.
    #[instrument(skip(self, ctx, path), fields(path = %path.display()))]
    pub async fn run_csv_import(&self, ctx: &RunContext, path: &Path) -> ImportSummary {
        let lock = match ImportLock::acquire(&self.kv, ctx.lock_ttl) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                info!("Another import holds the lock; skipping");
                return ImportSummary::locked(ImportSource::Csv);
            }
            Err(e) => {
                let summary = ImportSummary::error(ImportSource::Csv, format!("Could not acquire import lock: {}", e));
                self.record(&summary);
                return summary;
            }
        };

        let summary = match self.csv.import_file(path, &ctx.import_options()).await {
            Ok(report) => {
                let mut summary = ImportSummary::empty(ImportSource::Csv);
                summary.imported = report.imported;
                summary.updated = report.updated;
                summary.skipped_existing = report.skipped_existing;
                summary.skipped_duplicates = report.skipped_duplicates;
                summary.skipped_invalid = report.skipped_invalid;
                summary.failed = report.failed;
                summary.message = format!(
                    "Imported {} new films from the export; skipped {} already imported, {} duplicates and {} invalid rows{}.",
                    report.imported,
                    report.skipped_existing,
                    report.skipped_duplicates,
                    report.skipped_invalid,
                    failed_suffix(report.failed)
                );
                summary
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "CSV import failed");
                ImportSummary::error(ImportSource::Csv, format!("CSV import failed: {:#}", e))
            }
        };
        self.record(&summary);
        drop(lock);
        summary
    }

    async fn import_feed(&self, ctx: &RunContext, opts: FeedImportOptions) -> Result<ImportSummary> {
        let bytes = self.load_feed(&ctx.feed_url, ctx.feed_cache_ttl, opts.force_refresh).await?;
        let items = parse_feed(&bytes).context("could not parse the diary feed")?;
        let import_options = ctx.import_options();

        let mut summary = ImportSummary::empty(ImportSource::Feed);
        let mut progress = ProgressTracker::new("Feed import", items.len(), 25);

        for (index, item) in items.iter().enumerate() {
            if let Some(start) = ctx.start_date {
                if parse_watch_date(&item.pub_date).map(|d| d < start).unwrap_or(false) {
                    debug!(title = %item.title, "Before the configured start date; skipping");
                    summary.skipped_filtered += 1;
                    progress.record_skipped();
                    progress.log_progress(index + 1);
                    continue;
                }
            }

            match self.reconciler.reconcile_item(item, &import_options).await {
                Ok(ReconcileOutcome::Created(_)) => {
                    summary.imported += 1;
                    progress.record_created();
                }
                Ok(ReconcileOutcome::Updated(_)) => {
                    summary.updated += 1;
                    progress.record_updated();
                }
                Ok(ReconcileOutcome::Unchanged(_)) => {
                    summary.skipped_existing += 1;
                    progress.record_skipped();
                }
                Err(e) => {
                    warn!(title = %item.title, error = %format!("{:#}", e), "Failed to import feed item");
                    summary.failed += 1;
                    progress.record_failed("item");
                }
            }

            if (index + 1) % FLUSH_EVERY == 0 {
                self.store.flush()?;
            }
            progress.log_progress(index + 1);
        }
        progress.log_summary();

        summary.message = if items.is_empty() {
            "The feed has no diary entries.".to_string()
        } else {
            format!(
                "Imported {} new films, updated {}, {} unchanged{}.",
                summary.imported,
                summary.updated,
                summary.skipped_existing,
                failed_suffix(summary.failed)
            )
        };
        Ok(summary)
    }

    /// Feed bytes, from the state-store cache when fresh
    async fn load_feed(&self, url: &str, cache_ttl: Duration, force_refresh: bool) -> Result<Vec<u8>> {
        let cache_key = format!("{}{}", keys::FEED_CACHE_PREFIX, url);
        if !force_refresh && !cache_ttl.is_zero() {
            if let Some(cached) = self.kv.get(&cache_key)? {
                debug!(url = %url, "Using cached feed");
                return Ok(cached.into_bytes());
            }
        }

        info!(url = %url, "Fetching diary feed");
        let bytes = self
            .feed
            .fetch(url)
            .await
            .with_context(|| format!("could not fetch {}", url))?;

        if !cache_ttl.is_zero() {
            match std::str::from_utf8(&bytes) {
                Ok(text) => self.kv.set(&cache_key, text.to_string(), Some(cache_ttl))?,
                Err(_) => debug!("Feed is not UTF-8; not caching"),
            }
        }
        Ok(bytes)
    }

    /// Timestamps and the rolling log; bookkeeping failures are only logged
    fn record(&self, summary: &ImportSummary) {
        let now = Utc::now();
        if summary.is_success() {
            if let Err(e) = self.options.set_last_import(now) {
                warn!(error = %e, "Could not record last import time");
            }
        }
        if let Err(e) = self.options.append_import_log(ImportLogEntry::from_summary(summary, now)) {
            warn!(error = %e, "Could not append to the import log");
        }
    }
}

fn failed_suffix(failed: usize) -> String {
    if failed == 0 {
        String::new()
    } else {
        format!(", {} failed", failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileContentStore;
    use crate::test_support::{feed_xml, FeedEntry, StaticFeed};
    use crate::writer::ContentWriter;
    use chrono::NaiveDate;
    use diary_sync_config::MemoryKvStore;
    use diary_sync_models::ImportStatus;
    use tempfile::TempDir;

    const HEAT: FeedEntry<'static> = FeedEntry {
        title: "Heat, 1995 - ★★★★",
        link: "https://letterboxd.com/someone/film/heat-1995/",
        pub_date: "Sat, 4 Jan 2025 21:10:00 +0000",
        review: "<p>Diner scene.</p>",
        film_year: "1995",
        movie_id: Some("949"),
    };
    const THIEF: FeedEntry<'static> = FeedEntry {
        title: "Thief, 1981 - ★★★★½",
        link: "https://letterboxd.com/someone/film/thief/",
        pub_date: "Fri, 3 Jan 2025 20:00:00 +0000",
        review: "",
        film_year: "1981",
        movie_id: Some("11524"),
    };
    const LIST_ENTRY: FeedEntry<'static> = FeedEntry {
        title: "Heists I love",
        link: "https://letterboxd.com/someone/list/heists/",
        pub_date: "Thu, 2 Jan 2025 10:00:00 +0000",
        review: "",
        film_year: "",
        movie_id: None,
    };

    struct Fixture {
        kv: Arc<MemoryKvStore>,
        store: Arc<FileContentStore>,
        feed: Arc<StaticFeed>,
        orchestrator: ImportOrchestrator,
    }

    fn fixture(entries: &[FeedEntry<'_>]) -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let store = Arc::new(FileContentStore::in_memory());
        let feed = Arc::new(StaticFeed::new(feed_xml(entries)));
        let writer = Arc::new(ContentWriter::new(store.clone(), None));
        let reconciler = Arc::new(Reconciler::new(store.clone(), writer));
        let orchestrator = ImportOrchestrator::new(kv.clone(), feed.clone(), store.clone(), reconciler);
        Fixture {
            kv,
            store,
            feed,
            orchestrator,
        }
    }

    fn context() -> RunContext {
        RunContext {
            username: "someone".to_string(),
            feed_url: "https://letterboxd.com/someone/rss/".to_string(),
            ..RunContext::default()
        }
    }

    #[tokio::test]
    async fn test_feed_import_is_idempotent() {
        let f = fixture(&[HEAT, LIST_ENTRY, THIEF]);
        let ctx = context();

        let first = f.orchestrator.run_feed_import(&ctx, FeedImportOptions::default()).await;
        assert!(first.is_success(), "{}", first.message);
        assert_eq!(first.imported, 2);

        let second = f
            .orchestrator
            .run_feed_import(&ctx, FeedImportOptions { force_refresh: true })
            .await;
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(f.store.len().unwrap(), 2);

        // Lock released after each run
        assert!(f.kv.get(keys::IMPORT_LOCK).unwrap().is_none());
        let options = OptionStore::new(f.kv.clone());
        assert_eq!(options.import_log().unwrap().len(), 2);
        assert!(options.last_import().unwrap().is_some());
        assert!(options.last_check().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_feed_is_cached_unless_forced() {
        let f = fixture(&[HEAT]);
        let ctx = context();
        f.orchestrator.run_feed_import(&ctx, FeedImportOptions::default()).await;
        f.orchestrator.run_feed_import(&ctx, FeedImportOptions::default()).await;
        assert_eq!(f.feed.fetches(), 1);

        f.feed.replace(feed_xml(&[HEAT, THIEF]));
        let forced = f
            .orchestrator
            .run_feed_import(&ctx, FeedImportOptions { force_refresh: true })
            .await;
        assert_eq!(f.feed.fetches(), 2);
        assert_eq!(forced.imported, 1);
    }

    #[tokio::test]
    async fn test_held_lock_is_a_no_op() {
        let f = fixture(&[HEAT]);
        f.kv.set(keys::IMPORT_LOCK, "other".to_string(), Some(Duration::from_secs(300)))
            .unwrap();

        let summary = f.orchestrator.run_feed_import(&context(), FeedImportOptions::default()).await;
        assert!(summary.locked);
        assert_eq!(summary.status, ImportStatus::Success);
        assert_eq!(f.feed.fetches(), 0);
        assert_eq!(f.store.len().unwrap(), 0);
        // Someone else's lock is left alone
        assert_eq!(f.kv.get(keys::IMPORT_LOCK).unwrap().as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_missing_username_is_a_configuration_error() {
        let f = fixture(&[HEAT]);
        let ctx = RunContext::default();
        let summary = f.orchestrator.run_feed_import(&ctx, FeedImportOptions::default()).await;
        assert_eq!(summary.status, ImportStatus::Error);
        assert!(summary.message.contains("username"));
        assert_eq!(f.feed.fetches(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_error_and_releases_lock() {
        let f = fixture(&[HEAT]);
        f.feed.replace("   ");
        let summary = f.orchestrator.run_feed_import(&context(), FeedImportOptions::default()).await;
        assert_eq!(summary.status, ImportStatus::Error);
        assert_eq!(summary.imported, 0);
        assert!(summary.message.contains("empty"), "{}", summary.message);
        assert!(f.kv.get(keys::IMPORT_LOCK).unwrap().is_none());
        assert!(OptionStore::new(f.kv.clone()).last_import().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_feed_is_an_error() {
        let f = fixture(&[HEAT]);
        f.feed.replace("<rss><channel><item><title>Heat</title></channel>");
        let summary = f.orchestrator.run_feed_import(&context(), FeedImportOptions::default()).await;
        assert_eq!(summary.status, ImportStatus::Error);
    }

    #[tokio::test]
    async fn test_start_date_filters_older_entries() {
        let f = fixture(&[HEAT, THIEF]);
        let ctx = RunContext {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 4),
            ..context()
        };
        let summary = f.orchestrator.run_feed_import(&ctx, FeedImportOptions::default()).await;
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped_filtered, 1);
    }

    #[tokio::test]
    async fn test_csv_import_through_orchestrator() {
        let f = fixture(&[]);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diary.csv");
        std::fs::write(&path, "Name,Year,Watched Date,Rating\nHeat,1995,2025-01-04,4\nHeat,1995,2025-01-09,5\n").unwrap();

        let summary = f.orchestrator.run_csv_import(&context(), &path).await;
        assert!(summary.is_success(), "{}", summary.message);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped_duplicates, 1);

        let missing = f.orchestrator.run_csv_import(&context(), &dir.path().join("nope.csv")).await;
        assert_eq!(missing.status, ImportStatus::Error);
        assert!(f.kv.get(keys::IMPORT_LOCK).unwrap().is_none());
    }
}
