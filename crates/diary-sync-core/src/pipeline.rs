//! Wiring of stores, clients and orchestrators for one process.

use crate::context::RunContext;
use crate::enrichment::EnrichmentOrchestrator;
use crate::import::{FeedImportOptions, FeedSource, ImportOrchestrator};
use crate::reconciler::Reconciler;
use crate::store::{ContentStore, FileContentStore, LocalMediaLibrary, MediaLibrary};
use crate::writer::ContentWriter;
use anyhow::{Context, Result};
use diary_sync_config::options::keys;
use diary_sync_config::{KvStore, OptionStore, PathManager, StateStore};
use diary_sync_models::{EnrichmentProgress, ImportSummary};
use diary_sync_sources::{Clock, FeedFetcher, HttpTransport, ReqwestTransport, SystemClock, TmdbClient};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The external collaborators a pipeline is assembled from
pub struct PipelineParts {
    pub store: Arc<dyn ContentStore>,
    pub kv: Arc<dyn KvStore>,
    pub media: Option<Arc<dyn MediaLibrary>>,
    pub feed: Arc<dyn FeedSource>,
    pub transport: Arc<dyn HttpTransport>,
    pub clock: Arc<dyn Clock>,
}

/// What `clear` removes from the state store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOptions {
    pub caches: bool,
    pub progress: bool,
    pub lock: bool,
}

impl ClearOptions {
    pub fn all() -> Self {
        Self {
            caches: true,
            progress: true,
            lock: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub cache_entries: usize,
    pub progress_cleared: bool,
    pub lock_cleared: bool,
}

pub struct Pipeline {
    ctx: RunContext,
    store: Arc<dyn ContentStore>,
    kv: Arc<dyn KvStore>,
    imports: ImportOrchestrator,
    enrichment: Arc<EnrichmentOrchestrator>,
}

impl Pipeline {
    pub fn build(ctx: RunContext, parts: PipelineParts) -> Self {
        let PipelineParts {
            store,
            kv,
            media,
            feed,
            transport,
            clock,
        } = parts;

        let writer = Arc::new(ContentWriter::new(store.clone(), media));
        let client = TmdbClient::new(ctx.tmdb.clone(), ctx.api_key.clone(), transport, kv.clone(), clock)
            .with_session_id(ctx.session_id.clone());
        let enrichment = Arc::new(EnrichmentOrchestrator::new(
            store.clone(),
            kv.clone(),
            client,
            writer.clone(),
            ctx.enrichment_settings(),
        ));

        let mut reconciler = Reconciler::new(store.clone(), writer);
        if ctx.enrich_on_import && ctx.has_api_key() {
            reconciler = reconciler.with_enrichment(enrichment.clone());
        } else {
            debug!("Records created during import are not enriched immediately");
        }
        let imports = ImportOrchestrator::new(kv.clone(), feed, store.clone(), Arc::new(reconciler));

        Self {
            ctx,
            store,
            kv,
            imports,
            enrichment,
        }
    }

    /// File-backed stores under `paths`, real HTTP clients
    pub fn open(ctx: RunContext, paths: &PathManager) -> Result<Self> {
        paths.ensure_directories()?;
        let store: Arc<dyn ContentStore> = Arc::new(
            FileContentStore::open(&paths.records_file())
                .with_context(|| format!("could not open {}", paths.records_file().display()))?,
        );
        let kv: Arc<dyn KvStore> = Arc::new(StateStore::open(&paths.state_file(), &paths.cache_dir())?);
        let media: Arc<dyn MediaLibrary> = Arc::new(LocalMediaLibrary::new(paths.posters_dir(), store.clone())?);
        let feed: Arc<dyn FeedSource> = Arc::new(FeedFetcher::new()?);
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);

        info!(records = %paths.records_file().display(), "Opened content store");
        Ok(Self::build(
            ctx,
            PipelineParts {
                store,
                kv,
                media: Some(media),
                feed,
                transport,
                clock: Arc::new(SystemClock),
            },
        ))
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn options(&self) -> OptionStore {
        OptionStore::new(self.kv.clone())
    }

    pub fn enrichment(&self) -> &EnrichmentOrchestrator {
        &self.enrichment
    }

    pub async fn import_feed(&self, opts: FeedImportOptions) -> ImportSummary {
        self.imports.run_feed_import(&self.ctx, opts).await
    }

    pub async fn import_csv(&self, path: &Path) -> ImportSummary {
        self.imports.run_csv_import(&self.ctx, path).await
    }

    pub async fn enrich_batch(&self, batch: usize, force: bool) -> Result<EnrichmentProgress> {
        let progress = self.enrichment.run_batch(batch, force).await;
        self.store.flush()?;
        progress
    }

    pub async fn enrich_all(&self, force: bool) -> Result<EnrichmentProgress> {
        self.enrich_all_with(force, |_| {}).await
    }

    pub async fn enrich_all_with<F>(&self, force: bool, on_batch: F) -> Result<EnrichmentProgress>
    where
        F: FnMut(&EnrichmentProgress) + Send,
    {
        let progress = self.enrichment.run_to_completion_with(force, on_batch).await;
        self.store.flush()?;
        progress
    }

    pub fn enrichment_status(&self) -> Result<Option<EnrichmentProgress>> {
        self.enrichment.status()
    }

    pub fn clear(&self, what: ClearOptions) -> Result<ClearReport> {
        let mut report = ClearReport::default();
        if what.caches {
            report.cache_entries += self.kv.delete_prefix(keys::FEED_CACHE_PREFIX)?;
            report.cache_entries += self.kv.delete_prefix(keys::TMDB_CACHE_PREFIX)?;
            self.kv.delete(keys::RATE_LIMIT_WINDOW)?;
        }
        if what.progress {
            report.progress_cleared = self.enrichment.status()?.is_some();
            self.enrichment.reset()?;
        }
        if what.lock {
            report.lock_cleared = self.kv.get(keys::IMPORT_LOCK)?.is_some();
            self.kv.delete(keys::IMPORT_LOCK)?;
        }
        info!(?what, ?report, "Cleared state");
        Ok(report)
    }
}
