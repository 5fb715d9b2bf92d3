use crate::identity::{film_slug, url_variants};
use crate::store::ContentStore;
use crate::writer::{ContentWriter, ImportOptions, PreparedItem};
use anyhow::Result;
use async_trait::async_trait;
use diary_sync_models::{meta_keys, ContentRecord, RawItem, RecordId, RecordUpdate};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host of links synthesised for entries that have none
pub const PSEUDO_LINK_BASE: &str = "https://reelbook.invalid/entry/";

/// Called after a record is created for an entry that carries an external movie id
#[async_trait]
pub trait EnrichmentTrigger: Send + Sync {
    async fn enrich_created(&self, record_id: RecordId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created(RecordId),
    /// Existing record whose date, body or status changed
    Updated(RecordId),
    /// Existing record; only metadata was refreshed
    Unchanged(RecordId),
}

impl ReconcileOutcome {
    pub fn record_id(&self) -> RecordId {
        match self {
            ReconcileOutcome::Created(id) | ReconcileOutcome::Updated(id) | ReconcileOutcome::Unchanged(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ReconcileOutcome::Created(_))
    }
}

/// Stable stand-in link derived from title and publish date
pub fn pseudo_link(title: &str, pub_date: &str) -> String {
    let digest = hex::encode(Sha256::digest(format!("{}|{}", title.trim(), pub_date.trim()).as_bytes()));
    format!("{}{}", PSEUDO_LINK_BASE, &digest[..16])
}

/// Decides create vs merge for each incoming entry
pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    writer: Arc<ContentWriter>,
    enrichment: Option<Arc<dyn EnrichmentTrigger>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>, writer: Arc<ContentWriter>) -> Self {
        Self {
            store,
            writer,
            enrichment: None,
        }
    }

    pub fn with_enrichment(mut self, trigger: Arc<dyn EnrichmentTrigger>) -> Self {
        self.enrichment = Some(trigger);
        self
    }

    /// `true` only when a new record was created
    pub async fn reconcile(&self, raw: &RawItem, options: &ImportOptions) -> Result<bool> {
        Ok(self.reconcile_item(raw, options).await?.is_created())
    }

    pub async fn reconcile_item(&self, raw: &RawItem, options: &ImportOptions) -> Result<ReconcileOutcome> {
        let mut raw = raw.clone();
        if !raw.has_link() {
            raw.link = pseudo_link(&raw.title, &raw.pub_date);
        }
        let item = self.writer.prepare(&raw, options)?;

        match self.find_existing(&item)? {
            Some(existing) => self.merge(existing, &item).await,
            None => self.create(&item).await,
        }
    }

    /// Identity key first, then legacy URL spellings, then the film slug.
    /// Fallback hits get the identity key backfilled.
    fn find_existing(&self, item: &PreparedItem) -> Result<Option<ContentRecord>> {
        if let Some(record) = self.store.find_by_identity_key(&item.identity_key)? {
            return Ok(Some(record));
        }

        let mut found = self.store.find_by_url_variants(&url_variants(&item.link))?;
        if found.is_none() {
            if let Some(slug) = film_slug(&item.link) {
                found = self.store.find_by_url_fragment(&format!("/film/{}/", slug))?;
            }
        }

        if let Some(record) = &found {
            if !item.identity_key.is_empty() {
                info!(
                    record_id = record.id,
                    key = %item.identity_key,
                    "Matched legacy record by URL; backfilling identity key"
                );
                let mut meta = BTreeMap::new();
                meta.insert(meta_keys::IDENTITY_KEY.to_string(), item.identity_key.to_string());
                self.store.set_metadata(record.id, &meta)?;
            }
        }
        Ok(found)
    }

    async fn merge(&self, existing: ContentRecord, item: &PreparedItem) -> Result<ReconcileOutcome> {
        let update = minimal_update(&existing, item);
        let changed = !update.is_empty();
        if changed {
            debug!(record_id = existing.id, ?update, "Updating changed fields");
            self.store.update(existing.id, update)?;
        }

        self.writer.apply_metadata(existing.id, item)?;
        self.writer.sideload_poster(existing.id, item.poster_url.as_deref()).await;

        Ok(if changed {
            ReconcileOutcome::Updated(existing.id)
        } else {
            ReconcileOutcome::Unchanged(existing.id)
        })
    }

    async fn create(&self, item: &PreparedItem) -> Result<ReconcileOutcome> {
        let id = self.writer.write(item).await?;

        if !item.tmdb_id.is_empty() {
            if let Some(trigger) = &self.enrichment {
                if let Err(e) = trigger.enrich_created(id).await {
                    warn!(record_id = id, error = %e, "Enrichment after import failed");
                }
            }
        }
        Ok(ReconcileOutcome::Created(id))
    }
}

/// Fields of `existing` that differ from the source.
///
/// The body is compared through the stored source hash: an unchanged hash
/// means the source did not change, so local edits to the body stay.
/// Records without a hash compare the body text directly.
fn minimal_update(existing: &ContentRecord, item: &PreparedItem) -> RecordUpdate {
    let mut update = RecordUpdate::default();

    if existing.date != Some(item.watch_date) {
        update.date = Some(item.watch_date);
    }

    let body_changed = match existing.meta(meta_keys::SOURCE_HASH) {
        Some(stored) => stored != item.source_hash,
        None => existing.content != item.body,
    };
    if body_changed {
        update.content = Some(item.body.clone());
    }

    if existing.status != item.status {
        update.status = Some(item.status);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileContentStore;
    use diary_sync_models::RecordStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn heat() -> RawItem {
        RawItem {
            title: "Heat, 1995 - ★★★★".to_string(),
            link: "https://letterboxd.com/someone/film/heat-1995/".to_string(),
            pub_date: "Sat, 4 Jan 2025 21:10:00 +0000".to_string(),
            description: "<p>Diner scene.</p>".to_string(),
            film_year: "1995".to_string(),
            external_movie_id: "949".to_string(),
            rating: String::new(),
            poster_url: None,
        }
    }

    fn reconciler(store: Arc<FileContentStore>) -> Reconciler {
        let writer = Arc::new(ContentWriter::new(store.clone(), None));
        Reconciler::new(store, writer)
    }

    #[derive(Default)]
    struct CountingTrigger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EnrichmentTrigger for CountingTrigger {
        async fn enrich_created(&self, _record_id: RecordId) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let store = Arc::new(FileContentStore::in_memory());
        let trigger = Arc::new(CountingTrigger::default());
        let reconciler = reconciler(store.clone()).with_enrichment(trigger.clone());
        let options = ImportOptions::default();

        assert!(reconciler.reconcile(&heat(), &options).await.unwrap());
        assert!(!reconciler.reconcile(&heat(), &options).await.unwrap());
        assert_eq!(
            reconciler.reconcile_item(&heat(), &options).await.unwrap(),
            ReconcileOutcome::Unchanged(1)
        );
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rating_change_keeps_user_edited_body() {
        let store = Arc::new(FileContentStore::in_memory());
        let reconciler = reconciler(store.clone());
        let options = ImportOptions::default();

        reconciler.reconcile(&heat(), &options).await.unwrap();
        store
            .update(
                1,
                RecordUpdate {
                    content: Some("<p>Diner scene.</p>\n\n<p>My own note.</p>".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut rerated = heat();
        rerated.title = "Heat, 1995 - ★★★★★".to_string();
        let outcome = reconciler.reconcile_item(&rerated, &options).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged(1));

        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.meta(meta_keys::RATING), Some("★★★★★"));
        assert!(record.content.contains("My own note."));
    }

    #[tokio::test]
    async fn test_source_change_replaces_body_and_status() {
        let store = Arc::new(FileContentStore::in_memory());
        let reconciler = reconciler(store.clone());

        reconciler.reconcile(&heat(), &ImportOptions::default()).await.unwrap();

        let mut edited = heat();
        edited.description = "<p>Diner scene, again.</p>".to_string();
        let outcome = reconciler
            .reconcile_item(&edited, &ImportOptions { as_draft: true })
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(1));

        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.content, "<p>Diner scene, again.</p>");
        assert_eq!(record.status, RecordStatus::Draft);
    }

    #[tokio::test]
    async fn test_legacy_record_found_by_url_variant_is_backfilled() {
        let store = Arc::new(FileContentStore::in_memory());
        let legacy = store
            .create(diary_sync_models::NewRecord {
                title: "Heat".to_string(),
                status: RecordStatus::Published,
                content: "<p>Diner scene.</p>".to_string(),
                date: None,
            })
            .unwrap();
        let mut meta = BTreeMap::new();
        meta.insert(
            meta_keys::LETTERBOXD_URL.to_string(),
            "http://www.letterboxd.com/someone/film/heat-1995".to_string(),
        );
        store.set_metadata(legacy, &meta).unwrap();

        let reconciler = reconciler(store.clone());
        let created = reconciler.reconcile(&heat(), &ImportOptions::default()).await.unwrap();
        assert!(!created);
        assert_eq!(store.len().unwrap(), 1);

        let record = store.get(legacy).unwrap().unwrap();
        assert_eq!(record.meta(meta_keys::IDENTITY_KEY), Some("film:heat-1995"));
        // Legacy body matched the source, so only the missing date was filled in
        assert_eq!(record.content, "<p>Diner scene.</p>");
        assert!(record.date.is_some());
    }

    #[tokio::test]
    async fn test_legacy_record_found_by_film_slug() {
        let store = Arc::new(FileContentStore::in_memory());
        let legacy = store
            .create(diary_sync_models::NewRecord {
                title: "Heat".to_string(),
                status: RecordStatus::Published,
                content: String::new(),
                date: None,
            })
            .unwrap();
        let mut meta = BTreeMap::new();
        meta.insert(
            meta_keys::LETTERBOXD_URL.to_string(),
            "https://letterboxd.com/someone/film/heat-1995/2/".to_string(),
        );
        store.set_metadata(legacy, &meta).unwrap();

        let outcome = reconciler(store.clone())
            .reconcile_item(&heat(), &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.record_id(), legacy);
        assert!(!outcome.is_created());
    }

    #[tokio::test]
    async fn test_missing_link_gets_stable_pseudo_link() {
        let store = Arc::new(FileContentStore::in_memory());
        let reconciler = reconciler(store.clone());
        let mut item = heat();
        item.link = String::new();

        assert!(reconciler.reconcile(&item, &ImportOptions::default()).await.unwrap());
        assert!(!reconciler.reconcile(&item, &ImportOptions::default()).await.unwrap());

        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.source_url(), Some(pseudo_link(&item.title, &item.pub_date).as_str()));
        assert!(record.source_url().unwrap_or_default().starts_with(PSEUDO_LINK_BASE));
    }

    #[tokio::test]
    async fn test_trashed_record_is_not_reused() {
        let store = Arc::new(FileContentStore::in_memory());
        let reconciler = reconciler(store.clone());
        reconciler.reconcile(&heat(), &ImportOptions::default()).await.unwrap();
        store
            .update(
                1,
                RecordUpdate {
                    status: Some(RecordStatus::Trash),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(reconciler.reconcile(&heat(), &ImportOptions::default()).await.unwrap());
        assert_eq!(store.len().unwrap(), 2);
    }
}
