use crate::content::{normalize_rating, parse_watch_date, text_to_html};
use crate::identity::{normalize, title_year_key};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ContentStore;
use crate::writer::ImportOptions;
use anyhow::Result;
use diary_sync_models::RawItem;
use diary_sync_sources::{decode_export, read_export, CsvDocument, CsvField, ProgressTracker};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Buffered store writes are flushed this often
const FLUSH_EVERY: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvImportReport {
    pub imported: usize,
    pub updated: usize,
    pub skipped_existing: usize,
    pub skipped_duplicates: usize,
    /// Rows without title or date, or with an unparseable date
    pub skipped_invalid: usize,
    pub failed: usize,
}

/// Bulk import of a diary export through the same reconciler the feed uses
pub struct CsvImporter {
    store: Arc<dyn ContentStore>,
    reconciler: Arc<Reconciler>,
}

impl CsvImporter {
    pub fn new(store: Arc<dyn ContentStore>, reconciler: Arc<Reconciler>) -> Self {
        Self { store, reconciler }
    }

    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn import_file(&self, path: &Path, options: &ImportOptions) -> Result<CsvImportReport> {
        let document = read_export(path)?;
        self.import_document(&document, options).await
    }

    pub async fn import_bytes(&self, bytes: &[u8], options: &ImportOptions) -> Result<CsvImportReport> {
        let document = decode_export(bytes)?;
        self.import_document(&document, options).await
    }

    pub async fn import_document(&self, document: &CsvDocument, options: &ImportOptions) -> Result<CsvImportReport> {
        // One bulk read; rows are checked against this set, never the store
        let existing = self.store.prefetch_identity_keys()?;
        let mut seen_url_keys: HashSet<String> = HashSet::new();
        let mut seen_title_year_keys: HashSet<String> = HashSet::new();
        let mut report = CsvImportReport::default();

        let rows: Vec<_> = document.rows().collect();
        let mut progress = ProgressTracker::new("CSV import", rows.len(), 100);
        info!(
            rows = rows.len(),
            existing_keys = existing.len(),
            delimiter = %(document.delimiter() as char),
            "Importing diary export"
        );

        for (index, row) in rows.into_iter().enumerate() {
            let line = index + 2; // 1-based, after the header
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(line, error = %e, "Skipping unreadable row");
                    report.skipped_invalid += 1;
                    progress.record_skipped();
                    continue;
                }
            };

            let title = row.get(CsvField::Title);
            let date = row.get(CsvField::Date);
            if title.is_empty() || date.is_empty() {
                debug!(line, "Skipping row without title or date");
                report.skipped_invalid += 1;
                progress.record_skipped();
                progress.log_progress(index + 1);
                continue;
            }

            let uri = row.get(CsvField::Uri);
            let year = row.get(CsvField::Year);
            let url_key = normalize(uri, "", "");
            let ty_key = title_year_key(title, year);

            if existing.contains(&url_key, &ty_key) {
                report.skipped_existing += 1;
                progress.record_skipped();
                progress.log_progress(index + 1);
                continue;
            }
            let seen = (!url_key.is_empty() && seen_url_keys.contains(url_key.as_str()))
                || (!ty_key.is_empty() && seen_title_year_keys.contains(ty_key.as_str()));
            if seen {
                debug!(line, title, "Skipping duplicate row");
                report.skipped_duplicates += 1;
                progress.record_skipped();
                progress.log_progress(index + 1);
                continue;
            }

            let Some(watch_date) = parse_watch_date(date) else {
                warn!(line, title, date, "Skipping row with unparseable date");
                report.skipped_invalid += 1;
                progress.record_skipped();
                progress.log_progress(index + 1);
                continue;
            };

            if !url_key.is_empty() {
                seen_url_keys.insert(url_key.into_string());
            }
            if !ty_key.is_empty() {
                seen_title_year_keys.insert(ty_key.into_string());
            }

            let raw = RawItem {
                title: title.to_string(),
                link: uri.to_string(),
                pub_date: watch_date.format("%Y-%m-%d").to_string(),
                description: text_to_html(row.get(CsvField::Review)),
                film_year: year.chars().filter(|c| c.is_ascii_digit()).collect(),
                external_movie_id: row.get(CsvField::ExternalId).to_string(),
                rating: normalize_rating(row.get(CsvField::Rating)),
                poster_url: None,
            };

            match self.reconciler.reconcile_item(&raw, options).await {
                Ok(ReconcileOutcome::Created(_)) => {
                    report.imported += 1;
                    progress.record_created();
                }
                Ok(ReconcileOutcome::Updated(_)) => {
                    report.updated += 1;
                    progress.record_updated();
                }
                Ok(ReconcileOutcome::Unchanged(_)) => {
                    report.skipped_existing += 1;
                    progress.record_skipped();
                }
                Err(e) => {
                    warn!(line, title, error = %e, "Failed to import row");
                    report.failed += 1;
                    progress.record_failed("store");
                }
            }

            if (index + 1) % FLUSH_EVERY == 0 {
                self.store.flush()?;
            }
            progress.log_progress(index + 1);
        }

        self.store.flush()?;
        progress.log_summary();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileContentStore;
    use crate::writer::ContentWriter;
    use diary_sync_models::meta_keys;
    use tempfile::TempDir;

    fn importer() -> (Arc<FileContentStore>, CsvImporter) {
        let store = Arc::new(FileContentStore::in_memory());
        let writer = Arc::new(ContentWriter::new(store.clone(), None));
        let reconciler = Arc::new(Reconciler::new(store.clone(), writer));
        (store.clone(), CsvImporter::new(store, reconciler))
    }

    const DIARY: &str = "Date,Name,Year,Letterboxd URI,Rating,Rewatch,Tags,Watched Date\n\
        2025-01-05,Heat,1995,https://boxd.it/abcd,4.5,,,2025-01-04\n\
        2025-01-06,Thief,1981,https://boxd.it/efgh,4,,,2025-01-05\n";

    #[tokio::test]
    async fn test_imports_rows_with_star_ratings() {
        let (store, importer) = importer();
        let report = importer.import_bytes(DIARY.as_bytes(), &ImportOptions::default()).await.unwrap();
        assert_eq!(report.imported, 2);

        let heat = store.get(1).unwrap().unwrap();
        assert_eq!(heat.title, "Heat");
        assert_eq!(heat.meta(meta_keys::RATING), Some("★★★★½"));
        assert_eq!(heat.meta(meta_keys::IDENTITY_KEY), Some("boxd:abcd"));
        // "Watched Date" wins over the logged date
        assert_eq!(heat.meta(meta_keys::WATCH_DATE), Some("2025-01-04"));
    }

    #[tokio::test]
    async fn test_second_import_skips_existing() {
        let (_store, importer) = importer();
        importer.import_bytes(DIARY.as_bytes(), &ImportOptions::default()).await.unwrap();
        let report = importer.import_bytes(DIARY.as_bytes(), &ImportOptions::default()).await.unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_existing, 2);
    }

    #[tokio::test]
    async fn test_in_file_duplicates_are_imported_once() {
        let (store, importer) = importer();
        let csv = "Title,Year,Date\nHeat,1995,2025-01-04\nHeat,1995,2025-02-01\nThief,1981,2025-01-05\n";
        let report = importer.import_bytes(csv.as_bytes(), &ImportOptions::default()).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_short_rows_are_padded_and_invalid_rows_skipped() {
        let (store, importer) = importer();
        let csv = "Title,Year,Date,Rating,Review\n\
            Heat,1995,2025-01-04\n\
            ,1981,2025-01-05,4,\n\
            Ronin,1998,,3,\n\
            Collateral,2004,someday,4,\n\
            Thief,1981,2025-01-06,4,\"Great\n\nscore\"\n";
        let report = importer.import_bytes(csv.as_bytes(), &ImportOptions::default()).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_invalid, 3);

        let thief = store.get(2).unwrap().unwrap();
        assert_eq!(thief.content, "<p>Great</p><p>score</p>");
    }

    #[tokio::test]
    async fn test_existing_feed_record_matches_by_title_and_year() {
        let (store, importer) = importer();
        // A row without a URI gets a pseudo link; the next import matches on title and year
        let csv = "Title,Year,Date\nHeat,1995,2025-01-04\n";
        importer.import_bytes(csv.as_bytes(), &ImportOptions::default()).await.unwrap();

        let with_uri = "Title,Year,Date,Letterboxd URI\nHeat,1995,2025-01-04,https://boxd.it/abcd\n";
        let report = importer.import_bytes(with_uri.as_bytes(), &ImportOptions::default()).await.unwrap();
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_file_from_zip() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("__MACOSX/._diary.csv", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"junk").unwrap();
        zip.start_file("diary.csv", SimpleFileOptions::default()).unwrap();
        zip.write_all(DIARY.as_bytes()).unwrap();
        zip.finish().unwrap();

        let (_store, importer) = importer();
        let report = importer.import_file(&path, &ImportOptions::default()).await.unwrap();
        assert_eq!(report.imported, 2);
    }

    #[tokio::test]
    async fn test_missing_required_column_fails() {
        let (_store, importer) = importer();
        let result = importer
            .import_bytes(b"Name,Year\nHeat,1995\n", &ImportOptions::default())
            .await;
        assert!(result.is_err());
    }
}
