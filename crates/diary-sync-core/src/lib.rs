pub mod content;
pub mod context;
pub mod csv_import;
pub mod enrichment;
pub mod identity;
pub mod import;
pub mod matching;
pub mod pipeline;
pub mod reconciler;
pub mod store;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use context::RunContext;
pub use csv_import::{CsvImportReport, CsvImporter};
pub use enrichment::{EnrichmentOrchestrator, EnrichmentSettings};
pub use import::{FeedImportOptions, FeedSource, ImportOrchestrator};
pub use matching::{find_best_match, MovieMatch};
pub use pipeline::{ClearOptions, ClearReport, Pipeline, PipelineParts};
pub use reconciler::{EnrichmentTrigger, ReconcileOutcome, Reconciler};
pub use store::{ContentStore, FileContentStore, LocalMediaLibrary, MediaLibrary};
pub use writer::{ContentWriter, ImportOptions, PreparedItem};
