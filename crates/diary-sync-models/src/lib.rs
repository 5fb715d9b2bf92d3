pub mod content_record;
pub mod enrichment;
pub mod identity;
pub mod import;
pub mod movie;
pub mod raw_item;

pub use content_record::{meta_keys, ContentRecord, NewRecord, RecordId, RecordStatus, RecordUpdate, YEAR_TAXONOMY};
pub use enrichment::{EnrichmentProgress, EnrichmentStatus, PROGRESS_VERSION};
pub use identity::{IdentityKey, IdentityKind};
pub use import::{ImportLogEntry, ImportSource, ImportStatus, ImportSummary};
pub use movie::{MovieMetadata, StreamingProvider};
pub use raw_item::RawItem;
