use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever the persisted layout changes; older blobs start a fresh run
pub const PROGRESS_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Running,
    Complete,
    Error,
}

/// Resumable enrichment run state.
///
/// Everything a batch step needs is stored here, so a run can continue in a
/// fresh process from nothing but this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentProgress {
    pub version: u32,
    pub run_id: String,
    pub status: EnrichmentStatus,
    pub total: usize,
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub batch: usize, // Next batch number to run (1-based)
    pub batch_size: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
}

impl EnrichmentProgress {
    pub fn start(run_id: String, total: usize, batch_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            version: PROGRESS_VERSION,
            run_id,
            status: EnrichmentStatus::Running,
            total,
            processed: 0,
            updated: 0,
            failed: 0,
            batch: 1,
            batch_size,
            started_at: now,
            updated_at: now,
            summary: String::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == EnrichmentStatus::Running
    }

    pub fn is_complete(&self) -> bool {
        self.status == EnrichmentStatus::Complete
    }

    /// Percentage of processed records, 0-100
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).min(100.0)
    }

    pub fn offset_for(&self, batch: usize) -> usize {
        batch.saturating_sub(1) * self.batch_size
    }
}
