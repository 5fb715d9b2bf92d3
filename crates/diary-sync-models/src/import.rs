use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportSource {
    Feed,
    Csv,
}

/// Result of one import run; `message` is meant to be shown as-is
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSummary {
    pub status: ImportStatus,
    pub source: ImportSource,
    pub imported: usize,
    pub updated: usize,
    pub skipped_existing: usize,
    pub skipped_duplicates: usize,
    /// CSV rows without a title or a parseable date
    #[serde(default)]
    pub skipped_invalid: usize,
    /// Feed entries watched before the configured start date
    #[serde(default)]
    pub skipped_filtered: usize,
    pub failed: usize,
    /// Another import held the lock; nothing was done
    #[serde(default)]
    pub locked: bool,
    pub message: String,
}

impl ImportSummary {
    pub fn empty(source: ImportSource) -> Self {
        Self {
            status: ImportStatus::Success,
            source,
            imported: 0,
            updated: 0,
            skipped_existing: 0,
            skipped_duplicates: 0,
            skipped_invalid: 0,
            skipped_filtered: 0,
            failed: 0,
            locked: false,
            message: String::new(),
        }
    }

    pub fn error(source: ImportSource, message: impl Into<String>) -> Self {
        Self {
            status: ImportStatus::Error,
            message: message.into(),
            ..Self::empty(source)
        }
    }

    pub fn locked(source: ImportSource) -> Self {
        Self {
            locked: true,
            message: "An import is already running; try again in a few minutes.".to_string(),
            ..Self::empty(source)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ImportStatus::Success
    }
}

/// One line of the rolling import log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: ImportSource,
    pub status: ImportStatus,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub message: String,
}

impl ImportLogEntry {
    pub fn from_summary(summary: &ImportSummary, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            source: summary.source,
            status: summary.status,
            imported: summary.imported,
            updated: summary.updated,
            skipped: summary.skipped_existing + summary.skipped_duplicates,
            message: summary.message.clone(),
        }
    }
}
