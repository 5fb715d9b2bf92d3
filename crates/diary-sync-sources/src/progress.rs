use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// Counts outcomes of a per-item loop (feed entries, CSV rows, records
/// being enriched) and logs periodic progress plus a final summary.
pub struct ProgressTracker {
    label: String,
    total: usize,
    created: usize,
    updated: usize,
    skipped: usize,
    failed: usize,
    started: Instant,
    interval: usize,
    last_logged: usize,
    failure_kinds: BTreeMap<String, usize>,
}

impl ProgressTracker {
    /// `interval`: emit a progress line every this many items
    pub fn new(label: impl Into<String>, total: usize, interval: usize) -> Self {
        let label = label.into();
        if total > 10 {
            info!("{}: {} items to process", label, total);
        }
        Self {
            label,
            total,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            started: Instant::now(),
            interval: interval.max(1),
            last_logged: 0,
            failure_kinds: BTreeMap::new(),
        }
    }

    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// `kind` groups failures in the summary (e.g. "date", "store")
    pub fn record_failed(&mut self, kind: &str) {
        self.failed += 1;
        *self.failure_kinds.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Call after each item with its 1-based position
    pub fn log_progress(&mut self, current: usize) {
        if current.saturating_sub(self.last_logged) < self.interval && current != self.total {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        // Fast runs only get the summary
        if elapsed < 0.5 && current < self.total {
            return;
        }
        let rate = if elapsed > 0.0 { current as f64 / elapsed } else { 0.0 };
        info!(
            "{}: {}/{} ({:.1}/s) | created {} | updated {} | skipped {} | failed {}",
            self.label, current, self.total, rate, self.created, self.updated, self.skipped, self.failed
        );
        self.last_logged = current;
    }

    pub fn log_summary(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        if self.failed == 0 {
            info!(
                "{} finished: {} items in {:.1}s | created {} | updated {} | skipped {}",
                self.label, self.total, elapsed, self.created, self.updated, self.skipped
            );
            return;
        }

        warn!(
            "{} finished: {} items in {:.1}s | created {} | updated {} | skipped {} | failed {}",
            self.label, self.total, elapsed, self.created, self.updated, self.skipped, self.failed
        );
        let mut kinds: Vec<_> = self.failure_kinds.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1));
        let breakdown: Vec<String> = kinds.iter().map(|(kind, n)| format!("{}: {}", kind, n)).collect();
        info!("Failure breakdown: {}", breakdown.join(", "));
    }
}
