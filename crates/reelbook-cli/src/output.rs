use clap::ValueEnum;
use diary_sync_models::{EnrichmentProgress, EnrichmentStatus, ImportStatus, ImportSummary};
use owo_colors::OwoColorize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    #[value(name = "json-pretty")]
    JsonPretty,
}

pub struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn is_human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.message("success", msg.as_ref(), |m| println!("{} {}", "✓".green(), m));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        // Errors are shown even in quiet mode
        match self.format {
            OutputFormat::Human => eprintln!("{} {}", "✗".red(), msg.as_ref()),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": "error", "message": msg.as_ref() }))
            }
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.message("info", msg.as_ref(), |m| println!("{}", m));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.message("warning", msg.as_ref(), |m| println!("{} {}", "⚠".yellow(), m));
    }

    pub fn println(&self, msg: impl AsRef<str>) {
        self.message("info", msg.as_ref(), |m| println!("{}", m));
    }

    fn message(&self, kind: &str, msg: &str, human: impl FnOnce(&str)) {
        if self.quiet {
            return;
        }
        match self.format {
            OutputFormat::Human => human(msg),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": kind, "message": msg }))
            }
        }
    }

    pub fn json(&self, data: &serde_json::Value) {
        if self.quiet && self.format != OutputFormat::Human {
            return;
        }
        self.print_json(data);
    }

    fn print_json(&self, data: &serde_json::Value) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(data).unwrap_or_default()),
            OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(data).unwrap_or_default()),
            OutputFormat::Human => println!("{}", data),
        }
    }

    /// Import result: one status line, then the counters
    pub fn summary(&self, summary: &ImportSummary) {
        if !self.is_human() {
            self.json(&serde_json::to_value(summary).unwrap_or_default());
            return;
        }
        if summary.locked {
            self.warn(&summary.message);
            return;
        }
        match summary.status {
            ImportStatus::Success => self.success(&summary.message),
            ImportStatus::Error => {
                self.error(&summary.message);
                return;
            }
        }
        self.println(format!("  Imported:           {}", summary.imported));
        self.println(format!("  Updated:            {}", summary.updated));
        self.println(format!("  Already imported:   {}", summary.skipped_existing));
        if summary.skipped_duplicates > 0 {
            self.println(format!("  Duplicates:         {}", summary.skipped_duplicates));
        }
        if summary.skipped_invalid > 0 {
            self.println(format!("  Invalid rows:       {}", summary.skipped_invalid));
        }
        if summary.skipped_filtered > 0 {
            self.println(format!("  Before start date:  {}", summary.skipped_filtered));
        }
        if summary.failed > 0 {
            self.println(format!("  Failed:             {}", summary.failed.red()));
        }
    }

    pub fn progress(&self, progress: &EnrichmentProgress) {
        if !self.is_human() {
            self.json(&serde_json::to_value(progress).unwrap_or_default());
            return;
        }
        let line = format!(
            "{:.0}% ({}/{} records), {} updated, {} failed, next batch {}",
            progress.percent(),
            progress.processed,
            progress.total,
            progress.updated,
            progress.failed,
            progress.batch
        );
        let summary = if progress.summary.is_empty() {
            line.as_str()
        } else {
            progress.summary.as_str()
        };
        match progress.status {
            EnrichmentStatus::Running => self.info(format!("Enrichment running: {}", line)),
            EnrichmentStatus::Complete => self.success(summary),
            EnrichmentStatus::Error => self.error(summary),
        }
    }
}
