use super::{open_pipeline, spinner};
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use diary_sync_core::FeedImportOptions;
use diary_sync_models::{ImportStatus, ImportSummary};
use std::path::Path;

pub async fn run_import(force_refresh: bool, draft: bool, output: &Output) -> Result<()> {
    tracing::debug!("Import command started");
    let pipeline = open_pipeline(|ctx| ctx.with_draft(draft))?;

    let progress = spinner(output, format!("Importing the diary of {}...", pipeline.context().username));
    let summary = pipeline.import_feed(FeedImportOptions { force_refresh }).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    report(summary, output)
}

pub async fn run_import_csv(file: &Path, draft: bool, output: &Output) -> Result<()> {
    tracing::debug!(file = %file.display(), "CSV import command started");
    let pipeline = open_pipeline(|ctx| ctx.with_draft(draft))?;

    let progress = spinner(output, format!("Importing {}...", file.display()));
    let summary = pipeline.import_csv(file).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    report(summary, output)
}

/// An error summary fails the command; the error report carries its message
fn report(summary: ImportSummary, output: &Output) -> Result<()> {
    match summary.status {
        ImportStatus::Success => {
            output.summary(&summary);
            Ok(())
        }
        ImportStatus::Error => {
            if !output.is_human() {
                output.summary(&summary);
            }
            Err(eyre!("{}", summary.message))
        }
    }
}
