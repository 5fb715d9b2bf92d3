use super::{is_interactive, open_pipeline};
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use diary_sync_models::{EnrichmentProgress, EnrichmentStatus};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

pub async fn run_enrich(batch_size: Option<usize>, force: bool, step: Option<usize>, output: &Output) -> Result<()> {
    let pipeline = open_pipeline(|ctx| ctx.with_batch_size(batch_size))?;
    tracing::debug!(
        batch_size = pipeline.context().batch_size,
        force,
        ?step,
        "Enrich command started"
    );

    let progress = match step {
        Some(0) => return Err(eyre!("Batch numbers start at 1")),
        Some(batch) => pipeline
            .enrich_batch(batch, force)
            .await
            .map_err(|e| eyre!("Enrichment batch {} failed: {:#}", batch, e))?,
        None => {
            let interactive = is_interactive(output);
            let mut bar: Option<ProgressBar> = None;
            let progress = pipeline
                .enrich_all_with(force, |p| {
                    if interactive {
                        update_bar(&mut bar, p);
                    }
                })
                .await
                .map_err(|e| eyre!("Enrichment failed: {:#}", e))?;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            progress
        }
    };

    output.progress(&progress);
    match progress.status {
        EnrichmentStatus::Error => Err(eyre!("{}", progress.summary)),
        _ => Ok(()),
    }
}

fn update_bar(bar: &mut Option<ProgressBar>, progress: &EnrichmentProgress) {
    let bar = bar.get_or_insert_with(|| {
        let bar = ProgressBar::new(progress.total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar
    });
    bar.set_length(progress.total as u64);
    bar.set_position(progress.processed as u64);
    bar.set_message(format!("{} updated, {} failed", progress.updated, progress.failed));
}

pub fn run_status(output: &Output) -> Result<()> {
    let pipeline = open_pipeline(|ctx| ctx)?;
    let status = pipeline
        .enrichment_status()
        .map_err(|e| eyre!("Failed to read enrichment state: {:#}", e))?;
    let eligible = pipeline
        .store()
        .count_enrichable()
        .map_err(|e| eyre!("Failed to count records: {:#}", e))?;

    match status {
        Some(progress) => {
            if output.is_human() {
                output.progress(&progress);
                output.println(format!("  Run:      {}", progress.run_id));
                output.println(format!("  Started:  {}", progress.started_at.to_rfc3339()));
                output.println(format!("  Updated:  {}", progress.updated_at.to_rfc3339()));
                output.println(format!("  Eligible: {} records", eligible));
            } else {
                output.json(&json!({ "progress": progress, "eligible": eligible }));
            }
        }
        None => {
            if output.is_human() {
                output.info(format!(
                    "No enrichment run recorded. {} records are eligible; start one with `reelbook enrich`.",
                    eligible
                ));
            } else {
                output.json(&json!({ "progress": null, "eligible": eligible }));
            }
        }
    }
    Ok(())
}
