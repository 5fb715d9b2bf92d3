use super::open_pipeline;
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use diary_sync_core::ClearOptions;
use serde_json::json;

pub fn run_clear(all: bool, cache: bool, progress: bool, lock: bool, output: &Output) -> Result<()> {
    let what = if all {
        ClearOptions::all()
    } else {
        ClearOptions {
            caches: cache,
            progress,
            lock,
        }
    };

    if what == ClearOptions::default() {
        output.warn("No clear option specified. Use --cache, --progress, --lock, or --all");
        output.println("\nExample: reelbook clear --cache");
        return Ok(());
    }

    let pipeline = open_pipeline(|ctx| ctx)?;
    let report = pipeline
        .clear(what)
        .map_err(|e| eyre!("Failed to clear state: {:#}", e))?;

    if !output.is_human() {
        output.json(&json!({
            "cache_entries": report.cache_entries,
            "progress_cleared": report.progress_cleared,
            "lock_cleared": report.lock_cleared,
        }));
        return Ok(());
    }

    if what.caches {
        output.success(format!("Cleared {} cached responses", report.cache_entries));
    }
    if what.progress {
        if report.progress_cleared {
            output.success("Cleared the enrichment run state; the next run starts from the beginning");
        } else {
            output.info("No enrichment run state to clear");
        }
    }
    if what.lock {
        if report.lock_cleared {
            output.success("Released the import lock");
        } else {
            output.info("No import lock was held");
        }
    }
    Ok(())
}
