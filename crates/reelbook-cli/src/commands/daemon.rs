use super::load_settings;
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use diary_sync_config::{default_scheduler_config, PathManager};
use diary_sync_core::{FeedImportOptions, Pipeline, RunContext};
use diary_sync_models::ImportStatus;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub schedule: String,
    pub run_on_startup: bool,
    pub enrich_after_import: bool,
}

pub struct Scheduler {
    scheduler: JobScheduler,
    pipeline: Arc<Pipeline>,
    settings: DaemonSettings,
}

impl Scheduler {
    pub async fn new(pipeline: Arc<Pipeline>, settings: DaemonSettings) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            pipeline,
            settings,
        })
    }

    /// Runs until Ctrl-C
    pub async fn start(&mut self) -> Result<()> {
        if self.settings.run_on_startup {
            info!(operation = "scheduler_startup", "Running initial import on startup");
            run_cycle(&self.pipeline, self.settings.enrich_after_import).await;
        }

        let pipeline = self.pipeline.clone();
        let enrich_after_import = self.settings.enrich_after_import;
        let job = Job::new_async(self.settings.schedule.as_str(), move |_id, _scheduler| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                info!(operation = "scheduled_import_start", "Starting scheduled import");
                run_cycle(&pipeline, enrich_after_import).await;
            })
        })
        .map_err(|e| eyre!("Invalid schedule '{}': {}", self.settings.schedule, e))?;
        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!(
            operation = "scheduler_started",
            schedule = %self.settings.schedule,
            enrich_after_import,
            "Scheduler started"
        );

        tokio::signal::ctrl_c().await?;
        info!(operation = "scheduler_stopping", "Shutting down scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

/// One import, optionally followed by an enrichment worker run.
/// Failures are logged; the next tick tries again.
async fn run_cycle(pipeline: &Pipeline, enrich_after_import: bool) {
    let summary = pipeline.import_feed(FeedImportOptions::default()).await;
    match summary.status {
        ImportStatus::Success if summary.locked => {
            info!(operation = "scheduled_import_skipped", "Another import is running");
            return;
        }
        ImportStatus::Success => info!(
            operation = "scheduled_import_complete",
            imported = summary.imported,
            updated = summary.updated,
            skipped = summary.skipped_existing,
            failed = summary.failed,
            "{}",
            summary.message
        ),
        ImportStatus::Error => {
            error!(operation = "scheduled_import_error", message = %summary.message, "Scheduled import failed");
            return;
        }
    }

    if !enrich_after_import || !pipeline.context().has_api_key() {
        return;
    }
    let unfinished = match pipeline.enrichment_status() {
        Ok(status) => status.map(|p| p.is_running()).unwrap_or(false),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Could not read enrichment state");
            false
        }
    };
    if summary.imported == 0 && !unfinished {
        return;
    }

    match pipeline.enrich_all(false).await {
        Ok(progress) => info!(
            operation = "scheduled_enrichment_complete",
            processed = progress.processed,
            updated = progress.updated,
            failed = progress.failed,
            "{}",
            progress.summary
        ),
        Err(e) => error!(
            operation = "scheduled_enrichment_error",
            error = %format!("{:#}", e),
            "Enrichment after import failed"
        ),
    }
}

pub async fn run_daemon(schedule_override: Option<String>, no_startup_import: bool, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let (config, credentials) = load_settings(&paths)?;
    if !config.feed.has_username() {
        return Err(eyre!(
            "No diary username configured. Set one with `reelbook config set-username <name>`."
        ));
    }

    let scheduler_config = config.scheduler.clone().unwrap_or_else(default_scheduler_config);
    if !scheduler_config.enabled && schedule_override.is_none() {
        warn!("Scheduler is disabled in the configuration; running with the configured schedule anyway");
    }
    let settings = DaemonSettings {
        schedule: schedule_override.unwrap_or(scheduler_config.schedule),
        run_on_startup: !no_startup_import && scheduler_config.run_on_startup,
        enrich_after_import: scheduler_config.enrich_after_import,
    };

    let ctx = RunContext::from_config(&config, &credentials);
    let pipeline = Pipeline::open(ctx, &paths).map_err(|e| eyre!("Failed to open the data directory: {:#}", e))?;

    output.info(format!(
        "Daemon running with schedule '{}'. Logs: {}",
        settings.schedule,
        paths.daemon_log_file().display()
    ));

    let mut scheduler = Scheduler::new(Arc::new(pipeline), settings)
        .await
        .map_err(|e| eyre!("Failed to create scheduler: {}", e))?;
    scheduler.start().await
}
