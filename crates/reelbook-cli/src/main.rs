use clap::{ArgAction, Parser, Subcommand};
use commands::{clear, config, daemon, enrich, import, log};
use diary_sync_config::PathManager;
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "reelbook")]
#[command(about = "Reelbook - Keep a local film diary in sync with your Letterboxd activity")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import new diary entries from the RSS feed
    #[command(long_about = "Fetch the configured user's diary feed and create or update one record per watched film. Running it again only picks up what changed.")]
    Import {
        /// Ignore the cached copy of the feed
        #[arg(long, action = ArgAction::SetTrue)]
        force_refresh: bool,

        /// Create new records as drafts
        #[arg(long, action = ArgAction::SetTrue)]
        draft: bool,
    },
    /// Import a diary export (CSV, or the ZIP Letterboxd hands out)
    #[command(name = "import-csv")]
    #[command(long_about = "Import the full history from an exported diary.csv or the export ZIP. Rows already imported, from the feed or a previous export, are skipped.")]
    ImportCsv {
        /// Path to the CSV or ZIP file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Create new records as drafts
        #[arg(long, action = ArgAction::SetTrue)]
        draft: bool,
    },
    /// Enrich records with movie details from TMDB
    #[command(long_about = "Attach director, genres, overview, poster and streaming providers to imported records. Runs all remaining batches by default; an interrupted run resumes where it stopped.")]
    Enrich {
        /// Records per batch (5-50)
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// Start a new run even if one is in progress
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,

        /// Run only batch N of the current run (1 starts a new run)
        #[arg(long, value_name = "N")]
        step: Option<usize>,
    },
    /// Show the state of the current or last enrichment run
    #[command(name = "enrich-status")]
    EnrichStatus,
    /// Show recent imports
    Log {
        /// Number of entries to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run as daemon with internal scheduler
    #[command(long_about = "Import the feed on a cron schedule and, if configured, enrich the new records after each import. Runs in the foreground; logs go to the daily rolling log file.")]
    Daemon {
        /// Cron schedule expression with seconds (e.g. '0 0 */6 * * *' for every 6 hours)
        #[arg(long, value_name = "SCHEDULE")]
        schedule: Option<String>,

        /// Skip the import on startup
        #[arg(long, action = ArgAction::SetTrue)]
        no_startup_import: bool,
    },
    /// View or change settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Clear cached responses and run state
    #[command(long_about = "Clear feed and TMDB response caches, the enrichment run state, or a stale import lock. Imported records are never touched.")]
    Clear {
        /// Clear everything below
        #[arg(long, action = ArgAction::SetTrue)]
        all: bool,

        /// Clear feed and TMDB response caches
        #[arg(long, action = ArgAction::SetTrue)]
        cache: bool,

        /// Clear the enrichment run state
        #[arg(long, action = ArgAction::SetTrue)]
        progress: bool,

        /// Release the import lock
        #[arg(long, action = ArgAction::SetTrue)]
        lock: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (masks the API key)
    Show,
    /// Set the Letterboxd username whose diary is imported
    #[command(name = "set-username")]
    SetUsername {
        /// Username (prompted for when omitted)
        username: Option<String>,
    },
    /// Store the TMDB API key
    #[command(name = "set-api-key")]
    SetApiKey {
        /// API key (read without echo when omitted)
        key: Option<String>,
    },
    /// Only import entries watched on or after this date
    #[command(name = "set-start-date")]
    SetStartDate {
        /// YYYY-MM-DD; omit to import everything
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // The daemon logs to a rolling file; everything else to stderr
    let log_file = match cli.command {
        Commands::Daemon { .. } => Some(PathManager::default().daemon_log_file()),
        _ => None,
    };
    logging::init_logging_with_file(cli.verbose, cli.quiet, log_file)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::Import { force_refresh, draft } => import::run_import(force_refresh, draft, &output).await,
        Commands::ImportCsv { file, draft } => import::run_import_csv(&file, draft, &output).await,
        Commands::Enrich {
            batch_size,
            force,
            step,
        } => enrich::run_enrich(batch_size, force, step, &output).await,
        Commands::EnrichStatus => enrich::run_status(&output),
        Commands::Log { limit } => log::run_log(limit, &output),
        Commands::Daemon {
            schedule,
            no_startup_import,
        } => daemon::run_daemon(schedule, no_startup_import, &output).await,
        Commands::Config { cmd } => config::run_config(cmd, &output),
        Commands::Clear {
            all,
            cache,
            progress,
            lock,
        } => clear::run_clear(all, cache, progress, lock, &output),
    }
}
