pub mod clear;
pub mod config;
pub mod daemon;
pub mod enrich;
pub mod import;
pub mod log;
pub mod prompts;

use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use diary_sync_config::{Config, CredentialStore, PathManager};
use diary_sync_core::{Pipeline, RunContext};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Configuration and credentials as stored; missing files give the defaults
pub fn load_settings(paths: &PathManager) -> Result<(Config, CredentialStore)> {
    let config_file = paths.config_file();
    let config = Config::load_or_default(&config_file)
        .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
    config
        .validate()
        .map_err(|e| eyre!("Invalid configuration in {}: {}", config_file.display(), e))?;

    let credentials_file = paths.credentials_file();
    let mut credentials = CredentialStore::new(credentials_file.clone());
    credentials
        .load()
        .map_err(|e| eyre!("Failed to load credentials from {}: {}", credentials_file.display(), e))?;
    Ok((config, credentials))
}

/// The pipeline for one command invocation
pub fn open_pipeline(adjust: impl FnOnce(RunContext) -> RunContext) -> Result<Pipeline> {
    let paths = PathManager::default();
    let (config, credentials) = load_settings(&paths)?;
    let ctx = adjust(RunContext::from_config(&config, &credentials));
    Pipeline::open(ctx, &paths).map_err(|e| eyre!("Failed to open the data directory: {:#}", e))
}

/// Progress indicators only on an interactive terminal in human mode;
/// otherwise the structured logs carry progress
pub fn is_interactive(output: &Output) -> bool {
    output.is_human() && !output.is_quiet() && std::io::stdout().is_terminal() && std::io::stderr().is_terminal()
}

pub fn spinner(output: &Output, message: impl Into<String>) -> Option<ProgressBar> {
    if !is_interactive(output) {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
    {
        spinner.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Some(spinner)
}
