use super::{load_settings, prompts};
use crate::output::Output;
use crate::ConfigCommands;
use chrono::NaiveDate;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{Cell, Table};
use diary_sync_config::{default_scheduler_config, Config, CredentialStore, PathManager};
use owo_colors::OwoColorize;
use serde_json::json;

pub fn run_config(cmd: ConfigCommands, output: &Output) -> Result<()> {
    match cmd {
        ConfigCommands::Show => show_config(output),
        ConfigCommands::SetUsername { username } => set_username(username, output),
        ConfigCommands::SetApiKey { key } => set_api_key(key, output),
        ConfigCommands::SetStartDate { date } => set_start_date(date, output),
    }
}

fn show_config(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let (config, credentials) = load_settings(&paths)?;
    let api_key = credentials.get_tmdb_api_key();
    let scheduler = config.scheduler.clone().unwrap_or_else(default_scheduler_config);

    if !output.is_human() {
        output.json(&json!({
            "config_file": paths.config_file(),
            "feed": {
                "username": config.feed.username,
                "url": config.feed.has_username().then(|| config.feed.feed_url()),
                "start_date": config.feed.start_date,
                "import_as_draft": config.feed.import_as_draft,
                "cache_minutes": config.feed.cache_minutes,
            },
            "tmdb": {
                "api_key": api_key.as_deref().map(mask_string),
                "region": config.tmdb.region,
                "min_match_score": config.tmdb.min_match_score,
                "max_requests": config.tmdb.max_requests,
                "period_secs": config.tmdb.period_secs,
            },
            "enrichment": config.enrichment,
            "scheduler": scheduler,
        }));
        return Ok(());
    }
    if output.is_quiet() {
        return Ok(());
    }

    println!();
    println!("{}", "Reelbook configuration".bright_cyan().bold());
    println!("{}", paths.config_file().display().to_string().dimmed());
    println!();

    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Setting").add_attribute(comfy_table::Attribute::Bold),
        Cell::new("Value").add_attribute(comfy_table::Attribute::Bold),
    ]);
    let username = if config.feed.has_username() {
        config.feed.username.clone()
    } else {
        "<not set>".to_string()
    };
    table.add_row(vec!["Username".to_string(), username]);
    if config.feed.has_username() {
        table.add_row(vec!["Feed URL".to_string(), config.feed.feed_url()]);
    }
    table.add_row(vec![
        "Start date".to_string(),
        config
            .feed
            .start_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "<all entries>".to_string()),
    ]);
    table.add_row(vec!["Import as draft".to_string(), config.feed.import_as_draft.to_string()]);
    table.add_row(vec![
        "TMDB API key".to_string(),
        api_key.as_deref().map(mask_string).unwrap_or_else(|| "<not set>".to_string()),
    ]);
    table.add_row(vec!["Region".to_string(), config.tmdb.region.clone()]);
    table.add_row(vec!["Min match score".to_string(), config.tmdb.min_match_score.to_string()]);
    table.add_row(vec![
        "Batch size".to_string(),
        config.enrichment.clamped_batch_size().to_string(),
    ]);
    table.add_row(vec![
        "Enrich on import".to_string(),
        config.enrichment.enrich_on_import.to_string(),
    ]);
    table.add_row(vec![
        "Schedule".to_string(),
        format!(
            "{} ({})",
            scheduler.schedule,
            if scheduler.enabled { "enabled" } else { "disabled" }
        ),
    ]);
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    println!("{}", table);
    Ok(())
}

fn load_for_update(paths: &PathManager) -> Result<Config> {
    paths
        .ensure_directories()
        .map_err(|e| eyre!("Failed to create configuration directories: {}", e))?;
    let config_file = paths.config_file();
    Config::load_or_default(&config_file)
        .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))
}

fn save(paths: &PathManager, config: &Config) -> Result<()> {
    let config_file = paths.config_file();
    config
        .save_to_file(&config_file)
        .map_err(|e| eyre!("Failed to save config to {}: {}", config_file.display(), e))
}

fn set_username(username_arg: Option<String>, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let mut config = load_for_update(&paths)?;

    let username = match username_arg {
        Some(username) => username,
        None => {
            let existing = config.feed.has_username().then(|| config.feed.username.clone());
            prompts::prompt_string("Letterboxd username", existing.as_deref())?
        }
    };
    let username = username.trim().trim_start_matches('@').to_string();
    validate_username(&username).map_err(|e| eyre!("{}", e))?;

    config.feed.username = username;
    save(&paths, &config)?;
    output.success(format!("Username saved. Diary feed: {}", config.feed.feed_url()));
    Ok(())
}

fn set_api_key(key_arg: Option<String>, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths
        .ensure_directories()
        .map_err(|e| eyre!("Failed to create configuration directories: {}", e))?;

    let key = match key_arg {
        Some(key) => key,
        None => rpassword::prompt_password("TMDB API key (v3): ")
            .map_err(|e| eyre!("Failed to read API key: {}", e))?,
    };
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(eyre!("API key is required"));
    }

    let credentials_file = paths.credentials_file();
    let mut credentials = CredentialStore::new(credentials_file.clone());
    credentials
        .load()
        .map_err(|e| eyre!("Failed to load credentials from {}: {}", credentials_file.display(), e))?;
    credentials.set_tmdb_api_key(key.clone());
    credentials
        .save()
        .map_err(|e| eyre!("Failed to save credentials to {}: {}", credentials_file.display(), e))?;

    output.success(format!("TMDB API key saved ({})", mask_string(&key)));
    Ok(())
}

fn set_start_date(date_arg: Option<String>, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let mut config = load_for_update(&paths)?;

    config.feed.start_date = match date_arg.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(date) => Some(
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| eyre!("Invalid date '{}': use YYYY-MM-DD", date))?,
        ),
        None => None,
    };
    save(&paths, &config)?;

    match config.feed.start_date {
        Some(date) => output.success(format!("Entries watched before {} will not be imported", date)),
        None => output.success("Start date cleared; all entries will be imported"),
    }
    Ok(())
}

fn mask_string(s: &str) -> String {
    if s.len() <= 4 {
        return "*".repeat(s.len());
    }
    format!("{}***{}", &s[..2], &s[s.len() - 2..])
}

/// Letterboxd usernames: letters, digits and underscores
fn validate_username(input: &str) -> Result<(), &'static str> {
    if input.is_empty() {
        return Err("Username cannot be empty");
    }
    if !input.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Username may only contain letters, digits and underscores");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_string() {
        assert_eq!(mask_string("abcd"), "****");
        assert_eq!(mask_string("0123456789abcdef"), "01***ef");
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("some_one42").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("some one").is_err());
        assert!(validate_username("someone/rss").is_err());
    }
}
