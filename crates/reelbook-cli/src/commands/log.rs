use super::open_pipeline;
use crate::output::Output;
use chrono::{DateTime, Local, Utc};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{Cell, Color, Table};
use diary_sync_models::{ImportSource, ImportStatus};
use serde_json::json;

pub fn run_log(limit: usize, output: &Output) -> Result<()> {
    let pipeline = open_pipeline(|ctx| ctx)?;
    let options = pipeline.options();
    let entries = options
        .import_log()
        .map_err(|e| eyre!("Failed to read the import log: {}", e))?;
    let last_check = options.last_check().ok().flatten();
    let last_import = options.last_import().ok().flatten();
    let entries: Vec<_> = entries.into_iter().take(limit).collect();

    if !output.is_human() {
        output.json(&json!({
            "last_check": last_check,
            "last_import": last_import,
            "entries": entries,
        }));
        return Ok(());
    }
    if output.is_quiet() {
        return Ok(());
    }

    output.println(format!("Last check:  {}", local_time(last_check)));
    output.println(format!("Last import: {}", local_time(last_import)));
    if entries.is_empty() {
        output.info("No imports recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["When", "Source", "Status", "New", "Updated", "Skipped", "Message"]);
    for entry in &entries {
        let status = match entry.status {
            ImportStatus::Success => Cell::new("ok").fg(Color::Green),
            ImportStatus::Error => Cell::new("error").fg(Color::Red),
        };
        let source = match entry.source {
            ImportSource::Feed => "feed",
            ImportSource::Csv => "csv",
        };
        table.add_row(vec![
            Cell::new(local_time(Some(entry.timestamp))),
            Cell::new(source),
            status,
            Cell::new(entry.imported),
            Cell::new(entry.updated),
            Cell::new(entry.skipped),
            Cell::new(&entry.message),
        ]);
    }
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    println!("{}", table);
    Ok(())
}

fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}
