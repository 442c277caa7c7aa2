use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use skybridge_core::types::{CopyMode, OutcomeKind, PhysicalLabel, ReplicationRun, SyncRun};
use skybridge_core::HybridManager;
use std::process::ExitCode;

/// Outcome rows shown before the rest is elided; `--json` always carries all.
const OUTCOME_DISPLAY_CAP: usize = 50;

pub async fn run_sync(manager: &HybridManager, json: bool) -> Result<ExitCode> {
    let run = manager.run_sync().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_sync_run(&run);
    }

    Ok(if run.halted.is_some() || !run.is_clean() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

pub async fn run_replication(
    manager: &HybridManager,
    source: PhysicalLabel,
    dest: PhysicalLabel,
    mode: Option<CopyMode>,
    json: bool,
) -> Result<ExitCode> {
    let run = manager.run_replication(source, dest, mode).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_replication_run(&run);
    }

    Ok(if run.halted.is_some() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_sync_run(run: &SyncRun) {
    match &run.halted {
        Some(err) => println!("{} {err}", "Sync halted:".red().bold()),
        None => println!("{} Sync finished: {}", "✓".green(), run.summary()),
    }

    if run.outcomes.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Entity", "Outcome", "Local key", "Cloud key", "Detail"]);
    for outcome in run.outcomes.iter().take(OUTCOME_DISPLAY_CAP) {
        let kind = match outcome.kind {
            OutcomeKind::Pushed => Cell::new("pushed").fg(Color::Green),
            OutcomeKind::Pulled => Cell::new("pulled").fg(Color::Green),
            OutcomeKind::Duplicate => Cell::new("duplicate").fg(Color::Yellow),
            OutcomeKind::Reconciled => Cell::new("reconciled").fg(Color::Cyan),
            OutcomeKind::Error => Cell::new("error").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&outcome.entity),
            kind,
            Cell::new(key_text(outcome.local_key)),
            Cell::new(key_text(outcome.cloud_key)),
            Cell::new(outcome.detail.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    if run.outcomes.len() > OUTCOME_DISPLAY_CAP {
        println!(
            "  ... and {} more (use --json for the full log)",
            run.outcomes.len() - OUTCOME_DISPLAY_CAP
        );
    }
}

fn print_replication_run(run: &ReplicationRun) {
    match &run.halted {
        Some(err) => println!("{} {err}", "Replication halted:".red().bold()),
        None => println!("{} Replication finished: {}", "✓".green(), run.summary()),
    }

    if run.tables.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Table",
        "Mode",
        "Source rows",
        "Copied",
        "Destination rows",
        "Result",
    ]);
    for copy in &run.tables {
        let result = match &copy.error {
            Some(message) => Cell::new(message).fg(Color::Red),
            None => Cell::new("ok").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(&copy.table),
            Cell::new(copy.mode),
            Cell::new(copy.source_rows),
            Cell::new(copy.copied),
            Cell::new(copy.destination_rows),
            result,
        ]);
    }
    println!("{table}");
}

fn key_text(key: Option<i64>) -> String {
    key.map_or_else(|| "-".to_string(), |k| k.to_string())
}
