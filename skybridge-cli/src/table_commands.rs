use anyhow::Result;
use colored::Colorize;
use skybridge_core::types::NodeIdentity;
use skybridge_core::HybridManager;
use std::process::ExitCode;

use crate::cli::TableCommands;

pub async fn handle(manager: &HybridManager, cmd: TableCommands) -> Result<ExitCode> {
    match cmd {
        TableCommands::List { node } => list(manager, node.into()).await,
        TableCommands::Compare { left, right } => {
            compare(manager, left.into(), right.into()).await
        }
    }
}

async fn list(manager: &HybridManager, node: NodeIdentity) -> Result<ExitCode> {
    let tables = manager.list_tables(node).await?;
    if tables.is_empty() {
        println!("{}", "No base tables.".yellow());
        return Ok(ExitCode::SUCCESS);
    }
    for name in &tables {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn compare(
    manager: &HybridManager,
    left: NodeIdentity,
    right: NodeIdentity,
) -> Result<ExitCode> {
    let diff = manager.compare_schemas(left, right).await?;
    if diff.is_empty() {
        println!(
            "{} Schemas agree: no tables missing on either node",
            "✓".green()
        );
        return Ok(ExitCode::SUCCESS);
    }
    for name in &diff.missing_on_a {
        println!("missing on {left}: {}", name.red());
    }
    for name in &diff.missing_on_b {
        println!("missing on {right}: {}", name.red());
    }
    Ok(ExitCode::SUCCESS)
}
