use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use skybridge_core::config::{resolve_config_path, save_config};
use skybridge_core::types::{AppConfig, Reachability};
use skybridge_core::HybridManager;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { force } => init_config(cli.config, force),
        command => {
            let manager = HybridManager::start(cli.config).await?;
            let code = run(&manager, command).await?;
            manager.close_tunnels();
            Ok(code)
        }
    }
}

async fn run(manager: &HybridManager, command: Commands) -> Result<ExitCode> {
    match command {
        // Init is handled before the manager starts; it never reaches here
        Commands::Init { .. } => Ok(ExitCode::SUCCESS),
        Commands::Status { json } => status(manager, json).await,
        Commands::Sync { json } => crate::sync_commands::run_sync(manager, json).await,
        Commands::Swap => swap(manager).await,
        Commands::Replicate {
            source,
            dest,
            mode,
            json,
        } => {
            crate::sync_commands::run_replication(
                manager,
                source.into(),
                dest.into(),
                mode.map(Into::into),
                json,
            )
            .await
        }
        Commands::Tables(cmd) => crate::table_commands::handle(manager, cmd).await,
        Commands::User(cmd) => crate::account_commands::handle(manager, cmd).await,
    }
}

fn init_config(explicit: Option<PathBuf>, force: bool) -> Result<ExitCode> {
    let path = resolve_config_path(explicit)?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    save_config(&path, &AppConfig::default())?;
    println!("{} Wrote starter config to {}", "✓".green(), path.display());
    println!("  Fill in [nodes.hostek], [nodes.vps], and [ssh] before first use.");
    Ok(ExitCode::SUCCESS)
}

async fn status(manager: &HybridManager, json: bool) -> Result<ExitCode> {
    let status = manager.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Skybridge Cluster".cyan().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Node",
        "Role",
        "Endpoint",
        "Dialect",
        "Reachability",
        "Tunnel",
    ]);
    for node in &status.nodes {
        let reachability = match node.reachability {
            Reachability::Reachable => Cell::new("reachable").fg(Color::Green),
            Reachability::Unreachable => Cell::new("unreachable").fg(Color::Red),
            Reachability::Unknown => Cell::new("unknown").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(node.label.as_str()),
            Cell::new(node.role.to_string()),
            Cell::new(node.endpoint.to_string()),
            Cell::new(node.dialect.to_string()),
            reachability,
            Cell::new(
                node.tunnel_port
                    .map_or_else(|| "-".to_string(), |p| format!("127.0.0.1:{p}")),
            ),
        ]);
    }
    println!("{table}");

    println!("  Identity node: {}", status.identity);
    match &status.last_sync {
        Some(at) => println!("  Last sync: {at}"),
        None => println!("  Last sync: {}", "never".yellow()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn swap(manager: &HybridManager) -> Result<ExitCode> {
    let before = manager.current_primary().await;
    let now = manager.swap_roles().await?;
    println!("{} Primary moved: {before} -> {now}", "✓".green());
    Ok(ExitCode::SUCCESS)
}
