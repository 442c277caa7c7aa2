use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use skybridge_core::types::{IdentityError, UserRole};
use skybridge_core::{HybridManager, IdentityHandle};
use std::process::ExitCode;

use crate::cli::UserCommands;

pub async fn handle(manager: &HybridManager, cmd: UserCommands) -> Result<ExitCode> {
    let identity = manager.identity().await?;
    match cmd {
        UserCommands::List { json } => list(&identity, json).await,
        UserCommands::Add {
            username,
            role,
            password,
        } => add(&identity, &username, role.into(), password).await,
        UserCommands::Delete { username } => delete(&identity, &username).await,
        UserCommands::ResetPassword { username, password } => {
            reset_password(&identity, &username, password).await
        }
        UserCommands::SetRole { username, role } => {
            set_role(&identity, &username, role.into()).await
        }
        UserCommands::Verify { username, password } => {
            verify(&identity, &username, password).await
        }
    }
}

async fn list(identity: &IdentityHandle<'_>, json: bool) -> Result<ExitCode> {
    let accounts = identity.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(ExitCode::SUCCESS);
    }
    if accounts.is_empty() {
        println!("{}", "No accounts.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Username", "Role", "Created"]);
    for account in &accounts {
        let role = match account.role {
            UserRole::Admin => Cell::new("admin").fg(Color::Cyan),
            UserRole::User => Cell::new("user"),
        };
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(&account.username),
            role,
            Cell::new(account.created_at.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    println!("\n{} account(s) total", accounts.len());
    Ok(ExitCode::SUCCESS)
}

async fn add(
    identity: &IdentityHandle<'_>,
    username: &str,
    role: UserRole,
    password: Option<String>,
) -> Result<ExitCode> {
    let password = password_arg(password)?;
    let account = identity.add(username, &password, role).await?;
    println!(
        "{} Account created: {} ({})",
        "✓".green(),
        account.username.green(),
        account.role
    );
    Ok(ExitCode::SUCCESS)
}

async fn delete(identity: &IdentityHandle<'_>, username: &str) -> Result<ExitCode> {
    identity.delete(username).await?;
    println!("{} Account deleted: {username}", "✓".green());
    Ok(ExitCode::SUCCESS)
}

async fn reset_password(
    identity: &IdentityHandle<'_>,
    username: &str,
    password: Option<String>,
) -> Result<ExitCode> {
    let password = password_arg(password)?;
    identity.reset_password(username, &password).await?;
    println!("{} Password reset for {username}", "✓".green());
    Ok(ExitCode::SUCCESS)
}

async fn set_role(
    identity: &IdentityHandle<'_>,
    username: &str,
    role: UserRole,
) -> Result<ExitCode> {
    identity.update_role(username, role).await?;
    println!("{} Role for {username} set to {role}", "✓".green());
    Ok(ExitCode::SUCCESS)
}

async fn verify(
    identity: &IdentityHandle<'_>,
    username: &str,
    password: Option<String>,
) -> Result<ExitCode> {
    let password = password_arg(password)?;
    match identity.verify(username, &password).await {
        Ok(account) => {
            println!(
                "{} Credentials valid for {} ({})",
                "✓".green(),
                account.username,
                account.role
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(IdentityError::AuthFailure { .. }) => {
            println!("{}", "Authentication failed".red());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

/// `--password` if given, otherwise one line from stdin (so passwords can be
/// piped in instead of living in shell history).
fn password_arg(provided: Option<String>) -> Result<String> {
    if let Some(password) = provided {
        return Ok(password);
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading password from stdin")?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        anyhow::bail!("empty password");
    }
    Ok(trimmed.to_string())
}
