//! Gluco CLI - Record glucose readings from the terminal
//!
//! Readings are stored locally first and synced with the backend when it is
//! configured and reachable.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use gluco_core::models::ReadingPatch;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConflictCommands, SettingsCommands};
use crate::commands::add::{run_add, AddOptions};
use crate::commands::common::{load_client_config, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{run_conflicts_list, run_conflicts_resolve};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::export::run_export;
use crate::commands::list::run_list;
use crate::commands::settings::{run_settings_set, run_settings_show, SettingsUpdate};
use crate::commands::stats::{run_stats, StatsOptions};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gluco_core=info,gluco_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Add {
            value,
            unit,
            category,
            note,
            at,
            device,
            no_push,
        } => {
            let config = load_client_config(config_path)?;
            let options = AddOptions {
                unit,
                category: category.into(),
                note,
                at,
                device,
                no_push,
            };
            run_add(value, options, &config, &db_path).await?;
        }
        Commands::List {
            limit,
            unsynced,
            json,
        } => run_list(limit, unsynced, json, &db_path).await?,
        Commands::Edit {
            id,
            value,
            unit,
            category,
            note,
        } => {
            let patch = ReadingPatch {
                value,
                unit,
                category: category.map(Into::into),
                note: note.map(|note| {
                    let trimmed = note.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                }),
                ..ReadingPatch::default()
            };
            run_edit(&id, patch, &db_path).await?;
        }
        Commands::Delete { id } => run_delete(&id, &db_path).await?,
        Commands::Sync { mode } => {
            let config = load_client_config(config_path)?;
            run_sync(mode, &config, &db_path).await?;
        }
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { all, limit, json } => {
                run_conflicts_list(all, limit, json, &db_path).await?;
            }
            ConflictCommands::Resolve { id, resolution } => {
                run_conflicts_resolve(id, resolution, &db_path).await?;
            }
        },
        Commands::Stats {
            days,
            unit,
            low,
            high,
            json,
        } => {
            let config = load_client_config(config_path)?;
            let options = StatsOptions {
                days,
                unit,
                low,
                high,
            };
            run_stats(options, json, &config, &db_path).await?;
        }
        Commands::Export {
            days,
            unit,
            format,
            output,
        } => {
            let config = load_client_config(config_path)?;
            run_export(days, unit, format, output.as_deref(), &config, &db_path).await?;
        }
        Commands::Status { json } => {
            let config = load_client_config(config_path)?;
            run_status(json, &config, &db_path).await?;
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Show { json } => run_settings_show(json, &db_path).await?,
            SettingsCommands::Set {
                unit,
                low,
                high,
                days,
            } => {
                let update = SettingsUpdate {
                    unit,
                    low,
                    high,
                    days,
                };
                run_settings_set(update, &db_path).await?;
            }
        },
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
