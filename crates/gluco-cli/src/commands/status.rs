use std::path::Path;
use std::sync::Arc;

use gluco_core::config::ClientConfig;
use gluco_core::db::ReadingFilter;
use gluco_core::network::{HttpProbe, NetworkMonitor};
use serde::Serialize;

use crate::commands::common::open_store;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub readings: usize,
    pub unsynced: usize,
    pub pending_queue: usize,
    pub pending_conflicts: usize,
    /// `None` when no backend is configured
    pub network: Option<String>,
    pub schema_version: i32,
}

pub async fn collect_status(
    config: &ClientConfig,
    db_path: &Path,
) -> Result<StatusReport, CliError> {
    let store = open_store(db_path).await?;

    let network = match config.api_base_url.clone() {
        Some(base_url) => {
            let monitor = NetworkMonitor::new(
                Arc::new(HttpProbe::new(base_url)?),
                config.sync_config().connectivity_timeout,
            );
            Some(monitor.current_status().await.as_str().to_string())
        }
        None => None,
    };

    Ok(StatusReport {
        readings: store.count(&ReadingFilter::default()).await?,
        unsynced: store
            .count(&ReadingFilter {
                synced: Some(false),
                ..ReadingFilter::default()
            })
            .await?,
        pending_queue: store.pending_count().await?,
        pending_conflicts: store.pending_conflict_count().await?,
        network,
        schema_version: store.schema_version().await?,
    })
}

pub async fn run_status(
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let status = collect_status(config, db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Database:          {}", db_path.display());
    println!("Readings:          {}", status.readings);
    println!("Unsynced:          {}", status.unsynced);
    println!("Queued changes:    {}", status.pending_queue);
    println!("Pending conflicts: {}", status.pending_conflicts);
    println!(
        "Network:           {}",
        status.network.as_deref().unwrap_or("not configured")
    );
    Ok(())
}
