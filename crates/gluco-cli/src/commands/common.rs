use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use gluco_core::config::ClientConfig;
use gluco_core::models::{GlucoseUnit, Reading, ReadingId, SyncConflict};
use gluco_core::network::{HttpProbe, NetworkMonitor};
use gluco_core::sync::{HttpRemoteService, RemoteClock, SyncEngine, SyncOutcome};
use gluco_core::ReadingStore;
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ReadingListItem {
    pub id: String,
    pub remote_id: Option<i64>,
    pub timestamp: i64,
    pub timestamp_iso: String,
    pub value: f64,
    pub unit: String,
    pub status: String,
    pub category: String,
    pub source: String,
    pub note: Option<String>,
    pub synced: bool,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: i64,
    pub reading_id: String,
    pub status: String,
    pub local_value: f64,
    pub local_unit: String,
    pub local_timestamp: i64,
    pub remote_id: i64,
    pub remote_value_mg_dl: f64,
    pub remote_timestamp: i64,
    pub resolution: Option<String>,
    pub created_at: i64,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("GLUCO_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gluco")
        .join("gluco.db")
}

/// Config file values first, then `GLUCO_*` variables
pub fn load_client_config(config_path: Option<&Path>) -> Result<ClientConfig, CliError> {
    let from_env = ClientConfig::from_env()?;
    match config_path {
        Some(path) => Ok(ClientConfig::load_from_path(path)?.or(from_env)),
        None => Ok(from_env),
    }
}

pub async fn open_store(db_path: &Path) -> Result<ReadingStore, CliError> {
    Ok(ReadingStore::open_path(db_path).await?)
}

/// Engine for the configured backend, or `None` when no API URL is set
pub async fn build_engine(
    store: &ReadingStore,
    config: &ClientConfig,
) -> Result<Option<SyncEngine>, CliError> {
    let Some(base_url) = config.api_base_url.clone() else {
        return Ok(None);
    };
    let sync_config = config.sync_config();

    let remote = HttpRemoteService::new(
        base_url.clone(),
        config.api_token.clone(),
        RemoteClock::from_offset_minutes(sync_config.remote_utc_offset_minutes),
        sync_config.network_timeout,
    )?;
    let monitor = NetworkMonitor::new(
        Arc::new(HttpProbe::new(base_url)?),
        sync_config.connectivity_timeout,
    );

    let engine = SyncEngine::builder(store.clone(), Arc::new(remote))
        .config(sync_config)
        .network_monitor(monitor)
        .build()
        .await?;
    Ok(Some(engine))
}

pub async fn require_engine(
    store: &ReadingStore,
    config: &ClientConfig,
) -> Result<SyncEngine, CliError> {
    build_engine(store, config)
        .await?
        .ok_or(CliError::SyncNotConfigured)
}

pub fn parse_reading_id(raw: &str) -> Result<ReadingId, CliError> {
    raw.trim()
        .parse::<ReadingId>()
        .map_err(|_| CliError::InvalidReadingId(raw.trim().to_string()))
}

/// Parse RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` in local time, to Unix ms
pub fn parse_time(raw: &str) -> Result<i64, CliError> {
    let trimmed = raw.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(time.timestamp_millis());
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|time| time.timestamp_millis())
        .ok_or_else(|| CliError::InvalidTime(trimmed.to_string()))
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn format_value(value: f64, unit: GlucoseUnit) -> String {
    let precision = unit.precision() as usize;
    format!("{value:.precision$} {unit}")
}

pub fn format_reading_lines(readings: &[Reading]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    readings
        .iter()
        .map(|reading| {
            let sync_marker = if reading.synced { " " } else { "*" };
            let value = format_value(reading.value, reading.unit);
            let relative_time = format_relative_time(reading.timestamp, now_ms);
            let line = format!(
                "{sync_marker} {}  {value:>12}  {:<9}  {:<11}  {relative_time}",
                reading.id, reading.status, reading.category
            );
            match &reading.note {
                Some(note) => format!("{line}  {note}"),
                None => line,
            }
        })
        .collect()
}

pub fn reading_to_list_item(reading: &Reading) -> ReadingListItem {
    ReadingListItem {
        id: reading.id.to_string(),
        remote_id: reading.remote_id,
        timestamp: reading.timestamp,
        timestamp_iso: format_timestamp(reading.timestamp),
        value: reading.value,
        unit: reading.unit.to_string(),
        status: reading.status.to_string(),
        category: reading.category.to_string(),
        source: reading.source.as_str().to_string(),
        note: reading.note.clone(),
        synced: reading.synced,
        relative_time: format_relative_time(reading.timestamp, Utc::now().timestamp_millis()),
    }
}

pub fn conflict_to_item(conflict: &SyncConflict) -> ConflictItem {
    ConflictItem {
        id: conflict.id,
        reading_id: conflict.reading_id.to_string(),
        status: conflict.status.as_str().to_string(),
        local_value: conflict.local.value,
        local_unit: conflict.local.unit.to_string(),
        local_timestamp: conflict.local.timestamp,
        remote_id: conflict.remote.remote_id,
        remote_value_mg_dl: conflict.remote.value,
        remote_timestamp: conflict.remote.timestamp,
        resolution: conflict.resolution.map(|resolution| resolution.to_string()),
        created_at: conflict.created_at,
    }
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let resolution = conflict
                .resolution
                .map_or_else(|| "pending".to_string(), |resolution| resolution.to_string());
            format!(
                "#{:<4} {:<11} reading={}  local={} @ {}  server={} @ {}",
                conflict.id,
                resolution,
                conflict.reading_id,
                format_value(conflict.local.value, conflict.local.unit),
                format_timestamp(conflict.local.timestamp),
                format_value(conflict.remote.value, GlucoseUnit::MgDl),
                format_timestamp(conflict.remote.timestamp),
            )
        })
        .collect()
}

/// Map a sync outcome to a process result; only outright failure is an error
pub fn finish_sync(
    outcome: SyncOutcome,
    detail: &str,
    last_error: Option<&str>,
) -> Result<(), CliError> {
    match outcome {
        SyncOutcome::Failed => Err(CliError::SyncFailed(format!(
            "{}: {}",
            outcome.message(),
            last_error.unwrap_or("unknown error")
        ))),
        SyncOutcome::PartialSuccess => {
            println!("{} ({detail})", outcome.message());
            if let Some(error) = last_error {
                println!("Last error: {error}");
            }
            Ok(())
        }
        SyncOutcome::NothingToSync | SyncOutcome::Completed => {
            println!("{} ({detail})", outcome.message());
            Ok(())
        }
    }
}
