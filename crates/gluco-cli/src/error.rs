use std::io;

use gluco_core::sync::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] gluco_core::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid reading ID: {0}")]
    InvalidReadingId(String),
    #[error("Reading not found: {0}")]
    ReadingNotFound(String),
    #[error("Invalid time '{0}'; use RFC 3339 or \"YYYY-MM-DD HH:MM\"")]
    InvalidTime(String),
    #[error("Nothing to change; pass --value, --unit, --category, or --note")]
    EmptyEdit,
    #[error("Invalid target range: low must be below high")]
    InvalidRange,
    #[error("Report window must be at least one day")]
    InvalidReportDays,
    #[error("Nothing to change; pass --unit, --low, --high, or --days")]
    EmptySettingsUpdate,
    #[error("{0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Set GLUCO_API_URL (and GLUCO_API_TOKEN) \
         or pass --config with api_base_url."
    )]
    SyncNotConfigured,
}
