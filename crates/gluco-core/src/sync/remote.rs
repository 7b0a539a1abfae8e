//! Backend contract consumed by the sync engine.
//!
//! The backend is append-only from the client's point of view: it can create
//! readings and list them, but exposes no update or delete.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{ReadingCategory, ReadingSnapshot, RemoteId, RemoteReading};

/// Failure talking to the backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Invalid server payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Whether retrying the same request could succeed.
    ///
    /// The push path currently retries every failure up to the ceiling.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Rejected(_) | Self::InvalidPayload(_) | Self::InvalidConfiguration(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Values submitted to create a reading on the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteCreate {
    /// Always in mg/dL
    pub value: f64,
    pub category: ReadingCategory,
    /// Measurement time (Unix ms)
    pub timestamp: Option<i64>,
    pub note: Option<String>,
}

impl RemoteCreate {
    pub fn from_snapshot(snapshot: &ReadingSnapshot) -> Self {
        Self {
            value: snapshot.unit.to_mg_dl(snapshot.value),
            category: snapshot.category,
            timestamp: Some(snapshot.timestamp),
            note: snapshot.note.clone(),
        }
    }
}

/// Backend operations used by push and pull
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create a reading, returning its server id
    async fn create_reading(&self, reading: &RemoteCreate) -> Result<RemoteId, RemoteError>;

    /// Every reading of the authenticated user
    async fn list_mine(&self) -> Result<Vec<RemoteReading>, RemoteError>;

    /// The most recent readings only
    async fn list_latest(&self) -> Result<Vec<RemoteReading>, RemoteError>;
}

/// Refreshes server-derived profile fields after a successful push
#[async_trait]
pub trait ProfileRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), RemoteError>;
}
