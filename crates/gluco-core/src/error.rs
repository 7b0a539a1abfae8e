//! Error types for gluco-core

use thiserror::Error;

use crate::sync::RemoteError;

/// Result type alias using gluco-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gluco-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same local identifier already exists
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote service error
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
