//! Pending mutation queue model

use serde::{Deserialize, Serialize};

use super::reading::{ReadingId, ReadingSnapshot};

/// A local mutation awaiting acknowledgement by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum SyncOperation {
    Create(ReadingSnapshot),
    Update(ReadingSnapshot),
    Delete,
}

impl SyncOperation {
    /// Stored in the `op` column
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }

    /// Value snapshot carried by create/update entries
    pub const fn snapshot(&self) -> Option<&ReadingSnapshot> {
        match self {
            Self::Create(snapshot) | Self::Update(snapshot) => Some(snapshot),
            Self::Delete => None,
        }
    }

    /// Rebuild an operation from its stored column pair
    pub fn from_parts(kind: &str, payload: Option<&str>) -> crate::Result<Self> {
        let snapshot = || -> crate::Result<ReadingSnapshot> {
            let raw = payload.ok_or_else(|| {
                crate::Error::Database(format!("queue entry '{kind}' is missing its payload"))
            })?;
            Ok(serde_json::from_str(raw)?)
        };

        match kind {
            "create" => Ok(Self::Create(snapshot()?)),
            "update" => Ok(Self::Update(snapshot()?)),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::Database(format!(
                "unknown queue operation '{other}'"
            ))),
        }
    }

    /// JSON payload column for this operation
    pub fn payload_json(&self) -> crate::Result<Option<String>> {
        self.snapshot()
            .map(serde_json::to_string)
            .transpose()
            .map_err(Into::into)
    }
}

/// One row of the sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue row identifier
    pub id: i64,
    pub reading_id: ReadingId,
    pub operation: SyncOperation,
    /// When the mutation was first enqueued (Unix ms); kept across retries
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}
