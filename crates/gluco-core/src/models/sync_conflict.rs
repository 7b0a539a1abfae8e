//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::reading::{ReadingId, ReadingSnapshot, RemoteReading};

/// Lifecycle of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown conflict status '{other}'")),
        }
    }
}

/// Human decision applied to a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local version and push it again
    KeepMine,
    /// Replace the local version with the server's
    KeepServer,
    /// Keep the local version and add the server's as a separate reading
    KeepBoth,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepMine => "keep_mine",
            Self::KeepServer => "keep_server",
            Self::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_mine" | "mine" | "local" => Ok(Self::KeepMine),
            "keep_server" | "server" | "remote" | "theirs" => Ok(Self::KeepServer),
            "keep_both" | "both" => Ok(Self::KeepBoth),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Diverging local and server versions of the same reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Local reading involved in the conflict
    pub reading_id: ReadingId,
    /// Local version at detection time
    pub local: ReadingSnapshot,
    /// Incoming server version
    pub remote: RemoteReading,
    pub status: ConflictStatus,
    pub resolution: Option<Resolution>,
    /// Detection timestamp (unix ms)
    pub created_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
}

/// Audit record written whenever a conflict is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAudit {
    pub id: i64,
    pub conflict_id: i64,
    pub reading_id: ReadingId,
    pub resolution: Resolution,
    pub local: ReadingSnapshot,
    pub remote: RemoteReading,
    pub created_at: i64,
}
