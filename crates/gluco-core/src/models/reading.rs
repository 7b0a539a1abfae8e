//! Glucose reading model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::glucose::{GlucoseStatus, GlucoseUnit, ReadingCategory, ReadingSource};

/// Two values closer than this (in mg/dL) are considered equal
pub const VALUE_EPSILON_MG_DL: f64 = 0.05;

/// Server-assigned identifier of a reading
pub type RemoteId = i64;

/// A unique identifier for a reading, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadingId(Uuid);

impl ReadingId {
    /// Create a new unique reading ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ReadingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReadingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A glucose reading in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Client-generated identifier, stable for the reading's lifetime
    pub id: ReadingId,
    /// Identifier assigned by the backend once it accepted the reading
    pub remote_id: Option<RemoteId>,
    /// Measurement time (Unix ms)
    pub timestamp: i64,
    pub value: f64,
    pub unit: GlucoseUnit,
    /// Derived from value and unit, never set directly
    pub status: GlucoseStatus,
    pub note: Option<String>,
    pub category: ReadingCategory,
    pub source: ReadingSource,
    /// Whether the backend has acknowledged the current contents
    pub synced: bool,
    /// Soft delete flag for sync
    pub is_deleted: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Reading {
    /// Build an unsynced reading from user input
    #[must_use]
    pub fn new(input: NewReading) -> Self {
        let now = crate::util::now_ms();
        Self {
            id: ReadingId::new(),
            remote_id: None,
            timestamp: input.timestamp.unwrap_or(now),
            value: input.value,
            unit: input.unit,
            status: GlucoseStatus::classify(input.value, input.unit),
            note: normalize_note(input.note),
            category: input.category,
            source: input.source,
            synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a synced reading from a server record
    #[must_use]
    pub fn from_remote(remote: &RemoteReading) -> Self {
        let now = crate::util::now_ms();
        Self {
            id: ReadingId::new(),
            remote_id: Some(remote.remote_id),
            timestamp: remote.timestamp,
            value: remote.value,
            unit: GlucoseUnit::MgDl,
            status: GlucoseStatus::classify(remote.value, GlucoseUnit::MgDl),
            note: normalize_note(remote.note.clone()),
            category: remote.category,
            source: ReadingSource::Manual,
            synced: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Value expressed in mg/dL
    #[must_use]
    pub fn value_mg_dl(&self) -> f64 {
        self.unit.to_mg_dl(self.value)
    }

    /// Value expressed in `unit`
    #[must_use]
    pub fn value_in(&self, unit: GlucoseUnit) -> f64 {
        self.unit.convert(self.value, unit)
    }

    /// Apply a partial update, recomputing the derived status
    pub fn apply(&mut self, patch: &ReadingPatch) {
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(unit) = patch.unit {
            self.unit = unit;
        }
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(note) = &patch.note {
            self.note = normalize_note(note.clone());
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        self.status = GlucoseStatus::classify(self.value, self.unit);
        self.synced = false;
        self.updated_at = crate::util::now_ms();
    }

    /// Overwrite mutable fields with the server's version (server wins)
    pub fn overwrite_from_remote(&mut self, remote: &RemoteReading) {
        self.value = remote.value;
        self.unit = GlucoseUnit::MgDl;
        self.timestamp = remote.timestamp;
        self.note = normalize_note(remote.note.clone());
        self.category = remote.category;
        self.status = GlucoseStatus::classify(self.value, self.unit);
        self.synced = true;
        self.updated_at = crate::util::now_ms();
    }

    /// Capture the fields that travel to the backend
    #[must_use]
    pub fn snapshot(&self) -> ReadingSnapshot {
        ReadingSnapshot {
            value: self.value,
            unit: self.unit,
            timestamp: self.timestamp,
            note: self.note.clone(),
            category: self.category,
        }
    }
}

/// User input for a new reading
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewReading {
    pub value: f64,
    pub unit: GlucoseUnit,
    /// Measurement time (Unix ms); defaults to now
    pub timestamp: Option<i64>,
    pub note: Option<String>,
    pub category: ReadingCategory,
    pub source: ReadingSource,
}

impl NewReading {
    /// Reading of `value` in `unit`, taken now
    #[must_use]
    pub fn new(value: f64, unit: GlucoseUnit) -> Self {
        Self {
            value,
            unit,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub const fn with_category(mut self, category: ReadingCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub const fn with_source(mut self, source: ReadingSource) -> Self {
        self.source = source;
        self
    }

    /// Reject values that cannot be a glucose measurement
    pub fn validate(&self) -> crate::Result<()> {
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(crate::Error::InvalidInput(format!(
                "glucose value must be a positive number, got {}",
                self.value
            )));
        }
        Ok(())
    }
}

/// Partial update of a reading; `None` leaves the field untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingPatch {
    pub value: Option<f64>,
    pub unit: Option<GlucoseUnit>,
    pub timestamp: Option<i64>,
    /// `Some(None)` clears the note
    pub note: Option<Option<String>>,
    pub category: Option<ReadingCategory>,
}

impl ReadingPatch {
    pub const fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.unit.is_none()
            && self.timestamp.is_none()
            && self.note.is_none()
            && self.category.is_none()
    }
}

/// The fields of a reading sent to the backend; stored as the queue payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSnapshot {
    pub value: f64,
    pub unit: GlucoseUnit,
    pub timestamp: i64,
    pub note: Option<String>,
    pub category: ReadingCategory,
}

impl ReadingSnapshot {
    /// Whether any mutable field disagrees with the server's version.
    ///
    /// Timestamps are not compared: the remote format loses sub-second
    /// precision and routinely drifts by the offset applied on parse.
    #[must_use]
    pub fn differs_from(&self, remote: &RemoteReading) -> bool {
        let value_differs =
            (self.unit.to_mg_dl(self.value) - remote.value).abs() >= VALUE_EPSILON_MG_DL;
        value_differs
            || self.category != remote.category
            || normalize_note(self.note.clone()) != normalize_note(remote.note.clone())
    }
}

/// A reading as reported by the backend (values always in mg/dL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteReading {
    pub remote_id: RemoteId,
    pub value: f64,
    /// Measurement time (Unix ms), already normalised from the remote clock
    pub timestamp: i64,
    pub note: Option<String>,
    pub category: ReadingCategory,
}

fn normalize_note(note: Option<String>) -> Option<String> {
    crate::util::normalize_text_option(note)
}
