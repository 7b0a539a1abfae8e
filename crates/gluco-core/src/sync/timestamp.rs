//! Backend timestamp handling.
//!
//! The backend writes `DD/MM/YYYY HH:mm:ss` in a fixed UTC offset that is not
//! the device's. Parsing always applies that offset explicitly.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::config::DEFAULT_REMOTE_UTC_OFFSET_MINUTES;
use crate::sync::remote::RemoteError;

const REMOTE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Converts between Unix milliseconds and the backend's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteClock {
    offset: FixedOffset,
}

impl Default for RemoteClock {
    fn default() -> Self {
        Self::from_offset_minutes(DEFAULT_REMOTE_UTC_OFFSET_MINUTES)
    }
}

impl RemoteClock {
    /// Clock at `minutes` east of UTC; out-of-range offsets fall back to UTC
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!("Invalid remote UTC offset {minutes} min; using UTC");
                Utc.fix()
            });
        Self { offset }
    }

    /// Offset in minutes east of UTC
    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// Parse a backend timestamp into Unix milliseconds.
    ///
    /// Accepts the local `DD/MM/YYYY HH:mm:ss` format, RFC 3339, and naive
    /// ISO-8601 (`YYYY-MM-DDTHH:mm:ss`) which is read in the remote offset.
    pub fn parse(&self, raw: &str) -> Result<i64, RemoteError> {
        let raw = raw.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(instant.timestamp_millis());
        }

        let naive = NaiveDateTime::parse_from_str(raw, REMOTE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(|_| RemoteError::InvalidPayload(format!("unrecognised timestamp '{raw}'")))?;

        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|instant| instant.timestamp_millis())
            .ok_or_else(|| RemoteError::InvalidPayload(format!("ambiguous timestamp '{raw}'")))
    }

    /// Format Unix milliseconds as ISO-8601 in the remote offset
    pub fn format(&self, timestamp_ms: i64) -> String {
        let instant = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .unwrap_or_default();
        instant
            .with_timezone(&self.offset)
            .to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}
