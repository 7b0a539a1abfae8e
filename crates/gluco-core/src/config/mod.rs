//! Engine tunables and client configuration.
//!
//! `SyncConfig` holds the knobs of the sync engine. `ClientConfig` is the
//! JSON/env document a client uses to reach the backend. Secrets other than the
//! API token never belong here.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::GlucoseUnit;
use crate::util::{is_http_url, normalize_text_option};

/// Fixed UTC offset of timestamps emitted by the backend (UTC−03:00)
pub const DEFAULT_REMOTE_UTC_OFFSET_MINUTES: i32 = -180;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PULL_LIMIT: usize = 200;
const DEFAULT_MATCH_TOLERANCE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// Sync engine tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Failed pushes per entry before it is dropped
    pub max_retries: u32,
    /// Most server records processed by one pull
    pub pull_limit: usize,
    /// Window for matching an unlinked local reading to a server record
    pub match_tolerance: Duration,
    /// Offset the backend's local-format timestamps are written in
    pub remote_utc_offset_minutes: i32,
    /// Upper bound on a connectivity check
    pub connectivity_timeout: Duration,
    /// Upper bound on a single backend call
    pub network_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            pull_limit: DEFAULT_PULL_LIMIT,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            remote_utc_offset_minutes: DEFAULT_REMOTE_UTC_OFFSET_MINUTES,
            connectivity_timeout: DEFAULT_CONNECTIVITY_TIMEOUT,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_pull_limit(mut self, pull_limit: usize) -> Self {
        self.pull_limit = pull_limit;
        self
    }

    #[must_use]
    pub const fn with_match_tolerance(mut self, tolerance: Duration) -> Self {
        self.match_tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_remote_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.remote_utc_offset_minutes = minutes;
        self
    }

    #[must_use]
    pub const fn with_connectivity_timeout(mut self, timeout: Duration) -> Self {
        self.connectivity_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Match tolerance in milliseconds, saturating
    pub fn match_tolerance_ms(&self) -> i64 {
        i64::try_from(self.match_tolerance.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Client configuration document.
///
/// Loaded from a JSON file or the `GLUCO_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub remote_utc_offset_minutes: Option<i32>,
    #[serde(default)]
    pub preferred_unit: Option<GlucoseUnit>,
}

impl ClientConfig {
    /// Read `GLUCO_API_URL`, `GLUCO_API_TOKEN`, `GLUCO_UTC_OFFSET_MINUTES`
    /// and `GLUCO_UNIT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let remote_utc_offset_minutes = normalize_text_option(lookup("GLUCO_UTC_OFFSET_MINUTES"))
            .map(|raw| {
                raw.parse::<i32>().map_err(|_| {
                    Error::InvalidInput(format!(
                        "GLUCO_UTC_OFFSET_MINUTES is not an integer: {raw}"
                    ))
                })
            })
            .transpose()?;
        let preferred_unit = normalize_text_option(lookup("GLUCO_UNIT"))
            .map(|raw| raw.parse::<GlucoseUnit>().map_err(Error::InvalidInput))
            .transpose()?;

        Self {
            api_base_url: lookup("GLUCO_API_URL"),
            api_token: lookup("GLUCO_API_TOKEN"),
            remote_utc_offset_minutes,
            preferred_unit,
        }
        .normalized()
    }

    /// Load a JSON configuration file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.normalized()
    }

    /// Fill unset fields from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            api_base_url: self.api_base_url.or(other.api_base_url),
            api_token: self.api_token.or(other.api_token),
            remote_utc_offset_minutes: self
                .remote_utc_offset_minutes
                .or(other.remote_utc_offset_minutes),
            preferred_unit: self.preferred_unit.or(other.preferred_unit),
        }
    }

    /// Trim values, drop empties, and validate the base URL.
    pub fn normalized(self) -> Result<Self> {
        let api_base_url = normalize_text_option(self.api_base_url)
            .map(|url| {
                if is_http_url(&url) {
                    Ok(url.trim_end_matches('/').to_string())
                } else {
                    Err(Error::InvalidInput(format!(
                        "api_base_url must include http:// or https://: {url}"
                    )))
                }
            })
            .transpose()?;

        Ok(Self {
            api_base_url,
            api_token: normalize_text_option(self.api_token),
            remote_utc_offset_minutes: self.remote_utc_offset_minutes,
            preferred_unit: self.preferred_unit,
        })
    }

    /// Engine tunables with this document's overrides applied
    pub fn sync_config(&self) -> SyncConfig {
        let config = SyncConfig::default();
        match self.remote_utc_offset_minutes {
            Some(minutes) => config.with_remote_utc_offset_minutes(minutes),
            None => config,
        }
    }
}
