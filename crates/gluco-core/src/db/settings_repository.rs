//! Settings repository implementation

use std::str::FromStr;

use crate::error::Result;
use crate::models::Settings;
use libsql::Connection;

const KEY_PREFERRED_UNIT: &str = "preferred_unit";
const KEY_TARGET_LOW: &str = "target_low_mg_dl";
const KEY_TARGET_HIGH: &str = "target_high_mg_dl";
const KEY_REPORT_DAYS: &str = "report_days";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<Settings>;

    /// Save settings to the database
    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<Settings> {
        let defaults = Settings::default();
        Ok(Settings {
            preferred_unit: self
                .parsed(KEY_PREFERRED_UNIT)
                .await?
                .unwrap_or(defaults.preferred_unit),
            target_low_mg_dl: self
                .parsed(KEY_TARGET_LOW)
                .await?
                .unwrap_or(defaults.target_low_mg_dl),
            target_high_mg_dl: self
                .parsed(KEY_TARGET_HIGH)
                .await?
                .unwrap_or(defaults.target_high_mg_dl),
            report_days: self
                .parsed(KEY_REPORT_DAYS)
                .await?
                .unwrap_or(defaults.report_days),
        })
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let entries = [
            (KEY_PREFERRED_UNIT, settings.preferred_unit.as_str().to_string()),
            (KEY_TARGET_LOW, settings.target_low_mg_dl.to_string()),
            (KEY_TARGET_HIGH, settings.target_high_mg_dl.to_string()),
            (KEY_REPORT_DAYS, settings.report_days.to_string()),
        ];
        for (key, value) in &entries {
            self.set_setting(key, value).await?;
        }
        Ok(())
    }
}

impl LibSqlSettingsRepository<'_> {
    /// Stored value for `key`; unparseable values read as missing
    async fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get_setting(key)
            .await?
            .and_then(|value| value.parse().ok()))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}
