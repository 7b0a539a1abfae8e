use std::path::Path;

use gluco_core::models::{GlucoseUnit, Settings};

use crate::commands::common::{format_value, open_store};
use crate::error::CliError;

/// Requested changes; unset fields keep their stored value
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsUpdate {
    pub unit: Option<GlucoseUnit>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub days: Option<u32>,
}

impl SettingsUpdate {
    fn is_empty(&self) -> bool {
        self.unit.is_none() && self.low.is_none() && self.high.is_none() && self.days.is_none()
    }
}

/// Apply `update` to `current`; bounds are read in the resulting preferred unit
pub fn apply_update(current: &Settings, update: SettingsUpdate) -> Result<Settings, CliError> {
    let unit = update.unit.unwrap_or(current.preferred_unit);
    let low = update
        .low
        .map_or(current.target_low_mg_dl, |low| unit.to_mg_dl(low));
    let high = update
        .high
        .map_or(current.target_high_mg_dl, |high| unit.to_mg_dl(high));
    if low <= 0.0 || low >= high {
        return Err(CliError::InvalidRange);
    }

    let report_days = update.days.unwrap_or(current.report_days);
    if report_days == 0 {
        return Err(CliError::InvalidReportDays);
    }

    Ok(Settings {
        preferred_unit: unit,
        target_low_mg_dl: low,
        target_high_mg_dl: high,
        report_days,
    })
}

pub async fn update_settings(update: SettingsUpdate, db_path: &Path) -> Result<Settings, CliError> {
    if update.is_empty() {
        return Err(CliError::EmptySettingsUpdate);
    }

    let store = open_store(db_path).await?;
    let settings = apply_update(&store.load_settings().await?, update)?;
    store.save_settings(&settings).await?;
    Ok(settings)
}

pub async fn run_settings_show(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let settings = store.load_settings().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        print_settings(&settings);
    }
    Ok(())
}

pub async fn run_settings_set(update: SettingsUpdate, db_path: &Path) -> Result<(), CliError> {
    let settings = update_settings(update, db_path).await?;
    println!("Settings saved");
    print_settings(&settings);
    Ok(())
}

fn print_settings(settings: &Settings) {
    let unit = settings.preferred_unit;
    let low = GlucoseUnit::MgDl.convert(settings.target_low_mg_dl, unit);
    let high = GlucoseUnit::MgDl.convert(settings.target_high_mg_dl, unit);

    println!("  Preferred unit: {unit}");
    println!(
        "  Target range:   {} - {}",
        format_value(low, unit),
        format_value(high, unit)
    );
    println!("  Report window:  {} days", settings.report_days);
}
