use std::path::Path;

use chrono::Utc;
use gluco_core::config::ClientConfig;
use gluco_core::models::GlucoseUnit;
use gluco_core::stats::{self, GlucoseStats, TargetRange};

use crate::commands::common::open_store;
use crate::error::CliError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsOptions {
    pub days: Option<u32>,
    pub unit: Option<GlucoseUnit>,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

pub async fn compute_stats(
    options: StatsOptions,
    config: &ClientConfig,
    db_path: &Path,
    now_ms: i64,
) -> Result<(GlucoseStats, GlucoseUnit, u32), CliError> {
    let store = open_store(db_path).await?;
    let settings = store.load_settings().await?;

    let unit = options
        .unit
        .or(config.preferred_unit)
        .unwrap_or(settings.preferred_unit);
    let days = options.days.unwrap_or(settings.report_days);
    let configured = TargetRange::from_settings(&settings, unit);
    let range = TargetRange {
        low: options.low.unwrap_or(configured.low),
        high: options.high.unwrap_or(configured.high),
    };
    if range.low >= range.high {
        return Err(CliError::InvalidRange);
    }

    let from = now_ms.saturating_sub(i64::from(days) * DAY_MS);
    let readings = store.range(from, now_ms).await?;
    Ok((stats::compute(&readings, unit, range), unit, days))
}

pub async fn run_stats(
    options: StatsOptions,
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let (stats, unit, days) =
        compute_stats(options, config, db_path, Utc::now().timestamp_millis()).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.count == 0 {
        println!("No readings in the last {days} days.");
        return Ok(());
    }

    println!("Last {days} days, {} readings ({unit})", stats.count);
    println!("  Mean:          {:.1}", stats.mean);
    println!("  Median:        {:.1}", stats.median);
    println!("  Std deviation: {:.1}", stats.std_dev);
    println!("  CV:            {:.1}%", stats.cv);
    println!("  Range:         {:.1} - {:.1}", stats.min, stats.max);
    println!(
        "  In range:      {:.1}% (above {:.1}%, below {:.1}%)",
        stats.in_range_pct, stats.above_range_pct, stats.below_range_pct
    );
    println!("  Estimated A1C: {:.1}%", stats.estimated_a1c);
    Ok(())
}
