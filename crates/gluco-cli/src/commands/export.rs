use std::path::Path;

use gluco_core::config::ClientConfig;
use gluco_core::db::{ReadingFilter, ReadingQuery};
use gluco_core::export::{build_report, render_report, GlucoseReport, ReportOptions};
use gluco_core::models::{GlucoseUnit, ReadingSource};

use crate::cli::ExportFormat;
use crate::commands::common::open_store;
use crate::error::CliError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub async fn build_export_report(
    days: Option<u32>,
    unit: Option<GlucoseUnit>,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<GlucoseReport, CliError> {
    let store = open_store(db_path).await?;
    let settings = store.load_settings().await?;
    let options = ReportOptions {
        days: days.unwrap_or(settings.report_days),
        unit: unit
            .or(config.preferred_unit)
            .unwrap_or(settings.preferred_unit),
    };

    let newest_manual = ReadingQuery::new(ReadingFilter {
        source: Some(ReadingSource::Manual),
        ..ReadingFilter::default()
    })
    .limit(1);
    let readings = match store.query(&newest_manual).await?.first() {
        Some(anchor) => {
            let from = anchor
                .timestamp
                .saturating_sub(i64::from(options.days) * DAY_MS);
            store.range(from, anchor.timestamp).await?
        }
        None => Vec::new(),
    };

    Ok(build_report(&readings, options))
}

pub async fn run_export(
    days: Option<u32>,
    unit: Option<GlucoseUnit>,
    format: ExportFormat,
    output_path: Option<&Path>,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let report = build_export_report(days, unit, config, db_path).await?;
    let rendered = render_report(&report, format.into())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
