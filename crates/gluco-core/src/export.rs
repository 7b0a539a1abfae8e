//! Report export shared by all clients.
//!
//! A report covers the `days` before the newest manual reading, not before
//! "now", so the same data always yields the same report.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GlucoseStatus, GlucoseUnit, Reading, ReadingCategory, ReadingSource};
use crate::util::round_to;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Export output format shared by all clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Window and unit of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub days: u32,
    pub unit: GlucoseUnit,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            days: 14,
            unit: GlucoseUnit::MgDl,
        }
    }
}

/// One reading as it appears in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub timestamp: i64,
    pub value: f64,
    pub status: GlucoseStatus,
    pub category: ReadingCategory,
    pub note: Option<String>,
}

/// Unit-converted summary of manual readings in a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReport {
    pub unit: GlucoseUnit,
    pub days: u32,
    /// Window start (Unix ms); `None` when there are no manual readings
    pub from: Option<i64>,
    /// Newest manual reading (Unix ms)
    pub to: Option<i64>,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Newest first
    pub rows: Vec<ReportRow>,
}

/// Build a report from `readings` (any order, any source).
#[must_use]
pub fn build_report(readings: &[Reading], options: ReportOptions) -> GlucoseReport {
    let unit = options.unit;
    let precision = unit.precision();

    let manual = readings
        .iter()
        .filter(|reading| reading.source == ReadingSource::Manual && !reading.is_deleted);
    let Some(anchor) = manual.clone().map(|reading| reading.timestamp).max() else {
        return GlucoseReport {
            unit,
            days: options.days,
            from: None,
            to: None,
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            rows: Vec::new(),
        };
    };
    let from = anchor.saturating_sub(i64::from(options.days) * DAY_MS);

    let mut window: Vec<&Reading> = manual
        .filter(|reading| reading.timestamp >= from && reading.timestamp <= anchor)
        .collect();
    window.sort_by_key(|reading| std::cmp::Reverse(reading.timestamp));

    let values: Vec<f64> = window.iter().map(|reading| reading.value_in(unit)).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    let rows = window
        .iter()
        .zip(&values)
        .map(|(reading, value)| ReportRow {
            timestamp: reading.timestamp,
            value: round_to(*value, precision),
            status: reading.status,
            category: reading.category,
            note: reading.note.clone(),
        })
        .collect();

    GlucoseReport {
        unit,
        days: options.days,
        from: Some(from),
        to: Some(anchor),
        count: values.len(),
        min: round_to(min, precision),
        max: round_to(max, precision),
        mean: round_to(mean, precision),
        rows,
    }
}

/// Render a report as pretty-printed JSON.
pub fn render_json_report(report: &GlucoseReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Render a report as a Markdown document with a summary and a table.
#[must_use]
pub fn render_markdown_report(report: &GlucoseReport) -> String {
    let precision = report.unit.precision() as usize;
    let unit = report.unit;
    let mut output = String::new();

    let _ = writeln!(output, "# Glucose report");
    let _ = writeln!(output);
    match (report.from, report.to) {
        (Some(from), Some(to)) => {
            let _ = writeln!(
                output,
                "Period: {} to {} UTC ({} days)",
                format_timestamp(from),
                format_timestamp(to),
                report.days
            );
        }
        _ => {
            let _ = writeln!(output, "No manual readings recorded.");
            return output;
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "- Readings: {}", report.count);
    let _ = writeln!(output, "- Mean: {:.precision$} {unit}", report.mean);
    let _ = writeln!(output, "- Min: {:.precision$} {unit}", report.min);
    let _ = writeln!(output, "- Max: {:.precision$} {unit}", report.max);
    let _ = writeln!(output);
    let _ = writeln!(output, "| Time (UTC) | Value ({unit}) | Status | Category | Note |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for row in &report.rows {
        let note = row
            .note
            .as_deref()
            .map(|note| note.replace('|', "\\|").replace('\n', " "))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "| {} | {:.precision$} | {} | {} | {} |",
            format_timestamp(row.timestamp),
            row.value,
            row.status,
            row.category,
            note
        );
    }

    output
}

/// Render a report in the selected format.
pub fn render_report(report: &GlucoseReport, format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_report(report),
        ExportFormat::Markdown => Ok(render_markdown_report(report)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_report_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("gluco-report-{timestamp_ms}.{}", format.extension())
}
