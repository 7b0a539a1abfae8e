//! Aggregate glucose statistics.
//!
//! Everything here is pure: the same readings, unit, and range always give the
//! same numbers. Outputs are rounded to one decimal, halves away from zero.

#![allow(clippy::cast_precision_loss)] // reading counts are far below 2^52

use serde::{Deserialize, Serialize};

use crate::models::{GlucoseUnit, Reading, Settings};
use crate::util::round_to;

const A1C_OFFSET_MG_DL: f64 = 46.7;
const A1C_DIVISOR: f64 = 28.7;

/// Inclusive target range, in the unit statistics are computed in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub low: f64,
    pub high: f64,
}

impl TargetRange {
    /// Standard 70–180 mg/dL range expressed in `unit`
    pub const fn default_for(unit: GlucoseUnit) -> Self {
        match unit {
            GlucoseUnit::MgDl => Self {
                low: 70.0,
                high: 180.0,
            },
            GlucoseUnit::MmolL => Self {
                low: 3.9,
                high: 10.0,
            },
        }
    }

    /// The user's configured range expressed in `unit`
    pub fn from_settings(settings: &Settings, unit: GlucoseUnit) -> Self {
        Self {
            low: GlucoseUnit::MgDl.convert(settings.target_low_mg_dl, unit),
            high: GlucoseUnit::MgDl.convert(settings.target_high_mg_dl, unit),
        }
    }
}

/// Summary statistics over a set of readings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlucoseStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    /// Coefficient of variation, percent
    pub cv: f64,
    pub min: f64,
    pub max: f64,
    pub in_range_pct: f64,
    pub above_range_pct: f64,
    pub below_range_pct: f64,
    /// Estimated A1C, percent
    pub estimated_a1c: f64,
}

/// Compute statistics over `readings` in `unit`
#[must_use]
pub fn compute(readings: &[Reading], unit: GlucoseUnit, range: TargetRange) -> GlucoseStats {
    if readings.is_empty() {
        return GlucoseStats::default();
    }

    let mut values: Vec<f64> = readings.iter().map(|reading| reading.value_in(unit)).collect();
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std_dev = sample_std_dev(&values, mean);
    let cv = if mean == 0.0 { 0.0 } else { std_dev / mean * 100.0 };

    let below = values.iter().filter(|value| **value < range.low).count();
    let above = values.iter().filter(|value| **value > range.high).count();
    let within = count - below - above;
    let percent = |part: usize| part as f64 / n * 100.0;

    let mean_mg_dl = unit.to_mg_dl(mean);

    GlucoseStats {
        count,
        mean: round_to(mean, 1),
        median: round_to(median(&values), 1),
        std_dev: round_to(std_dev, 1),
        cv: round_to(cv, 1),
        min: round_to(values[0], 1),
        max: round_to(values[count - 1], 1),
        in_range_pct: round_to(percent(within), 1),
        above_range_pct: round_to(percent(above), 1),
        below_range_pct: round_to(percent(below), 1),
        estimated_a1c: round_to(estimated_a1c(mean_mg_dl), 1),
    }
}

/// Estimated A1C (%) for a mean glucose in mg/dL
#[must_use]
pub fn estimated_a1c(mean_mg_dl: f64) -> f64 {
    (mean_mg_dl + A1C_OFFSET_MG_DL) / A1C_DIVISOR
}

/// Median of already sorted values
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => 0.0,
        len if len % 2 == 0 => (sorted[mid - 1] + sorted[mid]) / 2.0,
        _ => sorted[mid],
    }
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let denominator = (values.len() - 1) as f64;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / denominator;
    variance.sqrt()
}
