//! User preference model

use serde::{Deserialize, Serialize};

use super::glucose::GlucoseUnit;

/// Locally stored user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Unit used for display, statistics, and reports
    pub preferred_unit: GlucoseUnit,
    /// Lower bound of the target range (mg/dL)
    pub target_low_mg_dl: f64,
    /// Upper bound of the target range (mg/dL)
    pub target_high_mg_dl: f64,
    /// Default lookback window for reports, in days
    pub report_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preferred_unit: GlucoseUnit::MgDl,
            target_low_mg_dl: 70.0,
            target_high_mg_dl: 180.0,
            report_days: 14,
        }
    }
}
