//! Glucose measurement vocabulary: units, derived status, categories

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// mg/dL per mmol/L
pub const MGDL_PER_MMOLL: f64 = 18.0;

/// Measurement unit of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GlucoseUnit {
    /// Milligrams per decilitre
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    /// Millimoles per litre
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl GlucoseUnit {
    /// Convert `value` expressed in `self` into `target`
    #[must_use]
    pub fn convert(self, value: f64, target: Self) -> f64 {
        match (self, target) {
            (Self::MgDl, Self::MmolL) => value / MGDL_PER_MMOLL,
            (Self::MmolL, Self::MgDl) => value * MGDL_PER_MMOLL,
            _ => value,
        }
    }

    /// Convert `value` expressed in `self` into mg/dL
    #[must_use]
    pub fn to_mg_dl(self, value: f64) -> f64 {
        self.convert(value, Self::MgDl)
    }

    /// Decimal places used when presenting values in this unit
    #[must_use]
    pub const fn precision(self) -> u32 {
        match self {
            Self::MgDl => 1,
            Self::MmolL => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::MmolL => "mmol/L",
        }
    }
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlucoseUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" | "mg" => Ok(Self::MgDl),
            "mmol/l" | "mmoll" | "mmol" => Ok(Self::MmolL),
            other => Err(format!("unknown glucose unit '{other}'")),
        }
    }
}

/// Clinical classification of a reading, derived from value and unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseStatus {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

impl GlucoseStatus {
    /// Classify a value against fixed thresholds (54 / 70 / 180 / 250 mg/dL)
    #[must_use]
    pub fn classify(value: f64, unit: GlucoseUnit) -> Self {
        let mg_dl = unit.to_mg_dl(value);
        if mg_dl < 54.0 {
            Self::VeryLow
        } else if mg_dl < 70.0 {
            Self::Low
        } else if mg_dl <= 180.0 {
            Self::Normal
        } else if mg_dl <= 250.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for GlucoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlucoseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "very_low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "very_high" => Ok(Self::VeryHigh),
            other => Err(format!("unknown glucose status '{other}'")),
        }
    }
}

/// Context tag attached to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingCategory {
    Fasting,
    BeforeMeal,
    AfterMeal,
    Bedtime,
    Random,
    #[default]
    #[serde(other)]
    Other,
}

impl ReadingCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fasting => "fasting",
            Self::BeforeMeal => "before_meal",
            Self::AfterMeal => "after_meal",
            Self::Bedtime => "bedtime",
            Self::Random => "random",
            Self::Other => "other",
        }
    }

    /// Lenient parse used for wire and storage values; unknown tags map to `Other`
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fasting" => Self::Fasting,
            "before_meal" | "pre_meal" => Self::BeforeMeal,
            "after_meal" | "post_meal" => Self::AfterMeal,
            "bedtime" => Self::Bedtime,
            "random" => Self::Random,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ReadingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    /// Entered by the user
    #[default]
    Manual,
    /// Imported from a meter or sensor
    Device,
}

impl ReadingSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Device => "device",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("device") {
            Self::Device
        } else {
            Self::Manual
        }
    }
}
