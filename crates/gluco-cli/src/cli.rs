use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use gluco_core::models::{GlucoseUnit, ReadingCategory, Resolution};

#[derive(Parser)]
#[command(name = "gluco")]
#[command(about = "Track glucose readings offline and sync them when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// JSON client configuration (overrides GLUCO_* variables)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a new reading
    #[command(alias = "new")]
    Add {
        /// Measured value
        value: f64,
        /// Unit of the value (mg/dL or mmol/L); defaults to the preferred unit
        #[arg(short, long)]
        unit: Option<GlucoseUnit>,
        /// Reading context
        #[arg(short, long, value_enum, default_value_t = CategoryArg::Other)]
        category: CategoryArg,
        /// Free-form note
        #[arg(short, long)]
        note: Option<String>,
        /// Measurement time (RFC 3339 or "YYYY-MM-DD HH:MM" local); defaults to now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
        /// Mark the reading as imported from a device
        #[arg(long)]
        device: bool,
        /// Only queue the reading; do not push it now
        #[arg(long)]
        no_push: bool,
    },
    /// List recent readings
    List {
        /// Number of readings to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only readings not yet acknowledged by the server
        #[arg(long)]
        unsynced: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing reading
    Edit {
        /// Reading ID
        id: String,
        #[arg(long)]
        value: Option<f64>,
        #[arg(short, long)]
        unit: Option<GlucoseUnit>,
        #[arg(short, long, value_enum)]
        category: Option<CategoryArg>,
        /// New note; pass an empty string to clear it
        #[arg(short, long)]
        note: Option<String>,
    },
    /// Delete a reading
    Delete {
        /// Reading ID
        id: String,
    },
    /// Synchronize with the backend
    Sync {
        #[arg(value_enum, default_value_t = SyncMode::Full)]
        mode: SyncMode,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Show statistics over recent readings
    Stats {
        /// Lookback window in days; defaults to the report setting
        #[arg(short, long)]
        days: Option<u32>,
        #[arg(short, long)]
        unit: Option<GlucoseUnit>,
        /// Lower bound of the target range, in the chosen unit
        #[arg(long)]
        low: Option<f64>,
        /// Upper bound of the target range, in the chosen unit
        #[arg(long)]
        high: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a report of manual readings
    Export {
        /// Lookback window in days; defaults to the report setting
        #[arg(short, long)]
        days: Option<u32>,
        #[arg(short, long)]
        unit: Option<GlucoseUnit>,
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Show queue, conflict, and connectivity status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change stored preferences
    #[command(alias = "config")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts (pending only unless --all)
    List {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending conflict
    Resolve {
        /// Conflict ID
        id: i64,
        /// mine, server, or both
        resolution: Resolution,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show the stored settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change one or more settings
    Set {
        /// Preferred unit for display, statistics, and reports
        #[arg(short, long)]
        unit: Option<GlucoseUnit>,
        /// Lower bound of the target range, in the preferred unit
        #[arg(long)]
        low: Option<f64>,
        /// Upper bound of the target range, in the preferred unit
        #[arg(long)]
        high: Option<f64>,
        /// Default report window in days
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SyncMode {
    /// Push queued changes only
    Push,
    /// Pull every server reading, recording conflicts
    Pull,
    /// Pull only the most recent server readings; the server wins
    Latest,
    /// Push, then pull
    Full,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CategoryArg {
    Fasting,
    BeforeMeal,
    AfterMeal,
    Bedtime,
    Random,
    Other,
}

impl From<CategoryArg> for ReadingCategory {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Fasting => Self::Fasting,
            CategoryArg::BeforeMeal => Self::BeforeMeal,
            CategoryArg::AfterMeal => Self::AfterMeal,
            CategoryArg::Bedtime => Self::Bedtime,
            CategoryArg::Random => Self::Random,
            CategoryArg::Other => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl From<ExportFormat> for gluco_core::export::ExportFormat {
    fn from(value: ExportFormat) -> Self {
        match value {
            ExportFormat::Json => Self::Json,
            ExportFormat::Markdown => Self::Markdown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
