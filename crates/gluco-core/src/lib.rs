//! gluco-core - Core library for Gluco
//!
//! This crate contains the shared models, local store, and offline sync engine
//! used by all Gluco interfaces. Readings are written locally first and pushed
//! to the backend when it is reachable; server changes are merged back in.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod live;
pub mod models;
pub mod network;
pub mod services;
pub mod stats;
pub mod sync;
pub mod util;

pub use config::{ClientConfig, SyncConfig};
pub use error::{Error, Result};
pub use live::{LiveQuery, LiveStream};
pub use models::{
    GlucoseStatus, GlucoseUnit, NewReading, Reading, ReadingCategory, ReadingId, ReadingPatch,
    ReadingSource, Resolution, SyncConflict,
};
pub use network::{NetworkEvent, NetworkMonitor, NetworkStatus};
pub use services::ReadingStore;
pub use sync::{PullSummary, PushSummary, SyncEngine, SyncOutcome, SyncSummary};
