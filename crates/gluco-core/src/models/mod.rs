//! Data models for Gluco

mod glucose;
mod queue;
mod reading;
mod settings;
mod sync_conflict;

pub use glucose::{GlucoseStatus, GlucoseUnit, ReadingCategory, ReadingSource, MGDL_PER_MMOLL};
pub use queue::{QueueEntry, SyncOperation};
pub use reading::{
    NewReading, Reading, ReadingId, ReadingPatch, ReadingSnapshot, RemoteId, RemoteReading,
    VALUE_EPSILON_MG_DL,
};
pub use settings::Settings;
pub use sync_conflict::{ConflictAudit, ConflictStatus, Resolution, SyncConflict};
