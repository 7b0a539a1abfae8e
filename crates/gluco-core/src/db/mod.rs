//! Database layer for Gluco

mod conflict_repository;
mod connection;
pub mod migrations;
mod queue_repository;
mod repository;
mod rows;
mod settings_repository;

pub use conflict_repository::LibSqlConflictRepository;
pub use connection::Database;
pub use queue_repository::{EntryOutcome, LibSqlQueueRepository, SettleReport};
pub use repository::{
    LibSqlReadingRepository, ReadingFilter, ReadingQuery, ReadingRepository, SortOrder,
};
pub(crate) use rows::in_transaction;
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
