//! Services shared by the sync engine and clients

mod reading_store;

pub use reading_store::{ReadingPages, ReadingStore};
