pub mod add;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod delete;
pub mod edit;
pub mod export;
pub mod list;
pub mod settings;
pub mod stats;
pub mod status;
pub mod sync;
