use std::path::Path;

use gluco_core::config::ClientConfig;

use crate::cli::SyncMode;
use crate::commands::common::{finish_sync, open_store, require_engine};
use crate::error::CliError;

pub async fn run_sync(
    mode: SyncMode,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let engine = require_engine(&store, config).await?;

    match mode {
        SyncMode::Push => {
            let summary = engine.push_pending().await;
            let detail = format!("{} pushed, {} failed", summary.success, summary.failed);
            finish_sync(summary.outcome(), &detail, summary.last_error.as_deref())
        }
        SyncMode::Pull | SyncMode::Latest => {
            let summary = if mode == SyncMode::Pull {
                engine.pull_from_remote().await
            } else {
                engine.pull_latest().await
            };
            let detail = format!(
                "{} fetched, {} merged, {} conflicts",
                summary.fetched, summary.merged, summary.conflicts
            );
            finish_sync(summary.outcome(), &detail, summary.last_error.as_deref())
        }
        SyncMode::Full => {
            let summary = engine.full_sync().await;
            let detail = format!(
                "{} pushed, {} failed, {} fetched, {} merged, {} conflicts",
                summary.pushed, summary.failed, summary.fetched, summary.merged, summary.conflicts
            );
            finish_sync(summary.outcome(), &detail, summary.last_error.as_deref())
        }
    }
}
