use std::path::Path;

use gluco_core::models::{ConflictStatus, Resolution, SyncConflict};

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, open_store, ConflictItem,
};
use crate::error::CliError;

pub async fn list_conflicts(
    include_resolved: bool,
    limit: usize,
    db_path: &Path,
) -> Result<Vec<SyncConflict>, CliError> {
    let store = open_store(db_path).await?;
    let mut conflicts = store.list_conflicts(ConflictStatus::Pending, limit).await?;
    if include_resolved {
        let remaining = limit.saturating_sub(conflicts.len());
        conflicts.extend(
            store
                .list_conflicts(ConflictStatus::Resolved, remaining)
                .await?,
        );
    }
    Ok(conflicts)
}

pub async fn run_conflicts_list(
    include_resolved: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let conflicts = list_conflicts(include_resolved, limit, db_path).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    id: i64,
    resolution: Resolution,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    let server_copy = store.resolve_conflict(id, resolution).await?;
    println!("Resolved conflict #{id} with {resolution}");
    if let Some(copy) = server_copy {
        println!("Added server copy as {}", copy.id);
    }
    Ok(())
}
