//! Reconciliation of server records with the local store.
//!
//! Identity is resolved in order: a local reading already linked to the remote
//! id, then an unsynced and unlinked local reading with an equal value inside
//! the tolerance window, and finally a brand-new synced reading.

use libsql::Connection;

use crate::db::{
    LibSqlConflictRepository, LibSqlQueueRepository, LibSqlReadingRepository, ReadingRepository,
};
use crate::error::Result;
use crate::models::{Reading, RemoteReading, Resolution, SyncConflict, SyncOperation};

/// How a pull treats diverging readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Half-width of the heuristic match window (ms)
    pub tolerance_ms: i64,
    /// Full pulls record conflicts; the latest-only pull lets the server win
    pub create_conflicts: bool,
}

/// Per-record outcome counters of a merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub fetched: usize,
    pub inserted: usize,
    pub linked: usize,
    pub overwritten: usize,
    pub marked_synced: usize,
    pub conflicts: usize,
    pub unchanged: usize,
}

impl MergeReport {
    /// Records that changed local state
    pub const fn merged(&self) -> usize {
        self.inserted + self.linked + self.overwritten + self.marked_synced
    }
}

/// Decision for a server record whose remote id is already linked locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedAction {
    Conflict,
    MarkSynced,
    Overwrite,
    Unchanged,
}

/// Decide what to do with `remote` given the local reading linked to it
pub fn classify_linked(
    local: &Reading,
    remote: &RemoteReading,
    create_conflicts: bool,
) -> LinkedAction {
    // Local tombstones are never resurrected
    if local.is_deleted {
        return LinkedAction::Unchanged;
    }

    let differs = local.snapshot().differs_from(remote);
    if local.synced {
        if differs || local.timestamp != remote.timestamp {
            LinkedAction::Overwrite
        } else {
            LinkedAction::Unchanged
        }
    } else if !differs {
        LinkedAction::MarkSynced
    } else if create_conflicts {
        LinkedAction::Conflict
    } else {
        LinkedAction::Overwrite
    }
}

/// Apply a batch of server records; the caller owns the transaction
pub(crate) async fn merge_records(
    conn: &Connection,
    records: &[RemoteReading],
    options: MergeOptions,
) -> Result<MergeReport> {
    let readings = LibSqlReadingRepository::new(conn);
    let queue = LibSqlQueueRepository::new(conn);
    let conflicts = LibSqlConflictRepository::new(conn);
    let mut report = MergeReport {
        fetched: records.len(),
        ..MergeReport::default()
    };

    for remote in records {
        if let Some(mut local) = readings.find_by_remote_id(remote.remote_id).await? {
            match classify_linked(&local, remote, options.create_conflicts) {
                LinkedAction::Conflict => {
                    conflicts.record(&local.id, &local.snapshot(), remote).await?;
                    report.conflicts += 1;
                }
                LinkedAction::MarkSynced => {
                    // The server already holds these values
                    queue.remove_for_reading(&local.id).await?;
                    readings.mark_synced(&local.id, None).await?;
                    report.marked_synced += 1;
                }
                LinkedAction::Overwrite => {
                    local.overwrite_from_remote(remote);
                    readings.save(&local).await?;
                    report.overwritten += 1;
                }
                LinkedAction::Unchanged => report.unchanged += 1,
            }
            continue;
        }

        let candidate = readings
            .find_link_candidate(remote.value, remote.timestamp, options.tolerance_ms)
            .await?;
        if let Some(mut local) = candidate {
            tracing::debug!(
                "Linking local reading {} to remote {} (Δt {} ms)",
                local.id,
                remote.remote_id,
                remote.timestamp - local.timestamp
            );
            local.remote_id = Some(remote.remote_id);
            local.timestamp = remote.timestamp;
            local.synced = true;
            local.updated_at = crate::util::now_ms();
            queue.remove_for_reading(&local.id).await?;
            readings.save(&local).await?;
            report.linked += 1;
        } else {
            readings.add(&Reading::from_remote(remote)).await?;
            report.inserted += 1;
        }
    }

    Ok(report)
}

/// Apply the storage side of a conflict resolution; the caller owns the
/// transaction. Returns the server copy inserted by `KeepBoth`.
pub(crate) async fn apply_resolution(
    conn: &Connection,
    conflict: &SyncConflict,
    resolution: Resolution,
) -> Result<Option<Reading>> {
    let readings = LibSqlReadingRepository::new(conn);
    let queue = LibSqlQueueRepository::new(conn);
    let conflicts = LibSqlConflictRepository::new(conn);

    let local = readings
        .get_any(&conflict.reading_id)
        .await?
        .filter(|reading| !reading.is_deleted);
    let mut server_copy = None;

    match resolution {
        Resolution::KeepMine | Resolution::KeepBoth => {
            if let Some(mut local) = local {
                local.synced = false;
                local.updated_at = crate::util::now_ms();
                readings.save(&local).await?;
                queue
                    .enqueue(&local.id, &SyncOperation::Update(local.snapshot()))
                    .await?;
            }

            if resolution == Resolution::KeepBoth {
                // The remote id stays with the original reading
                let mut copy = Reading::from_remote(&conflict.remote);
                copy.remote_id = None;
                readings.add(&copy).await?;
                server_copy = Some(copy);
            }
        }
        Resolution::KeepServer => {
            if let Some(mut local) = local {
                queue.remove_for_reading(&local.id).await?;
                local.overwrite_from_remote(&conflict.remote);
                readings.save(&local).await?;
            }
        }
    }

    conflicts.mark_resolved(conflict.id, resolution).await?;
    conflicts.insert_audit(conflict, resolution).await?;
    Ok(server_copy)
}
