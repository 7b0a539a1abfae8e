//! Sync queue repository
//!
//! Drained entries move into the `sync_inflight` journal in the same
//! transaction that clears them from `sync_queue`, and stay there until the
//! batch is settled. An interrupted batch is therefore never lost: on restart
//! `restore_inflight` moves the journal back into the queue.

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{QueueEntry, ReadingId, RemoteId, SyncOperation};

use super::repository::LibSqlReadingRepository;
use super::rows::{in_transaction, opt_text, opt_value, parse_column};

const QUEUE_COLUMNS: &str = "id, reading_id, op, payload, created_at, retry_count, last_error";

/// Result of pushing one drained entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// The backend accepted the entry (or it needed no network call)
    Succeeded {
        entry: QueueEntry,
        remote_id: Option<RemoteId>,
    },
    /// The call failed; the entry is retried until the ceiling is reached
    Failed { entry: QueueEntry, error: String },
}

/// What settling a batch did to the queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettleReport {
    pub succeeded: usize,
    pub requeued: usize,
    /// Entries that hit the retry ceiling and were discarded
    pub dropped: Vec<QueueEntry>,
}

/// libSQL repository for the pending-mutation queue
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<QueueEntry> {
        let reading_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let payload = opt_text(row, 3)?;
        let retry_count: i64 = row.get(5)?;

        Ok(QueueEntry {
            id: row.get(0)?,
            reading_id: parse_column(&reading_id, "reading id")?,
            operation: SyncOperation::from_parts(&kind, payload.as_deref())?,
            created_at: row.get(4)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: opt_text(row, 6)?,
        })
    }

    async fn fetch(&self, table: &str) -> Result<Vec<QueueEntry>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM {table} ORDER BY created_at ASC, id ASC");
        let mut rows = self.conn.query(&sql, ()).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    /// Append a pending mutation; returns the queue row id
    pub async fn enqueue(&self, reading_id: &ReadingId, operation: &SyncOperation) -> Result<i64> {
        let now = crate::util::now_ms();
        self.conn
            .execute(
                "INSERT INTO sync_queue (reading_id, op, payload, created_at, retry_count)
                 VALUES (?, ?, ?, ?, 0)",
                libsql::params![
                    reading_id.as_str(),
                    operation.kind(),
                    opt_value(operation.payload_json()?),
                    now,
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All queued entries, oldest first
    pub async fn list(&self) -> Result<Vec<QueueEntry>> {
        self.fetch("sync_queue").await
    }

    /// Entries drained but not yet settled
    pub async fn list_inflight(&self) -> Result<Vec<QueueEntry>> {
        self.fetch("sync_inflight").await
    }

    /// Number of queued entries
    pub async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| Error::Database(format!("invalid count {count}")))
    }

    /// Drop queued (not in-flight) entries for one reading
    pub async fn remove_for_reading(&self, reading_id: &ReadingId) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE reading_id = ?",
                [reading_id.as_str()],
            )
            .await?;
        usize::try_from(removed)
            .map_err(|_| Error::Database(format!("invalid row count {removed}")))
    }

    /// Atomically take every queued entry, parking it in the in-flight journal
    pub async fn drain(&self) -> Result<Vec<QueueEntry>> {
        in_transaction(self.conn, |conn| async move {
            let repo = LibSqlQueueRepository::new(conn);
            let entries = repo.fetch("sync_queue").await?;
            if entries.is_empty() {
                return Ok(entries);
            }

            conn.execute(
                &format!(
                    "INSERT INTO sync_inflight ({QUEUE_COLUMNS})
                     SELECT {QUEUE_COLUMNS} FROM sync_queue"
                ),
                (),
            )
            .await?;
            conn.execute("DELETE FROM sync_queue", ()).await?;
            Ok(entries)
        })
        .await
    }

    /// Apply the outcome of a pushed batch in one transaction.
    ///
    /// Successes mark their reading synced (attaching the remote id when the
    /// reading has none yet). Failures are re-queued with an incremented retry
    /// counter while it stays below `max_retries`, and dropped otherwise.
    pub async fn settle(
        &self,
        outcomes: &[EntryOutcome],
        max_retries: u32,
    ) -> Result<SettleReport> {
        in_transaction(self.conn, |conn| async move {
            let readings = LibSqlReadingRepository::new(conn);
            let mut report = SettleReport::default();

            for outcome in outcomes {
                match outcome {
                    EntryOutcome::Succeeded { entry, remote_id } => {
                        remove_inflight(conn, entry.id).await?;
                        if !matches!(entry.operation, SyncOperation::Delete) {
                            readings.mark_synced(&entry.reading_id, *remote_id).await?;
                        }
                        report.succeeded += 1;
                    }
                    EntryOutcome::Failed { entry, error } => {
                        remove_inflight(conn, entry.id).await?;
                        let retry_count = entry.retry_count.saturating_add(1);
                        if retry_count < max_retries {
                            conn.execute(
                                "INSERT INTO sync_queue
                                     (reading_id, op, payload, created_at, retry_count, last_error)
                                 VALUES (?, ?, ?, ?, ?, ?)",
                                libsql::params![
                                    entry.reading_id.as_str(),
                                    entry.operation.kind(),
                                    opt_value(entry.operation.payload_json()?),
                                    entry.created_at,
                                    i64::from(retry_count),
                                    error.as_str(),
                                ],
                            )
                            .await?;
                            report.requeued += 1;
                        } else {
                            let mut dropped = entry.clone();
                            dropped.retry_count = retry_count;
                            dropped.last_error = Some(error.clone());
                            report.dropped.push(dropped);
                        }
                    }
                }
            }

            Ok(report)
        })
        .await
    }

    /// Move journal entries left by an interrupted batch back into the queue
    pub async fn restore_inflight(&self) -> Result<usize> {
        in_transaction(self.conn, |conn| async move {
            let restored = conn
                .execute(
                    &format!(
                        "INSERT INTO sync_queue ({QUEUE_COLUMNS})
                         SELECT {QUEUE_COLUMNS} FROM sync_inflight"
                    ),
                    (),
                )
                .await?;
            conn.execute("DELETE FROM sync_inflight", ()).await?;
            usize::try_from(restored)
                .map_err(|_| Error::Database(format!("invalid row count {restored}")))
        })
        .await
    }
}

async fn remove_inflight(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM sync_inflight WHERE id = ?", [id])
        .await?;
    Ok(())
}
