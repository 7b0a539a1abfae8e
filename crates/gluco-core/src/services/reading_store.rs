//! Shared reading store used by the sync engine and clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::db::{
    in_transaction, Database, EntryOutcome, LibSqlConflictRepository, LibSqlQueueRepository,
    LibSqlReadingRepository, LibSqlSettingsRepository, ReadingFilter, ReadingQuery,
    ReadingRepository, SettingsRepository, SettleReport, SortOrder,
};
use crate::models::{
    ConflictAudit, ConflictStatus, NewReading, QueueEntry, Reading, ReadingId, ReadingPatch,
    ReadingSnapshot, RemoteReading, Resolution, Settings, SyncConflict, SyncOperation,
};
use crate::sync::merge::{self, MergeOptions, MergeReport};
use crate::{Error, Result};

/// Thread-safe handle over the local database.
///
/// Every successful mutation bumps a revision counter that live queries
/// listen to.
#[derive(Clone)]
pub struct ReadingStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    revision: Arc<watch::Sender<u64>>,
}

impl ReadingStore {
    /// Open a store at the given filesystem path, creating parent directories.
    ///
    /// A file that is not a database is moved aside and replaced by a fresh one.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            revision: Arc::new(revision),
        }
    }

    /// Filesystem location, if the store is file-backed
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = crate::util::now_ms();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        // WAL and shared-memory sidecars belong to the old file
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local DB file {}", path.display());
            }
        }

        Ok(())
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    /// Receiver that changes whenever the store is mutated
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i32> {
        let db = self.db.lock().await;
        db.schema_version().await
    }

    // -- readings ----------------------------------------------------------

    /// Insert a reading as-is; fails with `DuplicateKey` if the id exists.
    pub async fn add(&self, reading: &Reading) -> Result<()> {
        {
            let db = self.db.lock().await;
            LibSqlReadingRepository::new(db.connection())
                .add(reading)
                .await?;
        }
        self.notify();
        Ok(())
    }

    /// Fetch a live reading by id.
    pub async fn get(&self, id: &ReadingId) -> Result<Option<Reading>> {
        let db = self.db.lock().await;
        LibSqlReadingRepository::new(db.connection()).get(id).await
    }

    /// Merge a patch into a reading without queueing it.
    pub async fn update(&self, id: &ReadingId, patch: &ReadingPatch) -> Result<Reading> {
        let reading = {
            let db = self.db.lock().await;
            LibSqlReadingRepository::new(db.connection())
                .update(id, patch)
                .await?
        };
        self.notify();
        Ok(reading)
    }

    /// Soft-delete a reading without queueing it.
    pub async fn delete(&self, id: &ReadingId) -> Result<()> {
        {
            let db = self.db.lock().await;
            LibSqlReadingRepository::new(db.connection())
                .delete(id)
                .await?;
        }
        self.notify();
        Ok(())
    }

    /// Run a filtered, ordered, paginated query.
    pub async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let db = self.db.lock().await;
        LibSqlReadingRepository::new(db.connection())
            .query(query)
            .await
    }

    /// Count readings matching `filter`.
    pub async fn count(&self, filter: &ReadingFilter) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlReadingRepository::new(db.connection())
            .count(filter)
            .await
    }

    /// Lazily page through `query`, `page_size` readings at a time.
    pub fn pages(&self, query: ReadingQuery, page_size: usize) -> ReadingPages {
        ReadingPages::new(self.clone(), query, page_size)
    }

    /// Live readings with `from_ms <= timestamp <= to_ms`, oldest first.
    pub async fn range(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Reading>> {
        let filter = ReadingFilter {
            from: Some(from_ms),
            to: Some(to_ms),
            ..ReadingFilter::default()
        };
        let mut readings = Vec::new();
        let mut pages = self.pages(ReadingQuery::new(filter).order(SortOrder::OldestFirst), 500);
        while let Some(page) = pages.next_page().await? {
            readings.extend(page);
        }
        Ok(readings)
    }

    /// Record a new reading and queue it for push in one transaction.
    pub async fn create_reading(&self, input: NewReading) -> Result<Reading> {
        input.validate()?;
        let reading = Reading::new(input);
        {
            let db = self.db.lock().await;
            let new_reading = &reading;
            in_transaction(db.connection(), |conn| async move {
                LibSqlReadingRepository::new(conn).add(new_reading).await?;
                LibSqlQueueRepository::new(conn)
                    .enqueue(&new_reading.id, &SyncOperation::Create(new_reading.snapshot()))
                    .await?;
                Ok(())
            })
            .await?;
        }
        self.notify();
        Ok(reading)
    }

    /// Edit a reading and queue the new version in one transaction.
    pub async fn edit_reading(&self, id: &ReadingId, patch: &ReadingPatch) -> Result<Reading> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }

        let reading = {
            let db = self.db.lock().await;
            in_transaction(db.connection(), |conn| async move {
                let reading = LibSqlReadingRepository::new(conn).update(id, patch).await?;
                LibSqlQueueRepository::new(conn)
                    .enqueue(id, &SyncOperation::Update(reading.snapshot()))
                    .await?;
                Ok(reading)
            })
            .await?
        };
        self.notify();
        Ok(reading)
    }

    /// Soft-delete a reading and queue the deletion in one transaction.
    pub async fn remove_reading(&self, id: &ReadingId) -> Result<()> {
        {
            let db = self.db.lock().await;
            in_transaction(db.connection(), |conn| async move {
                LibSqlReadingRepository::new(conn).delete(id).await?;
                LibSqlQueueRepository::new(conn)
                    .enqueue(id, &SyncOperation::Delete)
                    .await?;
                Ok(())
            })
            .await?;
        }
        self.notify();
        Ok(())
    }

    // -- queue -------------------------------------------------------------

    /// Append a pending mutation.
    pub async fn enqueue(&self, reading_id: &ReadingId, operation: &SyncOperation) -> Result<i64> {
        let id = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .enqueue(reading_id, operation)
                .await?
        };
        self.notify();
        Ok(id)
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).count().await
    }

    /// Queued mutations, oldest first.
    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list().await
    }

    /// Take the whole queue into the in-flight journal.
    pub async fn drain_queue(&self) -> Result<Vec<QueueEntry>> {
        let entries = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection()).drain().await?
        };
        if !entries.is_empty() {
            self.notify();
        }
        Ok(entries)
    }

    /// Record the outcome of a pushed batch.
    pub async fn settle_batch(
        &self,
        outcomes: &[EntryOutcome],
        max_retries: u32,
    ) -> Result<SettleReport> {
        let report = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .settle(outcomes, max_retries)
                .await?
        };
        self.notify();
        Ok(report)
    }

    /// Return entries of an interrupted batch to the queue.
    pub async fn restore_inflight(&self) -> Result<usize> {
        let restored = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .restore_inflight()
                .await?
        };
        if restored > 0 {
            tracing::info!("Restored {restored} interrupted sync queue entries");
            self.notify();
        }
        Ok(restored)
    }

    // -- conflicts ---------------------------------------------------------

    /// Record (or refresh) the pending conflict for a reading.
    pub async fn insert_conflict(
        &self,
        reading_id: &ReadingId,
        local: &ReadingSnapshot,
        remote: &RemoteReading,
    ) -> Result<i64> {
        let id = {
            let db = self.db.lock().await;
            LibSqlConflictRepository::new(db.connection())
                .record(reading_id, local, remote)
                .await?
        };
        self.notify();
        Ok(id)
    }

    /// Fetch a conflict by id.
    pub async fn get_conflict(&self, id: i64) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).get(id).await
    }

    /// Conflicts with `status`, oldest first.
    pub async fn list_conflicts(
        &self,
        status: ConflictStatus,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(status, limit)
            .await
    }

    /// Number of unresolved conflicts.
    pub async fn pending_conflict_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .pending_count()
            .await
    }

    /// Close a pending conflict without touching its reading.
    pub async fn mark_conflict_resolved(&self, id: i64, resolution: Resolution) -> Result<()> {
        {
            let db = self.db.lock().await;
            LibSqlConflictRepository::new(db.connection())
                .mark_resolved(id, resolution)
                .await?;
        }
        self.notify();
        Ok(())
    }

    /// Append an audit record for a conflict.
    pub async fn insert_audit(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
    ) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .insert_audit(conflict, resolution)
            .await
    }

    /// Most recent audit records.
    pub async fn list_audit(&self, limit: usize) -> Result<Vec<ConflictAudit>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_audit(limit)
            .await
    }

    // -- reconciliation ----------------------------------------------------

    /// Merge server records in one transaction.
    pub async fn merge_remote(
        &self,
        records: &[RemoteReading],
        options: MergeOptions,
    ) -> Result<MergeReport> {
        let report = {
            let db = self.db.lock().await;
            in_transaction(db.connection(), |conn| {
                merge::merge_records(conn, records, options)
            })
            .await?
        };
        if report.merged() > 0 || report.conflicts > 0 {
            self.notify();
        }
        Ok(report)
    }

    /// Apply a conflict resolution, close the conflict, and audit it.
    pub async fn apply_resolution(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
    ) -> Result<Option<Reading>> {
        let server_copy = {
            let db = self.db.lock().await;
            in_transaction(db.connection(), |conn| {
                merge::apply_resolution(conn, conflict, resolution)
            })
            .await?
        };
        self.notify();
        Ok(server_copy)
    }

    /// Validate and apply a human decision to a pending conflict.
    ///
    /// Returns the server copy inserted by `KeepBoth`.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
    ) -> Result<Option<Reading>> {
        let conflict = self
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.resolution.is_some() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let server_copy = self.apply_resolution(&conflict, resolution).await?;
        tracing::info!(
            "Resolved conflict {} on reading {} with {} (local {:.1} {}, server {:.1} mg/dL)",
            conflict.id,
            conflict.reading_id,
            resolution,
            conflict.local.value,
            conflict.local.unit,
            conflict.remote.value
        );
        Ok(server_copy)
    }

    // -- settings ----------------------------------------------------------

    /// Load settings.
    pub async fn load_settings(&self) -> Result<Settings> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection()).load().await
    }

    /// Save settings.
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .save(settings)
            .await
    }
}

/// Restartable cursor over a reading query.
///
/// Pages are fetched on demand; the sequence ends at the first short page.
pub struct ReadingPages {
    store: ReadingStore,
    query: ReadingQuery,
    start: usize,
    exhausted: bool,
}

impl ReadingPages {
    fn new(store: ReadingStore, query: ReadingQuery, page_size: usize) -> Self {
        let start = query.offset;
        Self {
            store,
            query: query.limit(page_size.max(1)),
            start,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the query is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Reading>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.store.query(&self.query).await?;
        if page.len() < self.query.limit {
            self.exhausted = true;
        }
        self.query.offset += page.len();

        if page.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page))
        }
    }

    /// Restart from the first page.
    pub fn reset(&mut self) {
        self.query.offset = self.start;
        self.exhausted = false;
    }
}
