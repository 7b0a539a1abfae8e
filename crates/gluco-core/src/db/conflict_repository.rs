//! Conflict ledger and resolution audit

#![allow(clippy::cast_possible_wrap)]

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{
    ConflictAudit, ConflictStatus, ReadingId, ReadingSnapshot, RemoteReading, Resolution,
    SyncConflict,
};

use super::rows::{opt_i64, opt_text, parse_column};

const CONFLICT_COLUMNS: &str =
    "id, reading_id, local_version, remote_version, status, resolution, created_at, resolved_at";

const AUDIT_COLUMNS: &str =
    "id, conflict_id, reading_id, resolution, local_version, remote_version, created_at";

/// libSQL repository for `sync_conflicts` and `sync_audit`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let reading_id: String = row.get(1)?;
        let local: String = row.get(2)?;
        let remote: String = row.get(3)?;
        let status: String = row.get(4)?;

        Ok(SyncConflict {
            id: row.get(0)?,
            reading_id: parse_column(&reading_id, "reading id")?,
            local: serde_json::from_str::<ReadingSnapshot>(&local)?,
            remote: serde_json::from_str::<RemoteReading>(&remote)?,
            status: parse_column(&status, "conflict status")?,
            resolution: opt_text(row, 5)?
                .map(|raw| parse_column(&raw, "resolution"))
                .transpose()?,
            created_at: row.get(6)?,
            resolved_at: opt_i64(row, 7)?,
        })
    }

    fn parse_audit(row: &Row) -> Result<ConflictAudit> {
        let reading_id: String = row.get(2)?;
        let resolution: String = row.get(3)?;
        let local: String = row.get(4)?;
        let remote: String = row.get(5)?;

        Ok(ConflictAudit {
            id: row.get(0)?,
            conflict_id: row.get(1)?,
            reading_id: parse_column(&reading_id, "reading id")?,
            resolution: parse_column(&resolution, "resolution")?,
            local: serde_json::from_str(&local)?,
            remote: serde_json::from_str(&remote)?,
            created_at: row.get(6)?,
        })
    }

    /// Record a conflict for `reading_id`.
    ///
    /// A reading has at most one pending conflict: if one already exists its
    /// versions are refreshed and its id returned.
    pub async fn record(
        &self,
        reading_id: &ReadingId,
        local: &ReadingSnapshot,
        remote: &RemoteReading,
    ) -> Result<i64> {
        let local_json = serde_json::to_string(local)?;
        let remote_json = serde_json::to_string(remote)?;

        if let Some(existing) = self.pending_for(reading_id).await? {
            self.conn
                .execute(
                    "UPDATE sync_conflicts SET local_version = ?, remote_version = ?, remote_id = ?
                     WHERE id = ?",
                    libsql::params![local_json, remote_json, remote.remote_id, existing.id],
                )
                .await?;
            return Ok(existing.id);
        }

        let now = crate::util::now_ms();
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                     (reading_id, remote_id, local_version, remote_version, status, created_at)
                 VALUES (?, ?, ?, ?, 'pending', ?)",
                libsql::params![
                    reading_id.as_str(),
                    remote.remote_id,
                    local_json,
                    remote_json,
                    now,
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a conflict by id
    pub async fn get(&self, id: i64) -> Result<Option<SyncConflict>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?");
        let mut rows = self.conn.query(&sql, [id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    /// Pending conflict for a reading, if any
    pub async fn pending_for(&self, reading_id: &ReadingId) -> Result<Option<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE reading_id = ? AND status = 'pending' ORDER BY id LIMIT 1"
        );
        let mut rows = self.conn.query(&sql, [reading_id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    /// Conflicts with `status`, oldest first
    pub async fn list(&self, status: ConflictStatus, limit: usize) -> Result<Vec<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT ?"
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![status.as_str(), limit as i64])
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    /// Number of unresolved conflicts
    pub async fn pending_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_conflicts WHERE status = 'pending'",
                (),
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| Error::Database(format!("invalid count {count}")))
    }

    /// Close a pending conflict; fails with `NotFound` if it is not pending
    pub async fn mark_resolved(&self, id: i64, resolution: Resolution) -> Result<()> {
        let now = crate::util::now_ms();
        let rows = self
            .conn
            .execute(
                "UPDATE sync_conflicts SET status = 'resolved', resolution = ?, resolved_at = ?
                 WHERE id = ? AND status = 'pending'",
                libsql::params![resolution.as_str(), now, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("pending conflict {id}")));
        }
        Ok(())
    }

    /// Append an audit record for a resolved conflict
    pub async fn insert_audit(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
    ) -> Result<i64> {
        let now = crate::util::now_ms();
        self.conn
            .execute(
                "INSERT INTO sync_audit (conflict_id, reading_id, resolution,
                     local_version, remote_version, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    conflict.id,
                    conflict.reading_id.as_str(),
                    resolution.as_str(),
                    serde_json::to_string(&conflict.local)?,
                    serde_json::to_string(&conflict.remote)?,
                    now,
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent audit records first
    pub async fn list_audit(&self, limit: usize) -> Result<Vec<ConflictAudit>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM sync_audit ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let mut rows = self.conn.query(&sql, [limit as i64]).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_audit(&row)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{GlucoseUnit, ReadingCategory};

    fn local() -> ReadingSnapshot {
        ReadingSnapshot {
            value: 110.0,
            unit: GlucoseUnit::MgDl,
            timestamp: 1_000,
            note: None,
            category: ReadingCategory::Fasting,
        }
    }

    fn remote(value: f64) -> RemoteReading {
        RemoteReading {
            remote_id: 9,
            value,
            timestamp: 1_000,
            note: Some("lab".to_string()),
            category: ReadingCategory::Fasting,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_and_list_pending() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        let reading_id = ReadingId::new();

        let id = repo.record(&reading_id, &local(), &remote(140.0)).await.unwrap();
        let conflict = repo.get(id).await.unwrap().unwrap();

        assert_eq!(conflict.reading_id, reading_id);
        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert_eq!(conflict.local, local());
        assert_eq!(conflict.remote, remote(140.0));
        assert_eq!(repo.pending_count().await.unwrap(), 1);
        assert_eq!(repo.list(ConflictStatus::Pending, 10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_pending_conflict_per_reading() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        let reading_id = ReadingId::new();

        let first = repo.record(&reading_id, &local(), &remote(140.0)).await.unwrap();
        let second = repo.record(&reading_id, &local(), &remote(150.0)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.pending_count().await.unwrap(), 1);
        let conflict = repo.get(first).await.unwrap().unwrap();
        assert!((conflict.remote.value - 150.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_writes_audit() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        let reading_id = ReadingId::new();

        let id = repo.record(&reading_id, &local(), &remote(140.0)).await.unwrap();
        let conflict = repo.get(id).await.unwrap().unwrap();

        repo.mark_resolved(id, Resolution::KeepServer).await.unwrap();
        repo.insert_audit(&conflict, Resolution::KeepServer).await.unwrap();

        let resolved = repo.get(id).await.unwrap().unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolution, Some(Resolution::KeepServer));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(repo.pending_count().await.unwrap(), 0);

        let audit = repo.list_audit(10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].conflict_id, id);
        assert_eq!(audit[0].resolution, Resolution::KeepServer);

        // Already resolved
        assert!(matches!(
            repo.mark_resolved(id, Resolution::KeepMine).await,
            Err(Error::NotFound(_))
        ));
    }
}
