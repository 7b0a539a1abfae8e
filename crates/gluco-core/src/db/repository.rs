//! Reading repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{
    Reading, ReadingCategory, ReadingId, ReadingPatch, ReadingSource, RemoteId,
    VALUE_EPSILON_MG_DL,
};

use super::rows::{opt_i64, opt_text, opt_value, parse_column};

const READING_COLUMNS: &str = "id, remote_id, timestamp, value, unit, status, note, category, \
                               source, synced, is_deleted, created_at, updated_at";

/// Sort order for reading queries, always over the timestamp index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::NewestFirst => "timestamp DESC, created_at DESC",
            Self::OldestFirst => "timestamp ASC, created_at ASC",
        }
    }
}

/// Predicate over readings; every `None` field matches everything
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadingFilter {
    pub synced: Option<bool>,
    pub category: Option<ReadingCategory>,
    pub source: Option<ReadingSource>,
    /// Inclusive lower bound on timestamp (Unix ms)
    pub from: Option<i64>,
    /// Inclusive upper bound on timestamp (Unix ms)
    pub to: Option<i64>,
    /// `Some(true)` for readings with a remote id, `Some(false)` for those without
    pub linked: Option<bool>,
    pub include_deleted: bool,
}

impl ReadingFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !self.include_deleted {
            clauses.push("is_deleted = 0".to_string());
        }
        if let Some(synced) = self.synced {
            clauses.push("synced = ?".to_string());
            values.push(Value::Integer(i64::from(synced)));
        }
        if let Some(category) = self.category {
            clauses.push("category = ?".to_string());
            values.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(source) = self.source {
            clauses.push("source = ?".to_string());
            values.push(Value::Text(source.as_str().to_string()));
        }
        if let Some(from) = self.from {
            clauses.push("timestamp >= ?".to_string());
            values.push(Value::Integer(from));
        }
        if let Some(to) = self.to {
            clauses.push("timestamp <= ?".to_string());
            values.push(Value::Integer(to));
        }
        match self.linked {
            Some(true) => clauses.push("remote_id IS NOT NULL".to_string()),
            Some(false) => clauses.push("remote_id IS NULL".to_string()),
            None => {}
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// A filtered, ordered, paginated query over readings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingQuery {
    pub filter: ReadingFilter,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ReadingQuery {
    fn default() -> Self {
        Self {
            filter: ReadingFilter::default(),
            order: SortOrder::NewestFirst,
            limit: 100,
            offset: 0,
        }
    }
}

impl ReadingQuery {
    #[must_use]
    pub fn new(filter: ReadingFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for reading storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ReadingRepository {
    /// Insert a new reading; fails with `DuplicateKey` if the id exists
    async fn add(&self, reading: &Reading) -> Result<()>;

    /// Get a live (non-deleted) reading by ID
    async fn get(&self, id: &ReadingId) -> Result<Option<Reading>>;

    /// Merge `patch` into a reading and persist it
    async fn update(&self, id: &ReadingId, patch: &ReadingPatch) -> Result<Reading>;

    /// Soft delete a reading
    async fn delete(&self, id: &ReadingId) -> Result<()>;

    /// Run a filtered, ordered, paginated query
    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>>;

    /// Count readings matching `filter`
    async fn count(&self, filter: &ReadingFilter) -> Result<usize>;
}

/// libSQL implementation of `ReadingRepository`
pub struct LibSqlReadingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlReadingRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a reading from a database row
    fn parse_reading(row: &Row) -> Result<Reading> {
        let id: String = row.get(0)?;
        let unit: String = row.get(4)?;
        let status: String = row.get(5)?;
        let category: String = row.get(7)?;
        let source: String = row.get(8)?;

        Ok(Reading {
            id: parse_column(&id, "reading id")?,
            remote_id: opt_i64(row, 1)?,
            timestamp: row.get(2)?,
            value: row.get(3)?,
            unit: parse_column(&unit, "unit")?,
            status: parse_column(&status, "status")?,
            note: opt_text(row, 6)?,
            category: ReadingCategory::from_tag(&category),
            source: ReadingSource::from_tag(&source),
            synced: row.get::<i32>(9)? != 0,
            is_deleted: row.get::<i32>(10)? != 0,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    async fn fetch(&self, sql: &str, params: Params) -> Result<Vec<Reading>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut readings = Vec::new();
        while let Some(row) = rows.next().await? {
            readings.push(Self::parse_reading(&row)?);
        }
        Ok(readings)
    }

    /// Whether a row with this id exists, deleted or not
    pub async fn exists(&self, id: &ReadingId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM readings WHERE id = ?)",
                [id.as_str()],
            )
            .await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        })
    }

    /// Get a reading by ID, including soft-deleted ones
    pub async fn get_any(&self, id: &ReadingId) -> Result<Option<Reading>> {
        let sql = format!("SELECT {READING_COLUMNS} FROM readings WHERE id = ?");
        let mut readings = self
            .fetch(&sql, Params::Positional(vec![Value::Text(id.as_str())]))
            .await?;
        Ok(readings.pop())
    }

    /// Find the reading linked to a server id, including soft-deleted ones
    pub async fn find_by_remote_id(&self, remote_id: RemoteId) -> Result<Option<Reading>> {
        let sql = format!("SELECT {READING_COLUMNS} FROM readings WHERE remote_id = ?");
        let mut readings = self
            .fetch(&sql, Params::Positional(vec![Value::Integer(remote_id)]))
            .await?;
        Ok(readings.pop())
    }

    /// Closest unsynced, unlinked reading with an equal value within `tolerance_ms`
    pub async fn find_link_candidate(
        &self,
        value_mg_dl: f64,
        timestamp: i64,
        tolerance_ms: i64,
    ) -> Result<Option<Reading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings
             WHERE synced = 0 AND remote_id IS NULL AND is_deleted = 0
               AND timestamp BETWEEN ? AND ?"
        );
        let candidates = self
            .fetch(
                &sql,
                Params::Positional(vec![
                    Value::Integer(timestamp.saturating_sub(tolerance_ms)),
                    Value::Integer(timestamp.saturating_add(tolerance_ms)),
                ]),
            )
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|reading| (reading.value_mg_dl() - value_mg_dl).abs() < VALUE_EPSILON_MG_DL)
            .min_by_key(|reading| (reading.timestamp - timestamp).abs()))
    }

    /// Overwrite every column of an existing row
    pub async fn save(&self, reading: &Reading) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE readings SET remote_id = ?, timestamp = ?, value = ?, unit = ?, status = ?,
                     note = ?, category = ?, source = ?, synced = ?, is_deleted = ?, updated_at = ?
                 WHERE id = ?",
                libsql::params![
                    opt_value(reading.remote_id),
                    reading.timestamp,
                    reading.value,
                    reading.unit.as_str(),
                    reading.status.as_str(),
                    opt_value(reading.note.clone()),
                    reading.category.as_str(),
                    reading.source.as_str(),
                    i64::from(reading.synced),
                    i64::from(reading.is_deleted),
                    reading.updated_at,
                    reading.id.as_str(),
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(reading.id.to_string()));
        }
        Ok(())
    }

    /// Mark a reading acknowledged, attaching `remote_id` unless one is already set.
    ///
    /// A remote id already linked to a different reading (a pull can get there
    /// first) is left where it is. The flag is only flipped when no later
    /// mutation of the reading is still waiting in the queue or the in-flight
    /// journal.
    pub async fn mark_synced(&self, id: &ReadingId, remote_id: Option<RemoteId>) -> Result<()> {
        if let Some(remote_id) = remote_id {
            match self.find_by_remote_id(remote_id).await? {
                Some(holder) if holder.id != *id => {
                    tracing::warn!(
                        "Remote id {remote_id} already belongs to reading {}; not linking {id}",
                        holder.id
                    );
                }
                _ => {
                    self.conn
                        .execute(
                            "UPDATE readings SET remote_id = ? WHERE id = ? AND remote_id IS NULL",
                            libsql::params![remote_id, id.as_str()],
                        )
                        .await?;
                }
            }
        }

        self.conn
            .execute(
                "UPDATE readings SET synced = 1
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM sync_queue WHERE reading_id = ?1)
                   AND NOT EXISTS (SELECT 1 FROM sync_inflight WHERE reading_id = ?1)",
                [id.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Timestamp of the newest live reading from `source`
    pub async fn newest_timestamp(&self, source: ReadingSource) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(timestamp) FROM readings WHERE is_deleted = 0 AND source = ?",
                [source.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => opt_i64(&row, 0),
            None => Ok(None),
        }
    }
}

impl ReadingRepository for LibSqlReadingRepository<'_> {
    async fn add(&self, reading: &Reading) -> Result<()> {
        if self.exists(&reading.id).await? {
            return Err(Error::DuplicateKey(reading.id.to_string()));
        }

        self.conn
            .execute(
                "INSERT INTO readings (id, remote_id, timestamp, value, unit, status, note,
                     category, source, synced, is_deleted, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    reading.id.as_str(),
                    opt_value(reading.remote_id),
                    reading.timestamp,
                    reading.value,
                    reading.unit.as_str(),
                    reading.status.as_str(),
                    opt_value(reading.note.clone()),
                    reading.category.as_str(),
                    reading.source.as_str(),
                    i64::from(reading.synced),
                    i64::from(reading.is_deleted),
                    reading.created_at,
                    reading.updated_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn get(&self, id: &ReadingId) -> Result<Option<Reading>> {
        Ok(self.get_any(id).await?.filter(|reading| !reading.is_deleted))
    }

    async fn update(&self, id: &ReadingId, patch: &ReadingPatch) -> Result<Reading> {
        let mut reading = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Some(value) = patch.value {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "glucose value must be a positive number, got {value}"
                )));
            }
        }

        reading.apply(patch);
        self.save(&reading).await?;
        Ok(reading)
    }

    async fn delete(&self, id: &ReadingId) -> Result<()> {
        let now = crate::util::now_ms();

        let rows = self
            .conn
            .execute(
                "UPDATE readings SET is_deleted = 1, synced = 0, updated_at = ?
                 WHERE id = ? AND is_deleted = 0",
                libsql::params![now, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let (where_clause, mut values) = query.filter.where_clause();
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings{where_clause} ORDER BY {} LIMIT ? OFFSET ?",
            query.order.sql()
        );
        values.push(Value::Integer(query.limit as i64));
        values.push(Value::Integer(query.offset as i64));

        self.fetch(&sql, Params::Positional(values)).await
    }

    async fn count(&self, filter: &ReadingFilter) -> Result<usize> {
        let (where_clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM readings{where_clause}");
        let mut rows = self.conn.query(&sql, Params::Positional(values)).await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| Error::Database(format!("invalid count {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{GlucoseStatus, GlucoseUnit, NewReading};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn reading_at(value: f64, timestamp: i64) -> Reading {
        Reading::new(NewReading::new(value, GlucoseUnit::MgDl).at(timestamp))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_and_get() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let mut reading = reading_at(120.0, 1_000);
        reading.note = Some("after lunch".to_string());
        repo.add(&reading).await.unwrap();

        let fetched = repo.get(&reading.id).await.unwrap().unwrap();
        assert_eq!(fetched, reading);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_rejects_duplicate_ids() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let reading = reading_at(120.0, 1_000);
        repo.add(&reading).await.unwrap();
        let error = repo.add(&reading).await.unwrap_err();
        assert!(matches!(error, Error::DuplicateKey(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_missing_returns_none() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());
        assert!(repo.get(&ReadingId::new()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_recomputes_status() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let mut reading = reading_at(100.0, 1_000);
        reading.synced = true;
        repo.add(&reading).await.unwrap();

        let updated = repo
            .update(
                &reading.id,
                &ReadingPatch {
                    value: Some(300.0),
                    note: Some(Some("pizza".to_string())),
                    ..ReadingPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, GlucoseStatus::VeryHigh);
        assert_eq!(updated.note.as_deref(), Some("pizza"));
        assert!(!updated.synced);
        assert_eq!(repo.get(&reading.id).await.unwrap().unwrap(), updated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_and_delete_missing_fail_with_not_found() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());
        let id = ReadingId::new();

        let error = repo.update(&id, &ReadingPatch::default()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        let error = repo.delete(&id).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_hides_reading() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let reading = reading_at(100.0, 1_000);
        repo.add(&reading).await.unwrap();
        repo.delete(&reading.id).await.unwrap();

        assert!(repo.get(&reading.id).await.unwrap().is_none());
        assert!(repo.get_any(&reading.id).await.unwrap().unwrap().is_deleted);
        let listed = repo.query(&ReadingQuery::default()).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_orders_by_timestamp_and_paginates() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        for (index, ts) in [3_000, 1_000, 5_000, 2_000, 4_000].into_iter().enumerate() {
            repo.add(&reading_at(100.0 + index as f64, ts)).await.unwrap();
        }

        let page = repo
            .query(&ReadingQuery::default().limit(2).offset(1))
            .await
            .unwrap();
        let timestamps: Vec<i64> = page.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![4_000, 3_000]);

        let oldest = repo
            .query(&ReadingQuery::default().order(SortOrder::OldestFirst).limit(1))
            .await
            .unwrap();
        assert_eq!(oldest[0].timestamp, 1_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_filters_by_range_and_sync_flag() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let mut synced = reading_at(100.0, 2_000);
        synced.synced = true;
        synced.remote_id = Some(9);
        repo.add(&synced).await.unwrap();
        repo.add(&reading_at(110.0, 3_000)).await.unwrap();
        repo.add(&reading_at(120.0, 9_000)).await.unwrap();

        let in_range = repo
            .query(&ReadingQuery::new(ReadingFilter {
                from: Some(1_500),
                to: Some(3_000),
                ..ReadingFilter::default()
            }))
            .await
            .unwrap();
        assert_eq!(in_range.len(), 2);

        let unsynced = ReadingFilter {
            synced: Some(false),
            ..ReadingFilter::default()
        };
        assert_eq!(repo.count(&unsynced).await.unwrap(), 2);
        let linked = ReadingFilter {
            linked: Some(true),
            ..ReadingFilter::default()
        };
        assert_eq!(repo.count(&linked).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn link_candidate_prefers_closest_timestamp() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());
        let minute = 60_000;

        let far = reading_at(120.0, 20 * minute);
        let near = reading_at(120.0, 5 * minute);
        let other_value = reading_at(121.0, 0);
        repo.add(&far).await.unwrap();
        repo.add(&near).await.unwrap();
        repo.add(&other_value).await.unwrap();

        let candidate = repo
            .find_link_candidate(120.0, 0, 30 * minute)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.id, near.id);

        assert!(repo
            .find_link_candidate(120.0, 0, minute)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_synced_never_replaces_remote_id() {
        let db = setup().await;
        let repo = LibSqlReadingRepository::new(db.connection());

        let reading = reading_at(100.0, 1_000);
        repo.add(&reading).await.unwrap();
        repo.mark_synced(&reading.id, Some(42)).await.unwrap();
        repo.mark_synced(&reading.id, Some(43)).await.unwrap();

        let stored = repo.get(&reading.id).await.unwrap().unwrap();
        assert_eq!(stored.remote_id, Some(42));
        assert!(stored.synced);
        assert_eq!(
            repo.find_by_remote_id(42).await.unwrap().map(|r| r.id),
            Some(reading.id)
        );
    }
}
