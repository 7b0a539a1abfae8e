//! Database migrations
//!
//! Migrations are forward-only and additive: each version only creates new
//! tables or indexes, so rows in pre-existing tables are never rewritten.

use crate::error::Result;
use libsql::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
pub async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master
                           WHERE type = 'table' AND name = 'schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Sorted names of all schema objects of `kind` ("table" or "index")
pub async fn object_names(conn: &Connection, kind: &str) -> Result<Vec<String>> {
    let mut rows = conn
        .query(
            "SELECT name FROM sqlite_master
             WHERE type = ? AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
            [kind],
        )
        .await?;

    let mut names = Vec::new();
    while let Some(row) = rows.next().await? {
        names.push(row.get::<String>(0)?);
    }
    Ok(names)
}

/// Execute `statements` in one transaction, rolling back on the first failure
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [i64::from(version)])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: readings and local settings
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS readings (
                id TEXT PRIMARY KEY,
                remote_id INTEGER,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                unit TEXT NOT NULL,
                status TEXT NOT NULL,
                note TEXT,
                category TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'manual',
                synced INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_readings_category ON readings(category)",
            "CREATE INDEX IF NOT EXISTS idx_readings_synced ON readings(synced)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_readings_remote_id ON readings(remote_id)
             WHERE remote_id IS NOT NULL",
            // Settings table (local only)
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
    .await
}

/// Migration to version 2: pending mutation queue and in-flight journal
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reading_id TEXT NOT NULL,
                op TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_created_at ON sync_queue(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_op ON sync_queue(op)",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_reading ON sync_queue(reading_id)",
            // Entries drained for a batch stay here until the batch is settled
            "CREATE TABLE IF NOT EXISTS sync_inflight (
                id INTEGER PRIMARY KEY,
                reading_id TEXT NOT NULL,
                op TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_inflight_reading ON sync_inflight(reading_id)",
        ],
    )
    .await
}

/// Migration to version 3: conflict ledger and resolution audit
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reading_id TEXT NOT NULL,
                remote_id INTEGER NOT NULL,
                local_version TEXT NOT NULL,
                remote_version TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                resolution TEXT,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_status ON sync_conflicts(status)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_reading ON sync_conflicts(reading_id)",
            "CREATE TABLE IF NOT EXISTS sync_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conflict_id INTEGER NOT NULL,
                reading_id TEXT NOT NULL,
                resolution TEXT NOT NULL,
                local_version TEXT NOT NULL,
                remote_version TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_audit_created_at ON sync_audit(created_at DESC)",
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn count(conn: &Connection, table: &str) -> i64 {
        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        let tables = object_names(&conn, "table").await.unwrap();
        let indexes = object_names(&conn, "index").await.unwrap();

        run(&conn).await.unwrap(); // Should not fail

        assert_eq!(get_version(&conn).await.unwrap(), CURRENT_VERSION);
        assert_eq!(object_names(&conn, "table").await.unwrap(), tables);
        assert_eq!(object_names(&conn, "index").await.unwrap(), indexes);
        assert_eq!(count(&conn, "schema_version").await, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upgrade_from_v1_preserves_readings() {
        let conn = setup().await;
        migrate_v1(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO readings
                 (id, timestamp, value, unit, status, category, created_at, updated_at)
             VALUES ('r1', 1000, 110.0, 'mg/dL', 'normal', 'fasting', 1000, 1000)",
            (),
        )
        .await
        .unwrap();
        assert_eq!(get_version(&conn).await.unwrap(), 1);

        run(&conn).await.unwrap();

        assert_eq!(get_version(&conn).await.unwrap(), CURRENT_VERSION);
        assert_eq!(count(&conn, "readings").await, 1);
        let tables = object_names(&conn, "table").await.unwrap();
        for table in ["sync_queue", "sync_inflight", "sync_conflicts", "sync_audit"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }
}
