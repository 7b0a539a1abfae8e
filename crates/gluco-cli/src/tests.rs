use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use gluco_core::config::ClientConfig;
use gluco_core::export::GlucoseReport;
use gluco_core::models::{
    GlucoseUnit, NewReading, Reading, ReadingPatch, RemoteReading, Resolution,
};
use gluco_core::sync::SyncOutcome;
use gluco_core::ReadingStore;
use pretty_assertions::assert_eq;

use crate::cli::{CompletionShell, ExportFormat, SyncMode};
use crate::commands::common::{
    finish_sync, format_relative_time, format_value, parse_reading_id, parse_time,
};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{list_conflicts, run_conflicts_resolve};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::export::run_export;
use crate::commands::list::list_readings;
use crate::commands::settings::{update_settings, SettingsUpdate};
use crate::commands::stats::{compute_stats, StatsOptions};
use crate::commands::status::collect_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[test]
fn parse_time_accepts_rfc3339() {
    let expected = Utc
        .with_ymd_and_hms(2025, 1, 16, 8, 30, 0)
        .unwrap()
        .timestamp_millis();
    assert_eq!(parse_time("2025-01-16T08:30:00Z").unwrap(), expected);
    assert_eq!(
        parse_time(" 2025-01-16T11:30:00+03:00 ").unwrap(),
        expected
    );
}

#[test]
fn parse_time_accepts_local_minutes_and_seconds() {
    let minutes = parse_time("2025-01-16 08:30").unwrap();
    let seconds = parse_time("2025-01-16 08:30:15").unwrap();
    assert_eq!(seconds - minutes, 15_000);
}

#[test]
fn parse_time_rejects_garbage() {
    assert!(matches!(
        parse_time("yesterday"),
        Err(CliError::InvalidTime(raw)) if raw == "yesterday"
    ));
}

#[test]
fn parse_reading_id_rejects_non_uuid() {
    assert!(matches!(
        parse_reading_id(" not-an-id "),
        Err(CliError::InvalidReadingId(raw)) if raw == "not-an-id"
    ));
}

#[test]
fn format_relative_time_uses_expected_buckets() {
    let now = 1_700_000_000_000_i64;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * HOUR_MS, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 24 * HOUR_MS, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 24 * HOUR_MS, now), "3w ago");
}

#[test]
fn format_value_uses_unit_precision() {
    assert_eq!(format_value(120.44, GlucoseUnit::MgDl), "120.4 mg/dL");
    assert_eq!(format_value(6.666, GlucoseUnit::MmolL), "6.67 mmol/L");
}

#[test]
fn finish_sync_only_fails_on_failed_outcome() {
    assert!(finish_sync(SyncOutcome::NothingToSync, "0 pushed", None).is_ok());
    assert!(finish_sync(SyncOutcome::PartialSuccess, "1 pushed", Some("boom")).is_ok());

    let error = finish_sync(SyncOutcome::Failed, "0 pushed", Some("server down")).unwrap_err();
    assert!(matches!(
        error,
        CliError::SyncFailed(message) if message == "Sync failed: server down"
    ));
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn list_readings_filters_unsynced() {
    let db_path = unique_test_db_path();
    let pending_id = {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        let pending = store
            .create_reading(NewReading::new(110.0, GlucoseUnit::MgDl).at(2_000))
            .await
            .unwrap();

        let mut acknowledged = Reading::new(NewReading::new(95.0, GlucoseUnit::MgDl).at(1_000));
        acknowledged.remote_id = Some(7);
        acknowledged.synced = true;
        store.add(&acknowledged).await.unwrap();
        pending.id
    };

    let all = list_readings(10, false, &db_path).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, pending_id);

    let unsynced = list_readings(10, true, &db_path).await.unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, pending_id);

    let limited = list_readings(1, false, &db_path).await.unwrap();
    assert_eq!(limited.len(), 1);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn run_edit_rejects_empty_patch_and_missing_reading() {
    let db_path = unique_test_db_path();

    let empty = run_edit("0192f0c2-0000-7000-8000-000000000000", ReadingPatch::default(), &db_path)
        .await
        .unwrap_err();
    assert!(matches!(empty, CliError::EmptyEdit));

    let patch = ReadingPatch {
        value: Some(99.0),
        ..ReadingPatch::default()
    };
    let missing = run_edit("0192f0c2-0000-7000-8000-000000000000", patch, &db_path)
        .await
        .unwrap_err();
    assert!(matches!(missing, CliError::ReadingNotFound(_)));

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn run_edit_updates_value_and_queues_change() {
    let db_path = unique_test_db_path();
    let reading = {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        store
            .create_reading(NewReading::new(110.0, GlucoseUnit::MgDl).at(1_000))
            .await
            .unwrap()
    };

    let patch = ReadingPatch {
        value: Some(6.5),
        unit: Some(GlucoseUnit::MmolL),
        ..ReadingPatch::default()
    };
    run_edit(&reading.id.to_string(), patch, &db_path)
        .await
        .unwrap();

    let store = ReadingStore::open_path(&db_path).await.unwrap();
    let edited = store.get(&reading.id).await.unwrap().unwrap();
    assert_eq!(edited.value, 6.5);
    assert_eq!(edited.unit, GlucoseUnit::MmolL);
    assert_eq!(store.pending_count().await.unwrap(), 2);

    drop(store);
    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn run_delete_hides_reading_and_rejects_unknown_id() {
    let db_path = unique_test_db_path();
    let reading = {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        store
            .create_reading(NewReading::new(110.0, GlucoseUnit::MgDl).at(1_000))
            .await
            .unwrap()
    };

    run_delete(&reading.id.to_string(), &db_path).await.unwrap();
    assert!(list_readings(10, false, &db_path).await.unwrap().is_empty());

    let error = run_delete("0192f0c2-0000-7000-8000-000000000000", &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::ReadingNotFound(_)));

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn conflicts_can_be_listed_and_resolved_with_server_version() {
    let db_path = unique_test_db_path();
    let (reading_id, conflict_id) = seed_conflict(&db_path).await;

    let pending = list_conflicts(false, 10, &db_path).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, conflict_id);
    assert_eq!(pending[0].reading_id, reading_id);

    run_conflicts_resolve(conflict_id, Resolution::KeepServer, &db_path)
        .await
        .unwrap();

    assert!(list_conflicts(false, 10, &db_path).await.unwrap().is_empty());
    let all = list_conflicts(true, 10, &db_path).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].resolution, Some(Resolution::KeepServer));

    let store = ReadingStore::open_path(&db_path).await.unwrap();
    let reading = store.get(&reading_id).await.unwrap().unwrap();
    assert_eq!(reading.value, 135.0);
    assert_eq!(reading.unit, GlucoseUnit::MgDl);

    let again = run_conflicts_resolve(conflict_id, Resolution::KeepMine, &db_path).await;
    assert!(matches!(
        again,
        Err(CliError::Core(gluco_core::Error::InvalidInput(_)))
    ));

    drop(store);
    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn resolving_unknown_conflict_reports_not_found() {
    let db_path = unique_test_db_path();

    let error = run_conflicts_resolve(404, Resolution::KeepBoth, &db_path)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CliError::Core(gluco_core::Error::NotFound(_))
    ));

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn compute_stats_uses_window_and_target_range() {
    let db_path = unique_test_db_path();
    let now = Utc::now().timestamp_millis();
    {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        for (value, offset) in [(100.0, HOUR_MS), (200.0, 2 * HOUR_MS), (60.0, 40 * 24 * HOUR_MS)] {
            store
                .create_reading(NewReading::new(value, GlucoseUnit::MgDl).at(now - offset))
                .await
                .unwrap();
        }
    }

    let (stats, unit, days) = compute_stats(
        StatsOptions::default(),
        &ClientConfig::default(),
        &db_path,
        now,
    )
    .await
    .unwrap();
    assert_eq!(unit, GlucoseUnit::MgDl);
    assert_eq!(days, 14);
    assert_eq!(stats.count, 2);
    assert_eq!(stats.mean, 150.0);
    assert_eq!(stats.in_range_pct, 50.0);
    assert_eq!(stats.above_range_pct, 50.0);

    let widened = StatsOptions {
        high: Some(250.0),
        ..StatsOptions::default()
    };
    let (stats, _, _) = compute_stats(widened, &ClientConfig::default(), &db_path, now)
        .await
        .unwrap();
    assert_eq!(stats.in_range_pct, 100.0);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn compute_stats_rejects_inverted_range() {
    let db_path = unique_test_db_path();

    let options = StatsOptions {
        low: Some(200.0),
        high: Some(100.0),
        ..StatsOptions::default()
    };
    let error = compute_stats(options, &ClientConfig::default(), &db_path, 0)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::InvalidRange));

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn update_settings_persists_and_drives_stats_defaults() {
    let db_path = unique_test_db_path();

    let update = SettingsUpdate {
        unit: Some(GlucoseUnit::MmolL),
        low: Some(4.0),
        high: Some(9.0),
        days: Some(7),
    };
    let saved = update_settings(update, &db_path).await.unwrap();
    assert_eq!(saved.preferred_unit, GlucoseUnit::MmolL);
    assert!((saved.target_low_mg_dl - GlucoseUnit::MmolL.to_mg_dl(4.0)).abs() < 1e-9);

    let store = ReadingStore::open_path(&db_path).await.unwrap();
    assert_eq!(store.load_settings().await.unwrap(), saved);
    drop(store);

    let (_, unit, days) = compute_stats(
        StatsOptions::default(),
        &ClientConfig::default(),
        &db_path,
        0,
    )
    .await
    .unwrap();
    assert_eq!(unit, GlucoseUnit::MmolL);
    assert_eq!(days, 7);

    // Only the window changes; the stored range is kept
    let narrowed = SettingsUpdate {
        days: Some(30),
        ..SettingsUpdate::default()
    };
    let updated = update_settings(narrowed, &db_path).await.unwrap();
    assert_eq!(updated.report_days, 30);
    assert_eq!(updated.target_high_mg_dl, saved.target_high_mg_dl);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn update_settings_rejects_invalid_values_without_saving() {
    let db_path = unique_test_db_path();

    let error = update_settings(SettingsUpdate::default(), &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::EmptySettingsUpdate));

    let inverted = SettingsUpdate {
        low: Some(200.0),
        ..SettingsUpdate::default()
    };
    let error = update_settings(inverted, &db_path).await.unwrap_err();
    assert!(matches!(error, CliError::InvalidRange));

    let empty_window = SettingsUpdate {
        days: Some(0),
        ..SettingsUpdate::default()
    };
    let error = update_settings(empty_window, &db_path).await.unwrap_err();
    assert!(matches!(error, CliError::InvalidReportDays));

    let store = ReadingStore::open_path(&db_path).await.unwrap();
    assert_eq!(
        store.load_settings().await.unwrap(),
        gluco_core::models::Settings::default()
    );
    drop(store);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn run_export_writes_json_report() {
    let db_path = unique_test_db_path();
    let anchor = 1_737_000_000_000_i64;
    {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        for (value, timestamp) in [
            (100.0, anchor),
            (140.0, anchor - 2 * 24 * HOUR_MS),
            (220.0, anchor - 30 * 24 * HOUR_MS),
        ] {
            store
                .create_reading(NewReading::new(value, GlucoseUnit::MgDl).at(timestamp))
                .await
                .unwrap();
        }
    }
    let output_path = std::env::temp_dir().join(format!(
        "gluco-cli-export-test-{}.json",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos())
    ));

    run_export(
        Some(7),
        None,
        ExportFormat::Json,
        Some(&output_path),
        &ClientConfig::default(),
        &db_path,
    )
    .await
    .unwrap();

    let report: GlucoseReport =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(report.count, 2);
    assert_eq!(report.to, Some(anchor));
    assert_eq!(report.mean, 120.0);
    assert_eq!(report.rows[0].timestamp, anchor);

    let _ = std::fs::remove_file(output_path);
    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn collect_status_counts_queue_and_conflicts() {
    let db_path = unique_test_db_path();
    seed_conflict(&db_path).await;
    {
        let store = ReadingStore::open_path(&db_path).await.unwrap();
        store
            .create_reading(NewReading::new(110.0, GlucoseUnit::MgDl).at(9_000))
            .await
            .unwrap();
    }

    let status = collect_status(&ClientConfig::default(), &db_path)
        .await
        .unwrap();
    assert_eq!(status.readings, 2);
    assert_eq!(status.unsynced, 2);
    assert_eq!(status.pending_queue, 1);
    assert_eq!(status.pending_conflicts, 1);
    assert_eq!(status.network, None);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn run_sync_requires_backend_configuration() {
    let db_path = unique_test_db_path();

    let error = run_sync(SyncMode::Full, &ClientConfig::default(), &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));

    cleanup_db_files(&db_path);
}

#[test]
fn run_completions_writes_bash_script() {
    let output_path = std::env::temp_dir().join(format!(
        "gluco-cli-completions-test-{}.bash",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos())
    ));

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_gluco()"));
    assert!(script.contains("complete -F _gluco"));
    assert!(script.contains("conflicts"));

    let _ = std::fs::remove_file(output_path);
}

#[test]
fn run_completions_uses_conventional_name_inside_directory() {
    let dir = tempfile::tempdir().unwrap();

    run_completions(CompletionShell::Zsh, Some(dir.path())).unwrap();

    let script = std::fs::read_to_string(dir.path().join("_gluco")).unwrap();
    assert!(script.contains("#compdef gluco"));
}

/// Local reading linked to server record 5, diverging from it
async fn seed_conflict(db_path: &PathBuf) -> (gluco_core::ReadingId, i64) {
    let store = ReadingStore::open_path(db_path).await.unwrap();
    let mut local = Reading::new(NewReading::new(120.0, GlucoseUnit::MgDl).at(5_000));
    local.remote_id = Some(5);
    store.add(&local).await.unwrap();

    let remote = RemoteReading {
        remote_id: 5,
        value: 135.0,
        timestamp: 5_000,
        note: None,
        category: local.category,
    };
    let conflict_id = store
        .insert_conflict(&local.id, &local.snapshot(), &remote)
        .await
        .unwrap();
    (local.id, conflict_id)
}

fn unique_test_db_path() -> PathBuf {
    static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("gluco-cli-test-{timestamp}-{sequence}.db"))
}

fn cleanup_db_files(path: &PathBuf) {
    // On Windows, libsql can keep file handles alive briefly after drop.
    if cfg!(windows) {
        return;
    }

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
}
