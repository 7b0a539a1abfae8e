//! Offline sync engine.
//!
//! Push drains the local queue into the in-flight journal, submits each entry
//! outside any storage transaction, and settles the whole batch in one
//! transaction. Pull fetches server records and merges them into the store.
//! Both paths are single-flight and report failures through their summaries
//! instead of returning errors.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::db::EntryOutcome;
use crate::live::LiveQuery;
use crate::models::{NewReading, QueueEntry, Reading, Resolution, SyncOperation};
use crate::network::{NetworkEvent, NetworkMonitor};
use crate::services::ReadingStore;
use crate::sync::merge::MergeOptions;
use crate::sync::remote::{ProfileRefresher, RemoteCreate, RemoteError, RemoteService};
use crate::sync::single_flight::SingleFlight;
use crate::Result;

/// Where the push path currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushState {
    #[default]
    Idle,
    Draining,
    /// Submitting the entry at this index of the drained batch
    PushingItem(usize),
    Reconciling,
}

/// Coarse classification of a sync result for user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    NothingToSync,
    Completed,
    PartialSuccess,
    Failed,
}

impl SyncOutcome {
    pub const fn message(self) -> &'static str {
        match self {
            Self::NothingToSync => "Nothing to sync",
            Self::Completed => "Sync completed",
            Self::PartialSuccess => "Partial success",
            Self::Failed => "Sync failed",
        }
    }
}

/// Result of one push pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushSummary {
    pub success: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl PushSummary {
    pub const fn outcome(&self) -> SyncOutcome {
        match (self.success, self.failed) {
            (0, 0) if self.last_error.is_none() => SyncOutcome::NothingToSync,
            (_, 0) if self.last_error.is_none() => SyncOutcome::Completed,
            (0, _) | (_, 0) => SyncOutcome::Failed,
            _ => SyncOutcome::PartialSuccess,
        }
    }
}

/// Result of one pull pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub fetched: usize,
    pub merged: usize,
    pub conflicts: usize,
    pub last_error: Option<String>,
}

impl PullSummary {
    pub const fn outcome(&self) -> SyncOutcome {
        if self.last_error.is_some() {
            SyncOutcome::Failed
        } else if self.fetched == 0 {
            SyncOutcome::NothingToSync
        } else {
            SyncOutcome::Completed
        }
    }
}

/// Result of push followed by pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub pushed: usize,
    pub failed: usize,
    pub fetched: usize,
    pub merged: usize,
    pub conflicts: usize,
    pub last_error: Option<String>,
}

impl SyncSummary {
    fn combine(push: PushSummary, pull: PullSummary) -> Self {
        Self {
            pushed: push.success,
            failed: push.failed,
            fetched: pull.fetched,
            merged: pull.merged,
            conflicts: pull.conflicts,
            last_error: pull.last_error.or(push.last_error),
        }
    }

    pub const fn outcome(&self) -> SyncOutcome {
        let clean = self.failed == 0 && self.last_error.is_none();
        if clean && self.pushed == 0 && self.fetched == 0 {
            SyncOutcome::NothingToSync
        } else if clean {
            SyncOutcome::Completed
        } else if self.pushed > 0 || self.merged > 0 {
            SyncOutcome::PartialSuccess
        } else {
            SyncOutcome::Failed
        }
    }
}

/// A reading recorded through `create_and_push`
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedReading {
    /// Stored state after the push attempt
    pub reading: Reading,
    /// `None` when the push was skipped because the device is offline
    pub push: Option<PushSummary>,
}

struct EngineInner {
    store: ReadingStore,
    remote: Arc<dyn RemoteService>,
    refresher: Option<Arc<dyn ProfileRefresher>>,
    monitor: Option<NetworkMonitor>,
    config: SyncConfig,
    push_flight: SingleFlight<PushSummary>,
    pull_flight: SingleFlight<PullSummary>,
    latest_flight: SingleFlight<PullSummary>,
    push_state: watch::Sender<PushState>,
}

/// Configures and builds a `SyncEngine`
pub struct SyncEngineBuilder {
    store: ReadingStore,
    remote: Arc<dyn RemoteService>,
    refresher: Option<Arc<dyn ProfileRefresher>>,
    monitor: Option<NetworkMonitor>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Refreshed (best effort) after every push with at least one success
    #[must_use]
    pub fn profile_refresher(mut self, refresher: Arc<dyn ProfileRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Consulted before pushing a freshly created reading
    #[must_use]
    pub fn network_monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Build the engine, first restoring any batch interrupted mid-push
    pub async fn build(self) -> Result<SyncEngine> {
        self.store.restore_inflight().await?;
        let (push_state, _) = watch::channel(PushState::Idle);

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                remote: self.remote,
                refresher: self.refresher,
                monitor: self.monitor,
                config: self.config,
                push_flight: SingleFlight::new(),
                pull_flight: SingleFlight::new(),
                latest_flight: SingleFlight::new(),
                push_state,
            }),
        })
    }
}

/// Offline-first sync engine; clones share all state
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder(store: ReadingStore, remote: Arc<dyn RemoteService>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            remote,
            refresher: None,
            monitor: None,
            config: SyncConfig::default(),
        }
    }

    /// Engine with `config` and no optional collaborators
    pub async fn new(
        store: ReadingStore,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
    ) -> Result<Self> {
        Self::builder(store, remote).config(config).build().await
    }

    pub fn store(&self) -> &ReadingStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Current push phase
    pub fn push_state(&self) -> watch::Receiver<PushState> {
        self.inner.push_state.subscribe()
    }

    fn set_push_state(&self, state: PushState) {
        self.inner.push_state.send_replace(state);
    }

    /// Record a reading, queue it, and push immediately when online.
    ///
    /// Validation errors are returned; push failures only show up in the
    /// summary and leave the entry queued for retry.
    pub async fn create_and_push(&self, input: NewReading) -> Result<CreatedReading> {
        let reading = self.inner.store.create_reading(input).await?;

        if let Some(monitor) = &self.inner.monitor {
            if !monitor.current_status().await.is_online() {
                tracing::info!("Offline; reading {} stays queued", reading.id);
                return Ok(CreatedReading {
                    reading,
                    push: None,
                });
            }
        }

        let push = self.push_pending().await;
        let id = reading.id;
        let reading = self.inner.store.get(&id).await?.unwrap_or(reading);
        Ok(CreatedReading {
            reading,
            push: Some(push),
        })
    }

    /// Push every queued mutation, or join the push already in flight.
    ///
    /// The push runs on its own task and finishes even if the caller is dropped.
    pub async fn push_pending(&self) -> PushSummary {
        self.inner
            .push_flight
            .run(|| {
                let engine = self.clone();
                async move { engine.run_push().await }
            })
            .await
    }

    async fn run_push(&self) -> PushSummary {
        self.set_push_state(PushState::Draining);
        // Leftovers of a batch whose settle failed go out again with this one
        if let Err(error) = self.inner.store.restore_inflight().await {
            tracing::warn!("Failed to restore journaled sync entries: {error}");
        }
        let entries = match self.inner.store.drain_queue().await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("Failed to drain sync queue: {error}");
                self.set_push_state(PushState::Idle);
                return PushSummary {
                    last_error: Some(error.to_string()),
                    ..PushSummary::default()
                };
            }
        };

        if entries.is_empty() {
            self.set_push_state(PushState::Idle);
            return PushSummary::default();
        }

        tracing::debug!("Pushing {} queued entries", entries.len());
        let mut outcomes = Vec::with_capacity(entries.len());
        let mut summary = PushSummary::default();

        for (index, entry) in entries.into_iter().enumerate() {
            self.set_push_state(PushState::PushingItem(index));
            let outcome = self.push_entry(entry).await;
            match &outcome {
                EntryOutcome::Succeeded { .. } => summary.success += 1,
                EntryOutcome::Failed { error, .. } => {
                    summary.failed += 1;
                    summary.last_error = Some(error.clone());
                }
            }
            outcomes.push(outcome);
        }

        self.set_push_state(PushState::Reconciling);
        match self
            .inner
            .store
            .settle_batch(&outcomes, self.inner.config.max_retries)
            .await
        {
            Ok(report) => {
                for dropped in report.dropped {
                    tracing::warn!(
                        "Dropping {} for reading {} after {} failed attempts: {}",
                        dropped.operation.kind(),
                        dropped.reading_id,
                        dropped.retry_count,
                        dropped.last_error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Err(error) => {
                // The batch stays journaled and is restored by the next push
                tracing::warn!("Failed to settle push batch: {error}");
                summary.last_error = Some(error.to_string());
            }
        }
        self.set_push_state(PushState::Idle);

        tracing::info!(
            "Push finished: {} succeeded, {} failed",
            summary.success,
            summary.failed
        );
        if summary.success > 0 {
            self.spawn_profile_refresh();
        }
        summary
    }

    async fn push_entry(&self, entry: QueueEntry) -> EntryOutcome {
        let snapshot = match &entry.operation {
            // The backend has no delete endpoint
            SyncOperation::Delete => {
                return EntryOutcome::Succeeded {
                    entry,
                    remote_id: None,
                };
            }
            // The backend has no update endpoint either; updates are resubmitted
            SyncOperation::Create(snapshot) | SyncOperation::Update(snapshot) => snapshot,
        };

        let request = RemoteCreate::from_snapshot(snapshot);
        let result = tokio::time::timeout(
            self.inner.config.network_timeout,
            self.inner.remote.create_reading(&request),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));

        match result {
            Ok(remote_id) => {
                tracing::debug!("Reading {} accepted as {remote_id}", entry.reading_id);
                EntryOutcome::Succeeded {
                    entry,
                    remote_id: Some(remote_id),
                }
            }
            Err(error) => {
                tracing::debug!("Push of reading {} failed: {error}", entry.reading_id);
                EntryOutcome::Failed {
                    entry,
                    error: error.to_string(),
                }
            }
        }
    }

    fn spawn_profile_refresh(&self) {
        let Some(refresher) = self.inner.refresher.clone() else {
            return;
        };
        let timeout = self.inner.config.network_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, refresher.refresh()).await {
                Ok(Ok(())) => tracing::debug!("Profile refreshed after push"),
                Ok(Err(error)) => tracing::warn!("Profile refresh failed: {error}"),
                Err(_) => tracing::warn!("Profile refresh timed out after {timeout:?}"),
            }
        });
    }

    /// Fetch server records and reconcile them, creating conflicts
    pub async fn pull_from_remote(&self) -> PullSummary {
        self.inner
            .pull_flight
            .run(|| {
                let engine = self.clone();
                async move { engine.run_pull(false).await }
            })
            .await
    }

    /// Fetch only the most recent server records and let the server win
    pub async fn pull_latest(&self) -> PullSummary {
        self.inner
            .latest_flight
            .run(|| {
                let engine = self.clone();
                async move { engine.run_pull(true).await }
            })
            .await
    }

    async fn run_pull(&self, latest: bool) -> PullSummary {
        let fetch = async {
            if latest {
                self.inner.remote.list_latest().await
            } else {
                self.inner.remote.list_mine().await
            }
        };
        let fetched = tokio::time::timeout(self.inner.config.network_timeout, fetch)
            .await
            .unwrap_or(Err(RemoteError::Timeout));

        let mut records = match fetched {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!("Fetching server readings failed: {error}");
                return PullSummary {
                    last_error: Some(error.to_string()),
                    ..PullSummary::default()
                };
            }
        };

        if records.len() > self.inner.config.pull_limit {
            records.sort_by_key(|record| std::cmp::Reverse(record.timestamp));
            records.truncate(self.inner.config.pull_limit);
        }

        let options = MergeOptions {
            tolerance_ms: self.inner.config.match_tolerance_ms(),
            create_conflicts: !latest,
        };
        match self.inner.store.merge_remote(&records, options).await {
            Ok(report) => {
                tracing::info!(
                    "Pull finished: {} fetched, {} merged, {} conflicts",
                    report.fetched,
                    report.merged(),
                    report.conflicts
                );
                PullSummary {
                    fetched: report.fetched,
                    merged: report.merged(),
                    conflicts: report.conflicts,
                    last_error: None,
                }
            }
            Err(error) => {
                tracing::warn!("Merging server readings failed: {error}");
                PullSummary {
                    fetched: records.len(),
                    last_error: Some(error.to_string()),
                    ..PullSummary::default()
                }
            }
        }
    }

    /// Push, then pull
    pub async fn full_sync(&self) -> SyncSummary {
        let push = self.push_pending().await;
        let pull = self.pull_from_remote().await;
        SyncSummary::combine(push, pull)
    }

    /// Apply a human decision to a pending conflict.
    ///
    /// Returns the server copy inserted by `KeepBoth`.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
    ) -> Result<Option<Reading>> {
        self.inner
            .store
            .resolve_conflict(conflict_id, resolution)
            .await
    }

    /// Live reading list, newest first
    pub async fn live_readings(&self) -> Result<LiveQuery<Vec<Reading>>> {
        self.inner.store.watch_readings().await
    }

    /// Live number of queued mutations
    pub async fn live_pending_count(&self) -> Result<LiveQuery<usize>> {
        self.inner.store.watch_pending_count().await
    }

    /// Live number of unresolved conflicts
    pub async fn live_conflict_count(&self) -> Result<LiveQuery<usize>> {
        self.inner.store.watch_conflict_count().await
    }

    /// Run a full sync every time `monitor` reports the network came back
    pub fn spawn_auto_sync(&self, monitor: &NetworkMonitor) -> JoinHandle<()> {
        let engine = self.clone();
        let mut events = monitor.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(NetworkEvent::BecameOnline) => {
                        let summary = engine.full_sync().await;
                        tracing::info!("Auto sync: {}", summary.outcome().message());
                    }
                    Ok(NetworkEvent::WentOffline) => tracing::debug!("Offline; auto sync paused"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Auto sync skipped {skipped} network events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictStatus, GlucoseUnit, ReadingCategory, RemoteReading};
    use crate::network::{NetworkStatus, StaticProbe};
    use crate::sync::fake::{CountingRefresher, FakeRemote};
    use crate::Error;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const MINUTE: i64 = 60_000;
    const T0: i64 = 1_737_000_000_000;

    async fn engine_with(remote: Arc<FakeRemote>) -> (ReadingStore, SyncEngine) {
        let store = ReadingStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(store.clone(), remote, SyncConfig::default())
            .await
            .unwrap();
        (store, engine)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_success_links_remote_id() {
        let remote = Arc::new(FakeRemote::new().with_next_id(42));
        let (store, engine) = engine_with(remote.clone()).await;
        let reading = store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl).at(T0))
            .await
            .unwrap();

        let summary = engine.push_pending().await;

        assert_eq!(
            summary,
            PushSummary {
                success: 1,
                failed: 0,
                last_error: None
            }
        );
        let stored = store.get(&reading.id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.remote_id, Some(42));
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(*engine.push_state().borrow(), PushState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_pushes_share_one_submission() {
        let remote = Arc::new(FakeRemote::new().with_delay(Duration::from_millis(100)));
        let (store, engine) = engine_with(remote.clone()).await;
        for value in [100.0, 110.0] {
            store
                .create_reading(NewReading::new(value, GlucoseUnit::MgDl))
                .await
                .unwrap();
        }

        let (first, second) = tokio::join!(engine.push_pending(), engine.push_pending());

        assert_eq!(first, second);
        assert_eq!(first.success, 2);
        assert_eq!(remote.submissions().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_queue_is_nothing_to_sync() {
        let (_store, engine) = engine_with(Arc::new(FakeRemote::new())).await;

        let summary = engine.push_pending().await;

        assert_eq!(summary, PushSummary::default());
        assert_eq!(summary.outcome(), SyncOutcome::NothingToSync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entry_is_dropped_after_three_failures() {
        let remote = Arc::new(FakeRemote::new());
        remote.fail_always(RemoteError::Rejected("value out of range".to_string()));
        let (store, engine) = engine_with(remote.clone()).await;
        let reading = store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();

        for attempt in 1..=3 {
            let summary = engine.push_pending().await;
            assert_eq!(summary.failed, 1, "attempt {attempt}");
            assert_eq!(summary.outcome(), SyncOutcome::Failed);
        }
        assert_eq!(store.pending_count().await.unwrap(), 0);

        remote.recover();
        let fourth = engine.push_pending().await;
        assert_eq!(fourth, PushSummary::default());
        assert_eq!(remote.submissions().len(), 3);
        assert!(!store.get(&reading.id).await.unwrap().unwrap().synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_failure_requeues_only_failed_entries() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let first = store
            .create_reading(NewReading::new(100.0, GlucoseUnit::MgDl).at(T0))
            .await
            .unwrap();
        let second = store
            .create_reading(NewReading::new(140.0, GlucoseUnit::MgDl).at(T0 + MINUTE))
            .await
            .unwrap();
        remote.fail_next(RemoteError::Timeout);

        let summary = engine.push_pending().await;

        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcome(), SyncOutcome::PartialSuccess);
        assert_eq!(summary.last_error.as_deref(), Some("Request timed out"));

        let queue = store.list_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].reading_id, first.id);
        assert_eq!(queue[0].retry_count, 1);
        assert!(store.get(&second.id).await.unwrap().unwrap().synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_entries_are_acknowledged_locally() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let reading = store
            .create_reading(NewReading::new(100.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        store.remove_reading(&reading.id).await.unwrap();

        let summary = engine.push_pending().await;

        // The create still reaches the server; the delete has nowhere to go
        assert_eq!(summary.success, 2);
        assert_eq!(remote.submissions().len(), 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mmol_readings_are_pushed_in_mg_dl() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        store
            .create_reading(NewReading::new(5.5, GlucoseUnit::MmolL))
            .await
            .unwrap();

        engine.push_pending().await;

        let submitted = remote.submissions();
        assert!((submitted[0].value - 99.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_links_nearby_unsynced_reading() {
        let remote = Arc::new(FakeRemote::new());
        remote.insert_record(RemoteReading {
            remote_id: 7,
            value: 120.0,
            timestamp: T0 + 10 * MINUTE,
            note: None,
            category: ReadingCategory::Other,
        });
        let (store, engine) = engine_with(remote.clone()).await;
        let local = store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl).at(T0))
            .await
            .unwrap();

        let summary = engine.pull_from_remote().await;

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.conflicts, 0);
        assert_eq!(store.count(&Default::default()).await.unwrap(), 1);
        let linked = store.get(&local.id).await.unwrap().unwrap();
        assert_eq!(linked.remote_id, Some(7));
        assert!(linked.synced);
        // Linking makes the queued create redundant
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_outside_tolerance_inserts_new_reading() {
        let remote = Arc::new(FakeRemote::new());
        remote.insert_record(RemoteReading {
            remote_id: 7,
            value: 120.0,
            timestamp: T0 + 45 * MINUTE,
            note: None,
            category: ReadingCategory::Other,
        });
        let (store, engine) = engine_with(remote).await;
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl).at(T0))
            .await
            .unwrap();

        engine.pull_from_remote().await;

        assert_eq!(store.count(&Default::default()).await.unwrap(), 2);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_failure_is_reported_not_raised() {
        let remote = Arc::new(FakeRemote::new());
        remote.fail_always(RemoteError::Network("connection reset".to_string()));
        let (_store, engine) = engine_with(remote).await;

        let summary = engine.pull_from_remote().await;

        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.outcome(), SyncOutcome::Failed);
        assert_eq!(
            summary.last_error.as_deref(),
            Some("Network error: connection reset")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_respects_limit() {
        let remote = Arc::new(FakeRemote::new());
        for index in 0..5 {
            remote.insert_record(RemoteReading {
                remote_id: index + 1,
                value: 100.0 + index as f64,
                timestamp: T0 + index * MINUTE,
                note: None,
                category: ReadingCategory::Fasting,
            });
        }
        let store = ReadingStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            SyncConfig::default().with_pull_limit(3),
        )
        .await
        .unwrap();

        let summary = engine.pull_from_remote().await;

        assert_eq!(summary.fetched, 3);
        let readings = store.query(&Default::default()).await.unwrap();
        let mut remote_ids = readings
            .iter()
            .filter_map(|reading| reading.remote_id)
            .collect::<Vec<_>>();
        remote_ids.sort_unstable();
        assert_eq!(remote_ids, vec![3, 4, 5]);
    }

    /// Unsynced local reading linked to remote id 5, which the server changed
    async fn seed_conflict(store: &ReadingStore, remote: &FakeRemote) -> Reading {
        let mut local = Reading::new(NewReading::new(120.0, GlucoseUnit::MgDl).at(T0));
        local.remote_id = Some(5);
        store.add(&local).await.unwrap();
        remote.insert_record(RemoteReading {
            remote_id: 5,
            value: 135.0,
            timestamp: T0,
            note: Some("server".to_string()),
            category: ReadingCategory::AfterMeal,
        });
        local
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_pull_records_conflict_and_keep_both_duplicates() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let local = seed_conflict(&store, &remote).await;

        let summary = engine.pull_from_remote().await;
        assert_eq!(summary.conflicts, 1);
        let conflict = store
            .list_conflicts(ConflictStatus::Pending, 10)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(conflict.reading_id, local.id);

        let copy = engine
            .resolve_conflict(conflict.id, Resolution::KeepBoth)
            .await
            .unwrap()
            .unwrap();

        let original = store.get(&local.id).await.unwrap().unwrap();
        assert!(!original.synced);
        assert!((original.value - 120.0).abs() < f64::EPSILON);
        let queue = store.list_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].reading_id, local.id);
        assert!(matches!(queue[0].operation, SyncOperation::Update(_)));

        let stored_copy = store.get(&copy.id).await.unwrap().unwrap();
        assert!(stored_copy.synced);
        assert!((stored_copy.value - 135.0).abs() < f64::EPSILON);
        assert_eq!(stored_copy.note.as_deref(), Some("server"));
        assert_eq!(store.pending_conflict_count().await.unwrap(), 0);
        assert_eq!(store.list_audit(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_server_overwrites_local() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let local = seed_conflict(&store, &remote).await;
        engine.pull_from_remote().await;
        let conflict = store
            .list_conflicts(ConflictStatus::Pending, 10)
            .await
            .unwrap()
            .remove(0);

        let copy = engine
            .resolve_conflict(conflict.id, Resolution::KeepServer)
            .await
            .unwrap();

        assert_eq!(copy, None);
        let overwritten = store.get(&local.id).await.unwrap().unwrap();
        assert!(overwritten.synced);
        assert!((overwritten.value - 135.0).abs() < f64::EPSILON);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_latest_lets_server_win() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let local = seed_conflict(&store, &remote).await;

        let summary = engine.pull_latest().await;

        assert_eq!(summary.conflicts, 0);
        let overwritten = store.get(&local.id).await.unwrap().unwrap();
        assert!((overwritten.value - 135.0).abs() < f64::EPSILON);
        assert_eq!(store.pending_conflict_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_rejects_missing_and_resolved_conflicts() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;

        let missing = engine.resolve_conflict(999, Resolution::KeepMine).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        seed_conflict(&store, &remote).await;
        engine.pull_from_remote().await;
        let conflict = store
            .list_conflicts(ConflictStatus::Pending, 10)
            .await
            .unwrap()
            .remove(0);
        engine
            .resolve_conflict(conflict.id, Resolution::KeepMine)
            .await
            .unwrap();

        let again = engine
            .resolve_conflict(conflict.id, Resolution::KeepServer)
            .await;
        assert!(matches!(again, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_sync_pushes_then_pulls() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl).at(T0))
            .await
            .unwrap();

        let summary = engine.full_sync().await;

        assert_eq!(summary.pushed, 1);
        assert_eq!(summary.fetched, 1);
        // The pulled record is the one just pushed
        assert_eq!(store.count(&Default::default()).await.unwrap(), 1);
        assert_eq!(summary.outcome(), SyncOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interrupted_batch_is_restored_on_start() {
        let store = ReadingStore::open_in_memory().await.unwrap();
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        store.drain_queue().await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let remote = Arc::new(FakeRemote::new());
        let engine = SyncEngine::new(store.clone(), remote, SyncConfig::default())
            .await
            .unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(engine.push_pending().await.success, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn journaled_leftovers_go_out_with_the_next_push() {
        let remote = Arc::new(FakeRemote::new());
        let (store, engine) = engine_with(remote.clone()).await;
        let reading = store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        // A batch drained after start whose settle never happened
        store.drain_queue().await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let summary = engine.push_pending().await;

        assert_eq!(summary.success, 1);
        assert_eq!(remote.submissions().len(), 1);
        assert!(store.get(&reading.id).await.unwrap().unwrap().synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_push_still_settles() {
        let remote = Arc::new(
            FakeRemote::new()
                .with_next_id(42)
                .with_delay(Duration::from_millis(100)),
        );
        let (store, engine) = engine_with(remote.clone()).await;
        let reading = store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), engine.push_pending()).await;
        assert!(abandoned.is_err());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.get(&reading.id).await.unwrap().unwrap().synced {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stored = store.get(&reading.id).await.unwrap().unwrap();
        assert_eq!(stored.remote_id, Some(42));
        assert_eq!(store.pending_count().await.unwrap(), 0);

        // Nothing is left to resubmit
        engine.push_pending().await;
        assert_eq!(remote.submissions().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_push_refreshes_profile() {
        let remote = Arc::new(FakeRemote::new());
        let refresher = Arc::new(CountingRefresher::default());
        let store = ReadingStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::builder(store.clone(), remote)
            .profile_refresher(refresher.clone())
            .build()
            .await
            .unwrap();
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();

        engine.push_pending().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while refresher.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_refresh_does_not_affect_push() {
        let remote = Arc::new(FakeRemote::new());
        let store = ReadingStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::builder(store.clone(), remote)
            .profile_refresher(Arc::new(CountingRefresher::failing()))
            .build()
            .await
            .unwrap();
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();

        let summary = engine.push_pending().await;

        assert_eq!(summary.outcome(), SyncOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_push_skips_push_offline() {
        let remote = Arc::new(FakeRemote::new());
        let probe = Arc::new(StaticProbe::new(NetworkStatus::Offline));
        let monitor = NetworkMonitor::new(probe.clone(), Duration::from_secs(1));
        let store = ReadingStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::builder(store.clone(), remote.clone())
            .network_monitor(monitor)
            .build()
            .await
            .unwrap();

        let offline = engine
            .create_and_push(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        assert_eq!(offline.push, None);
        assert!(!offline.reading.synced);
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert!(remote.submissions().is_empty());

        probe.set(NetworkStatus::Online);
        let online = engine
            .create_and_push(NewReading::new(130.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        assert_eq!(online.push.map(|push| push.success), Some(2));
        assert!(online.reading.synced);
        assert!(online.reading.remote_id.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_push_rejects_invalid_values() {
        let (store, engine) = engine_with(Arc::new(FakeRemote::new())).await;

        let result = engine
            .create_and_push(NewReading::new(-5.0, GlucoseUnit::MgDl))
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auto_sync_runs_when_network_returns() {
        let remote = Arc::new(FakeRemote::new());
        let monitor = NetworkMonitor::new(
            Arc::new(StaticProbe::new(NetworkStatus::Offline)),
            Duration::from_secs(1),
        );
        let (store, engine) = engine_with(remote.clone()).await;
        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        let task = engine.spawn_auto_sync(&monitor);

        monitor.report(NetworkStatus::Offline);
        monitor.report(NetworkStatus::Online);

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.pending_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(remote.submissions().len(), 1);

        monitor.dispose();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_pending_count_follows_push() {
        let (store, engine) = engine_with(Arc::new(FakeRemote::new())).await;
        let mut pending = engine.live_pending_count().await.unwrap();
        assert_eq!(pending.current(), 0);

        store
            .create_reading(NewReading::new(120.0, GlucoseUnit::MgDl))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while pending.current() != 1 {
                pending.next().await;
            }
        })
        .await
        .unwrap();

        engine.push_pending().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while pending.current() != 0 {
                pending.next().await;
            }
        })
        .await
        .unwrap();
    }
}
