//! Live queries over the reading store.
//!
//! A `LiveQuery` owns a background task that re-runs its query every time the
//! store revision moves and publishes the result on a watch channel. Dropping
//! or cancelling one query aborts only its own task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

use crate::db::{ReadingFilter, ReadingQuery, SortOrder};
use crate::models::Reading;
use crate::services::ReadingStore;
use crate::Result;

/// Most readings a live reading list holds
pub const LIVE_READINGS_LIMIT: usize = 500;

/// Subscription to a query result that stays current with the store
pub struct LiveQuery<T> {
    receiver: watch::Receiver<T>,
    task: AbortOnDrop,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run `load` once, then again after every store change.
    pub async fn spawn<F, Fut>(mut changes: watch::Receiver<u64>, load: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        changes.borrow_and_update();
        let initial = load().await?;
        let (sender, receiver) = watch::channel(initial);

        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                changes.borrow_and_update();
                match load().await {
                    Ok(value) => {
                        if sender.send(value).is_err() {
                            break;
                        }
                    }
                    Err(error) => tracing::warn!("Live query refresh failed: {error}"),
                }
            }
        });

        Ok(Self {
            receiver,
            task: AbortOnDrop(task),
        })
    }

    /// Latest published value
    pub fn current(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published value; `None` once the query has stopped
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop refreshing this query
    pub fn cancel(&self) {
        self.task.0.abort();
    }

    /// Whether the refresh task has stopped
    pub fn is_cancelled(&self) -> bool {
        self.task.0.is_finished()
    }

    /// Adapt into a stream that yields the current value and then every update
    pub fn into_stream(self) -> LiveStream<T> {
        let Self { receiver, task } = self;
        LiveStream {
            inner: WatchStream::new(receiver),
            _task: task,
        }
    }
}

/// Stream form of a `LiveQuery`; dropping it cancels the query
pub struct LiveStream<T> {
    inner: WatchStream<T>,
    _task: AbortOnDrop,
}

impl<T> Stream for LiveStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl ReadingStore {
    /// Live list of readings, newest first
    pub async fn watch_readings(&self) -> Result<LiveQuery<Vec<Reading>>> {
        let store = self.clone();
        let query = ReadingQuery::new(ReadingFilter::default())
            .order(SortOrder::NewestFirst)
            .limit(LIVE_READINGS_LIMIT);
        LiveQuery::spawn(self.subscribe_changes(), move || {
            let store = store.clone();
            let query = query.clone();
            async move { store.query(&query).await }
        })
        .await
    }

    /// Live count of queued mutations
    pub async fn watch_pending_count(&self) -> Result<LiveQuery<usize>> {
        let store = self.clone();
        LiveQuery::spawn(self.subscribe_changes(), move || {
            let store = store.clone();
            async move { store.pending_count().await }
        })
        .await
    }

    /// Live count of unresolved conflicts
    pub async fn watch_conflict_count(&self) -> Result<LiveQuery<usize>> {
        let store = self.clone();
        LiveQuery::spawn(self.subscribe_changes(), move || {
            let store = store.clone();
            async move { store.pending_conflict_count().await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GlucoseUnit, NewReading, RemoteReading};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    const WAIT: Duration = Duration::from_secs(5);

    fn at(value: f64, timestamp: i64) -> NewReading {
        NewReading::new(value, GlucoseUnit::MgDl).at(timestamp)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn readings_are_newest_first_and_refresh() {
        let store = ReadingStore::open_in_memory().await.unwrap();
        store.create_reading(at(100.0, 1_000)).await.unwrap();

        let mut live = store.watch_readings().await.unwrap();
        assert_eq!(live.current().len(), 1);

        store.create_reading(at(140.0, 5_000)).await.unwrap();
        let readings = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap();
        let timestamps: Vec<_> = readings.iter().map(|reading| reading.timestamp).collect();
        assert_eq!(timestamps, vec![5_000, 1_000]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_count_tracks_queue() {
        let store = ReadingStore::open_in_memory().await.unwrap();
        let mut pending = store.watch_pending_count().await.unwrap();
        assert_eq!(pending.current(), 0);

        store.create_reading(at(100.0, 1_000)).await.unwrap();
        assert_eq!(tokio::time::timeout(WAIT, pending.next()).await.unwrap(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_one_query_leaves_others_running() {
        let store = ReadingStore::open_in_memory().await.unwrap();
        let cancelled = store.watch_pending_count().await.unwrap();
        let mut kept = store.watch_pending_count().await.unwrap();

        cancelled.cancel();
        store.create_reading(at(100.0, 1_000)).await.unwrap();

        assert_eq!(tokio::time::timeout(WAIT, kept.next()).await.unwrap(), Some(1));
        tokio::time::timeout(WAIT, async {
            while !cancelled.is_cancelled() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_yields_current_then_updates() {
        let store = ReadingStore::open_in_memory().await.unwrap();
        let mut stream = store.watch_conflict_count().await.unwrap().into_stream();

        assert_eq!(tokio::time::timeout(WAIT, stream.next()).await.unwrap(), Some(0));

        let reading = store.create_reading(at(100.0, 1_000)).await.unwrap();
        let remote = RemoteReading {
            remote_id: 3,
            value: 180.0,
            timestamp: 1_000,
            note: None,
            category: reading.category,
        };
        store
            .insert_conflict(&reading.id, &reading.snapshot(), &remote)
            .await
            .unwrap();

        let mut latest = None;
        while latest != Some(1) {
            latest = tokio::time::timeout(WAIT, stream.next()).await.unwrap();
        }
    }
}
