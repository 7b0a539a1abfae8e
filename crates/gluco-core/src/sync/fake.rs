//! In-process backend for tests and offline demos.
//!
//! `FakeRemote` keeps server records in memory, assigns sequential ids, and
//! can be scripted to fail or to stall so engine behaviour under partial
//! failure and concurrency can be exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{RemoteId, RemoteReading};
use crate::sync::remote::{ProfileRefresher, RemoteCreate, RemoteError, RemoteService};

const DEFAULT_LATEST_WINDOW: usize = 10;

#[derive(Debug)]
struct FakeState {
    next_id: RemoteId,
    records: Vec<RemoteReading>,
    submissions: Vec<RemoteCreate>,
    scripted_failures: VecDeque<RemoteError>,
    failing: Option<RemoteError>,
    latest_window: usize,
}

/// Scriptable in-memory `RemoteService`
#[derive(Debug)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    delay: Option<Duration>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 1,
                records: Vec::new(),
                submissions: Vec::new(),
                scripted_failures: VecDeque::new(),
                failing: None,
                latest_window: DEFAULT_LATEST_WINDOW,
            }),
            delay: None,
        }
    }

    /// Id handed out by the next successful create
    #[must_use]
    pub fn with_next_id(self, next_id: RemoteId) -> Self {
        self.lock().next_id = next_id;
        self
    }

    /// Stall every call by `delay`
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stall(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Seed a server-side record
    pub fn insert_record(&self, record: RemoteReading) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(record.remote_id + 1);
        state.records.push(record);
    }

    /// Fail the next create with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Fail every call with `error` until `recover` is called
    pub fn fail_always(&self, error: RemoteError) {
        self.lock().failing = Some(error);
    }

    pub fn recover(&self) {
        self.lock().failing = None;
    }

    /// Every create request that reached the server, accepted or not
    pub fn submissions(&self) -> Vec<RemoteCreate> {
        self.lock().submissions.clone()
    }

    /// Server-side records
    pub fn records(&self) -> Vec<RemoteReading> {
        self.lock().records.clone()
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn create_reading(&self, reading: &RemoteCreate) -> Result<RemoteId, RemoteError> {
        self.stall().await;
        let mut state = self.lock();
        state.submissions.push(reading.clone());

        if let Some(error) = state.failing.clone() {
            return Err(error);
        }
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }

        let remote_id = state.next_id;
        state.next_id += 1;
        state.records.push(RemoteReading {
            remote_id,
            value: reading.value,
            timestamp: reading
                .timestamp
                .unwrap_or_else(|| crate::util::now_ms()),
            note: reading.note.clone(),
            category: reading.category,
        });
        Ok(remote_id)
    }

    async fn list_mine(&self) -> Result<Vec<RemoteReading>, RemoteError> {
        self.stall().await;
        let state = self.lock();
        if let Some(error) = state.failing.clone() {
            return Err(error);
        }
        Ok(state.records.clone())
    }

    async fn list_latest(&self) -> Result<Vec<RemoteReading>, RemoteError> {
        self.stall().await;
        let state = self.lock();
        if let Some(error) = state.failing.clone() {
            return Err(error);
        }
        let mut records = state.records.clone();
        records.sort_by_key(|record| std::cmp::Reverse(record.timestamp));
        records.truncate(state.latest_window);
        Ok(records)
    }
}

/// `ProfileRefresher` that counts calls and can be made to fail
#[derive(Debug, Default)]
pub struct CountingRefresher {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingRefresher {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileRefresher for CountingRefresher {
    async fn refresh(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(RemoteError::Timeout)
        } else {
            Ok(())
        }
    }
}
