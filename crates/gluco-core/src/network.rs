//! Connectivity monitoring.
//!
//! A `NetworkMonitor` asks a `ConnectivityProbe` whether the backend is
//! reachable and publishes transitions. Failed or slow probes count as online
//! so a flaky check never blocks sync.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::sync::RemoteError;

const EVENT_CAPACITY: usize = 16;

/// Reachability of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Offline to online only
    BecameOnline,
    WentOffline,
}

/// Source of truth for reachability
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> Result<NetworkStatus, RemoteError>;
}

/// Probe that issues a HEAD request against the API base URL.
///
/// Any HTTP response means the host is reachable; connection failures mean
/// offline.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> Result<NetworkStatus, RemoteError> {
        match self.client.head(&self.url).send().await {
            Ok(_) => Ok(NetworkStatus::Online),
            Err(error) if error.is_connect() => Ok(NetworkStatus::Offline),
            Err(error) => Err(error.into()),
        }
    }
}

/// Probe whose answer is set by hand
#[derive(Debug)]
pub struct StaticProbe {
    status: Mutex<NetworkStatus>,
}

impl StaticProbe {
    pub const fn new(status: NetworkStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }

    pub fn set(&self, status: NetworkStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn check(&self) -> Result<NetworkStatus, RemoteError> {
        Ok(*self.status.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct MonitorInner {
    probe: Arc<dyn ConnectivityProbe>,
    timeout: Duration,
    status: watch::Sender<NetworkStatus>,
    events: Mutex<Option<broadcast::Sender<NetworkEvent>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes connectivity status and transitions
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Monitor that starts out online and bounds each probe by `timeout`
    pub fn new(probe: Arc<dyn ConnectivityProbe>, timeout: Duration) -> Self {
        let (status, _) = watch::channel(NetworkStatus::Online);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                timeout,
                status,
                events: Mutex::new(Some(events)),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Probe now and record the result; failures and timeouts count as online
    pub async fn current_status(&self) -> NetworkStatus {
        Self::probe(&self.inner).await
    }

    async fn probe(inner: &MonitorInner) -> NetworkStatus {
        let status = match tokio::time::timeout(inner.timeout, inner.probe.check()).await {
            Ok(Ok(status)) => status,
            Ok(Err(error)) => {
                tracing::warn!("Connectivity check failed, assuming online: {error}");
                NetworkStatus::Online
            }
            Err(_) => {
                tracing::warn!(
                    "Connectivity check timed out after {:?}, assuming online",
                    inner.timeout
                );
                NetworkStatus::Online
            }
        };
        Self::record(inner, status);
        status
    }

    fn record(inner: &MonitorInner, status: NetworkStatus) {
        let previous = inner.status.send_replace(status);
        if previous == status {
            return;
        }

        let event = match status {
            NetworkStatus::Online => NetworkEvent::BecameOnline,
            NetworkStatus::Offline => NetworkEvent::WentOffline,
        };
        tracing::info!("Network is now {}", status.as_str());
        if let Some(events) = lock(&inner.events).as_ref() {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }

    /// Record a status observed elsewhere (for example a platform callback)
    pub fn report(&self, status: NetworkStatus) {
        Self::record(&self.inner, status);
    }

    /// Last recorded status without probing
    pub fn last_status(&self) -> NetworkStatus {
        *self.inner.status.borrow()
    }

    /// Transition events; closed once the monitor is disposed
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        match lock(&self.inner.events).as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Status as a watch channel
    pub fn status_watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.status.subscribe()
    }

    /// Probe every `interval` until disposed; replaces any earlier poller
    pub fn spawn_polling(&self, interval: Duration) {
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::probe(&inner).await;
            }
        });

        if let Some(previous) = lock(&self.inner.poller).replace(task) {
            previous.abort();
        }
    }

    /// Stop polling and close every event subscription
    pub fn dispose(&self) {
        if let Some(poller) = lock(&self.inner.poller).take() {
            poller.abort();
        }
        lock(&self.inner.events).take();
    }
}
