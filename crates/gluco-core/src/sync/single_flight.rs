//! Join-semantics guard for operations that must not run twice at once.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

type Slot<T> = Option<watch::Receiver<Option<T>>>;

/// Runs at most one instance of an operation at a time.
///
/// The first caller becomes the leader and spawns the work onto the runtime;
/// callers arriving while it is in flight wait for and receive a clone of its
/// result. The work runs to completion even if every caller is dropped.
pub struct SingleFlight<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an operation is currently in flight
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `work`, or join the run already in flight.
    ///
    /// A panic inside `work` is resumed in the leader; followers of a run
    /// that died without a result start a fresh one.
    pub async fn run<F, Fut>(&self, work: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        loop {
            let role = {
                let mut slot = self.lock();
                match slot.as_ref() {
                    Some(receiver) => Role::Follower(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        *slot = Some(receiver);
                        Role::Leader(sender)
                    }
                }
            };

            let mut follower = match role {
                Role::Follower(receiver) => receiver,
                Role::Leader(sender) => match self.spawn(sender, work()).await {
                    Ok(result) => return result,
                    Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                    // Runtime shutting down
                    Err(_) => continue,
                },
            };

            let joined = match follower.wait_for(Option::is_some).await {
                Ok(result) => result.clone(),
                // Run died without a result
                Err(_) => None,
            };
            if let Some(result) = joined {
                return result;
            }
        }
    }

    fn spawn<Fut>(&self, sender: watch::Sender<Option<T>>, work: Fut) -> JoinHandle<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let clear = ClearOnDrop {
            slot: Arc::clone(&self.slot),
        };
        tokio::spawn(async move {
            let _clear = clear;
            let result = work.await;
            sender.send_replace(Some(result.clone()));
            result
        })
    }
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

struct ClearOnDrop<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Drop for ClearOnDrop<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}
