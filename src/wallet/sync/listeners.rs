//! Keyed listener registry with fire-and-forget fan-out.
//!
//! Every dispatch runs each listener callback in its own tokio task. The
//! registry counts dispatches that have not finished yet so that callers which
//! must observe all deliveries (e.g. session teardown) can wait for the count
//! to drop to zero.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::debug;

/// Errors returned by [`ListenerRegistry`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("duplicate entry for key: {0}")]
    Duplicate(String),
}

/// Counter of in-flight dispatches with a wait-for-zero barrier.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: self.clone(),
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before checking the count so a decrement
            // between the check and the await can't be missed.
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard {
    inner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// A concurrency-safe set of listeners keyed by subscriber id.
///
/// `L` is usually a listener trait object, e.g.
/// `ListenerRegistry<dyn SyncProgressListener>`.
pub struct ListenerRegistry<L: ?Sized> {
    name: &'static str,
    listeners: RwLock<HashMap<String, Arc<L>>>,
    in_flight: Arc<InFlight>,
}

impl<L: ?Sized + Send + Sync + 'static> ListenerRegistry<L> {
    /// Create an empty registry. `name` is only used in log output.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(HashMap::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Register `listener` under `id`. Fails without replacing anything if
    /// the id is taken.
    pub fn add(&self, id: impl Into<String>, listener: Arc<L>) -> Result<(), ListenerError> {
        let id = id.into();
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.contains_key(&id) {
            return Err(ListenerError::Duplicate(id));
        }
        debug!("Registered {} listener {}", self.name, id);
        listeners.insert(id, listener);
        Ok(())
    }

    /// Remove the listener registered under `id`, if any.
    pub fn remove(&self, id: &str) -> Option<Arc<L>> {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `notify` for every registered listener, each in its own task.
    ///
    /// Returns without waiting for any callback to run. Must be called from
    /// within a tokio runtime.
    pub fn range_async<F>(&self, notify: F)
    where
        F: Fn(&L) + Send + Sync + 'static,
    {
        let snapshot: Vec<Arc<L>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        if snapshot.is_empty() {
            return;
        }

        let notify = Arc::new(notify);
        for listener in snapshot {
            let guard = self.in_flight.enter();
            let notify = notify.clone();
            tokio::spawn(async move {
                let _guard = guard;
                notify(&listener);
            });
        }
    }

    /// Number of dispatched callbacks that have not returned yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until every callback dispatched so far has returned.
    pub async fn wait(&self) {
        self.in_flight.wait().await;
    }
}
