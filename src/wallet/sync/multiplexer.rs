//! Fan-out of the chain client's single notification stream.
//!
//! The chain client hands out exactly one notification stream per run. The
//! [`NotificationMultiplexer`] owns that stream and republishes every event to:
//!
//! - one **default** consumer, which is never allowed to stall the upstream.
//!   Events for it go through a [`PendingQueue`], an unbounded FIFO owned by the
//!   multiplexer, and the consumer drains the queue at its own pace.
//! - any number of **subscribers** registered with
//!   [`subscribe`](NotificationMultiplexer::subscribe). Delivery to them is
//!   synchronous with upstream receipt: a subscriber that stops reading stalls
//!   the multiplexer, so subscribers must consume promptly.
//!
//! Every consumer sees events in upstream order. When the upstream closes (or
//! the multiplexer is cancelled) all subscriber streams are closed and events
//! still queued for the default consumer are discarded.

use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded FIFO between the multiplexer (single producer) and the default
/// consumer (single consumer).
pub struct PendingQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
}

impl<T> PendingQueue<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    fn push(&self, item: T) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return;
            }
            state.items.push_back(item);
        }
        self.ready.notify_one();
    }

    /// Close the queue, discarding anything not yet consumed. Returns the
    /// number of discarded items.
    fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            let discarded = state.items.len();
            state.items.clear();
            discarded
        };
        self.ready.notify_one();
        discarded
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // between the check above and this await is not lost.
            self.ready.notified().await;
        }
    }
}

/// The default consumer's end of the multiplexer.
pub struct DefaultStream<T> {
    queue: Arc<PendingQueue<T>>,
}

impl<T: Send + 'static> DefaultStream<T> {
    /// Receive the next event, or `None` once the multiplexer has closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.queue.pop().await
    }

    /// Events received from upstream but not yet consumed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self.queue, |queue| async move {
            let item = queue.pop().await?;
            Some((item, queue))
        })
    }
}

struct Subscribers<T> {
    senders: HashMap<String, mpsc::Sender<T>>,
    closed: bool,
}

struct Shared<T> {
    subscribers: Mutex<Subscribers<T>>,
    pending: Arc<PendingQueue<T>>,
}

impl<T> Shared<T> {
    fn snapshot(&self) -> Vec<(String, mpsc::Sender<T>)> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect()
    }

    fn remove(&self, id: &str) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .remove(id);
    }

    fn close(&self) {
        let discarded = self.pending.close();
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.closed = true;
            subscribers.senders.clear();
        }
        if discarded > 0 {
            warn!(
                "Discarded {} notifications queued for the default consumer",
                discarded
            );
        }
    }
}

/// Republishes one upstream event stream to many consumers.
pub struct NotificationMultiplexer<T> {
    shared: Arc<Shared<T>>,
    default_stream: Mutex<Option<DefaultStream<T>>>,
    capacity: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> NotificationMultiplexer<T> {
    /// Start multiplexing `upstream`. `capacity` is the channel depth given to
    /// each subscriber. The multiplexer stops when `upstream` closes or
    /// `cancel` fires.
    pub fn new(upstream: mpsc::Receiver<T>, capacity: usize, cancel: CancellationToken) -> Self {
        let pending = Arc::new(PendingQueue::new());
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Subscribers {
                senders: HashMap::new(),
                closed: false,
            }),
            pending: pending.clone(),
        });

        let task = tokio::spawn(run(shared.clone(), upstream, cancel));

        Self {
            shared,
            default_stream: Mutex::new(Some(DefaultStream { queue: pending })),
            capacity: capacity.max(1),
            task: Mutex::new(Some(task)),
        }
    }

    /// Take the default consumer stream. Only the first call returns a stream.
    pub fn default_stream(&self) -> Option<DefaultStream<T>> {
        self.default_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Register a subscriber under `id` and return its stream.
    ///
    /// The subscriber receives every event published after this call. If the
    /// multiplexer has already closed, the returned stream is closed too.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already subscribed.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::Receiver<T> {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.senders.contains_key(&id) {
            drop(subscribers);
            panic!("duplicate notification subscription for id {id}");
        }
        if !subscribers.closed {
            debug!("New notification subscriber {}", id);
            subscribers.senders.insert(id, tx);
        }
        rx
    }

    /// Remove a subscriber. Its stream closes once buffered events are read.
    pub fn unsubscribe(&self, id: &str) {
        self.shared.remove(id);
    }

    /// Wait for the multiplexer task to finish.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Notification multiplexer task failed: {}", e);
            }
        }
    }
}

async fn run<T: Clone + Send + 'static>(
    shared: Arc<Shared<T>>,
    mut upstream: mpsc::Receiver<T>,
    cancel: CancellationToken,
) {
    let mut forwarded: u64 = 0;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = upstream.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        shared.pending.push(event.clone());

        for (id, tx) in shared.snapshot() {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = tx.send(event.clone()) => Some(sent),
            };
            match sent {
                None => {
                    shared.close();
                    info!("Notification multiplexer cancelled after {} events", forwarded);
                    return;
                }
                Some(Err(_)) => {
                    debug!("Subscriber {} dropped its stream, removing it", id);
                    shared.remove(&id);
                }
                Some(Ok(())) => {}
            }
        }
        forwarded += 1;
    }

    shared.close();
    info!("Notification multiplexer stopped after {} events", forwarded);
}
