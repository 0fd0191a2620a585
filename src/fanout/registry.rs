use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::fanout::StreamEvent;

pub type SubscriptionId = u64;

// ---------------------------------------------------------------------------
// FanOut
// ---------------------------------------------------------------------------

/// Registry of live subscribers and the publish path that feeds them.
///
/// Events go through one broadcast ring, so every subscriber sees the same
/// order and publishing never waits on a reader. A subscriber that falls
/// `capacity` events behind loses the oldest ones and is told how many.
/// The map only tracks handles: removing an entry drops its cancel sender,
/// which ends that subscriber's stream.
pub struct FanOut {
    tx: broadcast::Sender<Arc<StreamEvent>>,
    subscribers: DashMap<SubscriptionId, oneshot::Sender<()>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FanOut {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            tx,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Register an observer. It receives every event published after this call.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let rx = self.tx.subscribe();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.insert(id, cancel_tx);
            // close() may have swept the map before the insert landed.
            if self.closed.load(Ordering::Acquire) {
                self.subscribers.remove(&id);
            }
        }
        debug!(subscriber = id, total = self.subscriber_count(), "subscriber registered");

        Subscription {
            id,
            rx,
            cancel: Some(cancel_rx),
            dropped: 0,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every open receiver. Returns how many there were.
    pub fn publish(&self, event: StreamEvent) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Remove a subscriber. Idempotent; returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// End every open stream and refuse new subscribers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.clear();
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    rx: broadcast::Receiver<Arc<StreamEvent>>,
    /// Resolves once the registry lets go of this subscriber.
    cancel: Option<oneshot::Receiver<()>>,
    dropped: u64,
    registry: Weak<FanOut>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event in publish order. `None` once unsubscribed or closed.
    pub async fn recv(&mut self) -> Option<Arc<StreamEvent>> {
        loop {
            let cancel = self.cancel.as_mut()?;
            let received = tokio::select! {
                biased;
                _ = cancel => None,
                r = self.rx.recv() => Some(r),
            };
            match received {
                None => {
                    self.cancel = None;
                    return None;
                }
                Some(Ok(event)) => return Some(event),
                Some(Err(RecvError::Lagged(skipped))) => self.record_lag(skipped),
                Some(Err(RecvError::Closed)) => return None,
            }
        }
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<StreamEvent>> {
        use tokio::sync::broadcast::error::TryRecvError;

        let cancel = self.cancel.as_mut()?;
        if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            self.cancel = None;
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(_) => return None,
            }
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            subscriber = self.id,
            skipped,
            dropped = self.dropped,
            "subscriber lagged, oldest events dropped"
        );
    }

    /// Events this subscriber lost by falling behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unsubscribe(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
