//! Change notification hub.
//!
//! The hub keeps the list of live subscriptions and, once per cycle, asks
//! the store which keys changed since the previous cycle. A non-empty change
//! set is offered to every subscription without blocking: a subscriber whose
//! queue is full simply misses that batch. Live notifications are therefore
//! at-most-once, and clients repair gaps through their catch-up query.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use itemsync_core::{ChangeBatch, ItemStore, Timestamp};

pub use tokio::sync::mpsc::error::TryRecvError;

/// Identifier of a subscription, unique per hub.
pub type SubscriptionId = u64;

/// The receiving end of a subscription.
///
/// Batches arrive in the order the hub sent them. Dropping the
/// subscription is the only way to unsubscribe; the hub notices the next
/// time it tries to deliver.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<ChangeBatch>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the hub has closed the queue and every pending
    /// batch has been received. Cancel-safe.
    pub async fn recv(&mut self) -> Option<ChangeBatch> {
        self.rx.recv().await
    }

    /// Take the next batch if one is already queued.
    pub fn try_recv(&mut self) -> Result<ChangeBatch, TryRecvError> {
        self.rx.try_recv()
    }
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<ChangeBatch>,
}

/// What a single hub cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing changed since the previous cycle; nothing was sent.
    Idle,
    /// A batch of `changed` keys was offered to every subscriber.
    Broadcast {
        changed: usize,
        delivered: usize,
        dropped: usize,
        pruned: usize,
    },
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatistics {
    /// Cycles run.
    pub ticks: u64,
    /// Cycles that found changes.
    pub broadcasts: u64,
    /// Batches accepted by a subscriber queue.
    pub delivered: u64,
    /// Batches dropped because a subscriber queue was full.
    pub dropped: u64,
    /// Subscriptions removed after their receiver went away.
    pub pruned: u64,
    /// Subscriptions currently registered.
    pub subscribers: usize,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    pruned: AtomicU64,
}

/// Fan-out of changed-key batches to subscribers.
pub struct NotificationHub<S> {
    store: Arc<S>,
    capacity: usize,
    subscribers: RwLock<Vec<Subscriber>>,
    /// Clock reading up to which changes have been announced. Also
    /// serialises hub cycles.
    last_notify: Mutex<Timestamp>,
    next_id: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
}

impl<S: ItemStore> NotificationHub<S> {
    /// Create a hub over `store` whose subscription queues hold at most
    /// `capacity` batches.
    ///
    /// Changes made before the hub exists are never announced.
    pub fn new(store: Arc<S>, capacity: usize) -> Self {
        let last_notify = store.now();
        Self {
            store,
            capacity: capacity.max(1),
            subscribers: RwLock::new(Vec::new()),
            last_notify: Mutex::new(last_notify),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Register a new, empty subscription.
    ///
    /// Nothing that happened before this call is replayed into it. After
    /// [`close`](Self::close) the returned subscription is already closed.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            debug!("Hub closed, subscription {} starts closed", id);
        } else {
            subscribers.push(Subscriber { id, tx });
            debug!("Subscription {} registered ({} active)", id, subscribers.len());
        }

        Subscription { id, rx }
    }

    /// Run one notification cycle.
    pub fn notify_subscribers(&self) -> TickOutcome {
        let mut last_notify = self
            .last_notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let scan = self.store.changes_since(*last_notify);
        if scan.keys.is_empty() {
            return TickOutcome::Idle;
        }

        let batch = ChangeBatch::new(scan.keys, scan.as_of);

        // Copy the senders out so delivery never runs under the list lock.
        let targets: Vec<(SubscriptionId, mpsc::Sender<ChangeBatch>)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dropped = 0;
        let mut gone = false;
        for (id, tx) in &targets {
            match tx.try_send(batch.clone()) {
                Ok(()) => delivered += 1,
                // Load shedding: the subscriber misses this cycle and
                // recovers through its next catch-up.
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    debug!("Subscription {} queue full, dropped batch of {} keys", id, batch.len());
                }
                Err(TrySendError::Closed(_)) => gone = true,
            }
        }
        drop(targets);

        let pruned = if gone { self.prune_closed() } else { 0 };

        *last_notify = scan.as_of;

        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(
            "Hub broadcast {} changed keys: {} delivered, {} dropped, {} pruned",
            batch.len(),
            delivered,
            dropped,
            pruned
        );

        TickOutcome::Broadcast {
            changed: batch.len(),
            delivered,
            dropped,
            pruned,
        }
    }

    /// Close every subscription.
    ///
    /// Consumers drain what is already queued and then see the end of the
    /// stream. Later subscriptions start closed.
    pub fn close(&self) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        let count = subscribers.len();
        subscribers.clear();
        info!("Hub closed {} subscriptions", count);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Clock reading up to which changes have been announced.
    pub fn last_notify(&self) -> Timestamp {
        *self
            .last_notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the hub counters.
    pub fn statistics(&self) -> HubStatistics {
        HubStatistics {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Run notification cycles every `period` until `shutdown` fires, then
    /// close the hub.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Notification hub running every {:?}", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.notify_subscribers();
                }
            }
        }

        self.close();
    }

    fn prune_closed(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| {
            let open = !s.tx.is_closed();
            if !open {
                debug!("Subscription {} abandoned, removing", s.id);
            }
            open
        });
        let pruned = before - subscribers.len();
        self.counters
            .pruned
            .fetch_add(pruned as u64, Ordering::Relaxed);
        pruned
    }
}
