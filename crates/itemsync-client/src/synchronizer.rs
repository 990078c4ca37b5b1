//! Client synchronizer.
//!
//! Each client runs a small state machine over its own [`LocalCache`]:
//!
//! - `Initial`: nothing synced yet. Connecting performs a full sync.
//! - `Subscribed`: consuming live change batches from the hub.
//! - `Disconnected`: not consuming. Reconnecting performs a catch-up
//!   (changes since the last sync time) before live consumption resumes.
//!
//! The subscription is registered before the sync runs, so anything that
//! changes while the sync is in progress is queued rather than lost.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use itemsync_core::{ChangeBatch, ConnectionPolicy, ItemKey, ItemStore, MillisRange, Timestamp};
use itemsync_server::{NotificationHub, Subscription};

use crate::cache::LocalCache;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Initial,
    Subscribed,
    Disconnected,
}

/// Why a live session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The interruption signal fired or the connection span ran out.
    Interrupted,
    /// The hub closed the queue.
    QueueClosed,
}

/// Which sync procedure ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    Full,
    CatchUp,
}

/// Summary of one sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Items fetched and merged.
    pub fetched: usize,
    /// Keys reported as changed that could no longer be fetched.
    pub missed: Vec<ItemKey>,
    /// Last sync time after the sync.
    pub last_sync: Timestamp,
}

pub struct ClientSynchronizer<S> {
    id: usize,
    store: Arc<S>,
    hub: Arc<NotificationHub<S>>,
    policy: ConnectionPolicy,
    cache: LocalCache,
    state: ClientState,
    rng: StdRng,
}

impl<S: ItemStore> ClientSynchronizer<S> {
    pub fn new(
        id: usize,
        store: Arc<S>,
        hub: Arc<NotificationHub<S>>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            id,
            store,
            hub,
            policy,
            cache: LocalCache::new(),
            state: ClientState::Initial,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Bring the cache up to date with the store.
    ///
    /// The first call copies everything. Later calls fetch only the keys
    /// changed since the last sync time.
    pub fn resync(&mut self) -> SyncReport {
        let report = match self.cache.last_sync() {
            None => self.full_sync(),
            Some(since) => self.catch_up(since),
        };
        info!(
            "Client {}: {:?} sync fetched {} items ({} missed), cache size {}, last sync {}",
            self.id,
            report.mode,
            report.fetched,
            report.missed.len(),
            self.cache.len(),
            report.last_sync
        );
        report
    }

    fn full_sync(&mut self) -> SyncReport {
        let snapshot = self.store.snapshot();
        // An empty snapshot still counts as a sync at the time it was taken.
        let newest = snapshot
            .items
            .iter()
            .map(|item| item.updated_at)
            .max()
            .unwrap_or(snapshot.as_of);

        let fetched = snapshot.items.len();
        for item in snapshot.items {
            self.cache.merge(item);
        }
        self.cache.advance_sync(newest);

        SyncReport {
            mode: SyncMode::Full,
            fetched,
            missed: Vec::new(),
            last_sync: newest,
        }
    }

    fn catch_up(&mut self, since: Timestamp) -> SyncReport {
        let scan = self.store.changes_since(since);
        info!(
            "Client {}: reconnecting (last sync {}), store reports {} changed keys: {:?}",
            self.id,
            since,
            scan.keys.len(),
            scan.keys
        );

        let mut fetched = 0;
        let mut missed = Vec::new();
        let mut newest = since;
        for key in scan.keys {
            match self.store.get(key) {
                Ok(item) => {
                    // An item re-written after the scan may carry a stamp
                    // past keys the scan never saw; it must not push the
                    // sync time beyond the scan.
                    if item.updated_at <= scan.as_of {
                        newest = newest.max(item.updated_at);
                    }
                    self.cache.merge(item);
                    fetched += 1;
                }
                Err(e) => {
                    warn!("Client {}: failed to fetch item {}: {}", self.id, key, e);
                    missed.push(key);
                }
            }
        }
        self.cache.advance_sync(newest);

        SyncReport {
            mode: SyncMode::CatchUp,
            fetched,
            missed,
            last_sync: self.cache.last_sync().unwrap_or(newest),
        }
    }

    /// Subscribe to live changes and sync.
    ///
    /// On return the client is `Subscribed`; batches queued during the sync
    /// wait in the returned subscription.
    pub fn connect(&mut self) -> Subscription {
        let subscription = self.hub.subscribe();
        self.resync();
        self.state = ClientState::Subscribed;
        info!(
            "Client {}: subscribed (subscription {})",
            self.id,
            subscription.id()
        );
        subscription
    }

    /// Fetch and merge every key in `batch`. Returns how many were merged.
    ///
    /// Live batches never move the last sync time.
    pub fn apply_batch(&mut self, batch: &ChangeBatch) -> usize {
        debug!(
            "Client {}: notified of {} changed keys at {}: {:?}",
            self.id,
            batch.len(),
            batch.issued_at,
            batch.keys()
        );

        let mut merged = 0;
        for key in batch.iter() {
            match self.store.get(key) {
                Ok(item) => {
                    debug!(
                        "Client {}: updated item {} to {} (server time {})",
                        self.id, item.key, item.value, item.updated_at
                    );
                    self.cache.merge(item);
                    merged += 1;
                }
                Err(e) => warn!("Client {}: failed to fetch item {}: {}", self.id, key, e),
            }
        }
        merged
    }

    /// Consume live batches until `interrupt` fires or the hub closes the
    /// queue. Leaves the client `Disconnected`.
    pub async fn consume(
        &mut self,
        subscription: &mut Subscription,
        interrupt: &CancellationToken,
    ) -> SessionEnd {
        let end = loop {
            tokio::select! {
                _ = interrupt.cancelled() => break SessionEnd::Interrupted,
                batch = subscription.recv() => match batch {
                    Some(batch) => {
                        self.apply_batch(&batch);
                    }
                    None => break SessionEnd::QueueClosed,
                },
            }
        };
        self.disconnect(end);
        end
    }

    /// Drive the client until `shutdown` fires, following its connection
    /// policy. Returns the synchronizer so its cache can be inspected.
    pub async fn run(mut self, shutdown: CancellationToken) -> Self {
        loop {
            let mut subscription = self.connect();

            let end = match self.policy {
                ConnectionPolicy::Persistent => self.consume(&mut subscription, &shutdown).await,
                ConnectionPolicy::Intermittent { connected_ms, .. } => {
                    let span = self.random_span(connected_ms);
                    debug!("Client {}: staying connected for {:?}", self.id, span);
                    let session =
                        tokio::time::timeout(span, self.consume(&mut subscription, &shutdown))
                            .await;
                    match session {
                        Ok(end) => end,
                        Err(_) => {
                            self.disconnect(SessionEnd::Interrupted);
                            SessionEnd::Interrupted
                        }
                    }
                }
            };
            drop(subscription);

            if shutdown.is_cancelled() {
                break;
            }

            match self.policy {
                // A persistent client only leaves when the hub goes away.
                ConnectionPolicy::Persistent => break,
                ConnectionPolicy::Intermittent { offline_ms, .. } => {
                    let offline = self.random_span(offline_ms);
                    info!("Client {}: *** DISCONNECTED *** ({:?})", self.id, end);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(offline) => {}
                    }
                    info!("Client {}: *** RECONNECTING after {:?} ***", self.id, offline);
                }
            }
        }

        info!("Client {}: stopped with {} cached items", self.id, self.cache.len());
        self
    }

    fn disconnect(&mut self, end: SessionEnd) {
        if self.state == ClientState::Subscribed {
            debug!("Client {}: session ended ({:?})", self.id, end);
        }
        self.state = ClientState::Disconnected;
    }

    fn random_span(&mut self, range: MillisRange) -> Duration {
        let millis = if range.min >= range.max {
            range.max
        } else {
            self.rng.gen_range(range.min..=range.max)
        };
        Duration::from_millis(millis)
    }
}
