//! itemsync server.
//!
//! This module ties the server-side components together:
//! - The item store, seeded from configuration
//! - The mutator loop driving change into the store
//! - The notification hub loop fanning changes out to subscribers

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::info;

use itemsync_core::{Clock, ClockKind, ItemKey, LogicalClock, MemoryStore, SyncConfig, SystemClock};

use crate::hub::{HubStatistics, NotificationHub, Subscription};
use crate::mutator::Mutator;

/// Errors from running the server loops.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A background loop panicked or was aborted.
    #[error("{task} task failed: {source}")]
    TaskFailed {
        task: &'static str,
        #[source]
        source: JoinError,
    },
}

/// The item store together with its mutator and notification hub.
pub struct SyncServer {
    config: SyncConfig,
    store: Arc<MemoryStore>,
    hub: Arc<NotificationHub<MemoryStore>>,
}

impl SyncServer {
    /// Create a server with `config.item_count` items holding random
    /// values in `0..100`.
    pub fn new(config: SyncConfig) -> Self {
        let clock: Arc<dyn Clock> = match config.clock {
            ClockKind::Wall => Arc::new(SystemClock::new()),
            ClockKind::Logical => Arc::new(LogicalClock::new()),
        };
        let mut rng = rand::thread_rng();
        let initial: Vec<(ItemKey, i64)> = (0..config.item_count)
            .map(|k| (ItemKey(k), rng.gen_range(0..100)))
            .collect();

        Self::with_store(config, Arc::new(MemoryStore::seeded(clock, initial)))
    }

    /// Create a server around an existing store.
    pub fn with_store(config: SyncConfig, store: Arc<MemoryStore>) -> Self {
        let hub = Arc::new(NotificationHub::new(store.clone(), config.queue_capacity));
        Self { config, store, hub }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn hub(&self) -> Arc<NotificationHub<MemoryStore>> {
        self.hub.clone()
    }

    /// Shortcut for `hub().subscribe()`.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn statistics(&self) -> HubStatistics {
        self.hub.statistics()
    }

    /// Run the mutator and the hub until `shutdown` fires.
    ///
    /// Both loops run as separate tasks. The hub closes every subscription
    /// on its way out.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!(
            "Item server starting with {} items (mutate every {:?}, notify every {:?})",
            self.store.len(),
            self.config.mutate_interval(),
            self.config.notify_interval()
        );

        let mutator = Mutator::new(self.store.clone(), self.config.mutation_value_max);
        let mutator_task =
            tokio::spawn(mutator.run(self.config.mutate_interval(), shutdown.clone()));

        let hub = self.hub.clone();
        let period = self.config.notify_interval();
        let hub_shutdown = shutdown.clone();
        let hub_task = tokio::spawn(async move { hub.run(period, hub_shutdown).await });

        let (mutator_result, hub_result) = tokio::join!(mutator_task, hub_task);
        mutator_result.map_err(|source| ServerError::TaskFailed {
            task: "mutator",
            source,
        })?;
        hub_result.map_err(|source| ServerError::TaskFailed { task: "hub", source })?;

        info!("Item server stopped");
        Ok(())
    }
}
