//! Store mutator.
//!
//! Simulates external writers: on every tick it picks one existing key
//! uniformly at random and gives it a new random value.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use itemsync_core::{Item, MemoryStore};

/// Background writer that sets a random key to a random value on every
/// tick, standing in for whatever updates the dataset in production.
pub struct Mutator {
    store: Arc<MemoryStore>,
    value_max: i64,
    rng: StdRng,
}

impl Mutator {
    /// Create a mutator writing values in `0..value_max`.
    pub fn new(store: Arc<MemoryStore>, value_max: i64) -> Self {
        Self::with_rng(store, value_max, StdRng::from_entropy())
    }

    /// Create a mutator with a caller-supplied random source.
    pub fn with_rng(store: Arc<MemoryStore>, value_max: i64, rng: StdRng) -> Self {
        Self {
            store,
            value_max: value_max.max(1),
            rng,
        }
    }

    /// Edit one random item. Returns `None` when the store is empty.
    pub fn mutate_once(&mut self) -> Option<Item> {
        let keys = self.store.keys();
        let key = *keys.choose(&mut self.rng)?;
        let value = self.rng.gen_range(0..self.value_max);

        let item = self.store.apply_mutation(key, value);
        info!("Server: set item {} to {} at {}", item.key, item.value, item.updated_at);
        Some(item)
    }

    /// Edit one item every `period` until `shutdown` fires.
    pub async fn run(mut self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Mutator running every {:?}", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.mutate_once();
                }
            }
        }

        info!("Mutator stopped");
    }
}
