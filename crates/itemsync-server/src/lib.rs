//! # itemsync-server
//!
//! Server side of itemsync: the notification hub, the store mutator and
//! the server that runs both next to the item store.
//!
//! All loops run on tokio and stop on a `CancellationToken`.

pub mod hub;
pub mod mutator;
pub mod server;

pub use hub::{HubStatistics, NotificationHub, Subscription, SubscriptionId, TickOutcome};
pub use itemsync_core::{ChangeBatch, Item, ItemKey, ItemStore, MemoryStore, Timestamp};
pub use mutator::Mutator;
pub use server::{ServerError, SyncServer};
