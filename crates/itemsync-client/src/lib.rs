//! # itemsync-client
//!
//! Client side of itemsync: a synchronizer that keeps a local cache
//! consistent with the item store.
//!
//! Live change batches from the hub keep a connected client current. Batches
//! may be dropped when a client falls behind, so every (re)connection starts
//! with a sync against the store, which is what guarantees completeness.

pub mod cache;
pub mod synchronizer;

pub use cache::LocalCache;
pub use synchronizer::{ClientState, ClientSynchronizer, SessionEnd, SyncMode, SyncReport};
