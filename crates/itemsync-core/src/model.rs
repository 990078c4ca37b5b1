//! itemsync data model types.
//!
//! These types describe what the store holds and what flows between the
//! store, the notification hub and the clients:
//! - Items: keyed, versioned values
//! - Timestamps issued by the store clock
//! - Change batches carrying only keys, never values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Stable identity of an item in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemKey(pub u32);

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ItemKey {
    fn from(key: u32) -> Self {
        ItemKey(key)
    }
}

/// A point on the store clock.
///
/// Stamps are plain tick counts. With the wall clock they are nanoseconds
/// since the UNIX epoch; with the logical clock they are a mutation counter.
/// Either way every mutation receives a stamp strictly greater than all
/// stamps issued before it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The origin of the clock. No item is ever stamped with it.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Raw tick count.
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// The stamp immediately before this one (saturating at zero).
    pub fn prev(self) -> Timestamp {
        Timestamp(self.0.saturating_sub(1))
    }

    /// Interpret the stamp as wall-clock nanoseconds.
    pub fn as_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0.min(i64::MAX as u64) as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Small values come from the logical clock; print them as counters.
        if self.0 < 1_000_000_000_000 {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "{}", self.as_datetime().format("%H:%M:%S%.3f"))
        }
    }
}

/// A keyed, versioned value record held by the store.
///
/// Items are `Copy`: whatever the store hands out is a detached value, so
/// callers can never reach back into server state through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// The item key
    pub key: ItemKey,

    /// The current payload
    pub value: i64,

    /// When the payload was last written
    pub updated_at: Timestamp,
}

/// A set of keys that changed during one hub cycle.
///
/// Batches are shared between all subscribers of a cycle, so the key set
/// sits behind an `Arc` and cloning a batch is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    keys: Arc<BTreeSet<ItemKey>>,
    /// Store clock reading taken with the change scan. Every announced key
    /// was stamped at or before it.
    pub issued_at: Timestamp,
}

impl ChangeBatch {
    pub fn new(keys: BTreeSet<ItemKey>, issued_at: Timestamp) -> Self {
        Self {
            keys: Arc::new(keys),
            issued_at,
        }
    }

    pub fn keys(&self) -> &BTreeSet<ItemKey> {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemKey> + '_ {
        self.keys.iter().copied()
    }
}
