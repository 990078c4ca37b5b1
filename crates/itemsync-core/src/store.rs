//! itemsync item store.
//!
//! The store owns the authoritative keyed dataset. Every read hands out
//! copies, and every write stamps the item from the store clock while
//! holding the exclusive lock, so value and stamp always travel together.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::model::{Item, ItemKey, Timestamp};

/// Errors returned by store lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No item exists under the requested key.
    #[error("item {0} not found")]
    NotFound(ItemKey),
}

/// Result of a change scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScan {
    /// Keys updated strictly after the requested stamp.
    pub keys: BTreeSet<ItemKey>,
    /// Clock reading taken while the scan held the lock. Every item in the
    /// store at that moment is stamped at or before it, and every later
    /// mutation is stamped strictly after it.
    pub as_of: Timestamp,
}

/// Copies of every item together with the clock reading they were taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Every item in the store. Order is unspecified.
    pub items: Vec<Item>,
    /// Clock reading taken under the same lock as `items`.
    pub as_of: Timestamp,
}

/// Read contract offered to clients and to the notification hub.
///
/// Mutation is deliberately not part of it.
pub trait ItemStore: Send + Sync {
    /// Get a copy of the item stored under `key`.
    fn get(&self, key: ItemKey) -> Result<Item, StoreError>;

    /// Get copies of every item. Order is unspecified.
    fn get_all(&self) -> Vec<Item> {
        self.snapshot().items
    }

    /// Copy every item and read the clock in one step.
    fn snapshot(&self) -> Snapshot;

    /// Scan for keys updated strictly after `since`.
    fn changes_since(&self, since: Timestamp) -> ChangeScan;

    /// Keys updated strictly after `since`.
    ///
    /// An item stamped exactly at `since` is not included.
    fn changed_since(&self, since: Timestamp) -> BTreeSet<ItemKey> {
        self.changes_since(since).keys
    }

    /// Current reading of the store clock.
    fn now(&self) -> Timestamp;
}

/// In-memory item store.
///
/// A single readers-writer lock guards the map and every item in it.
pub struct MemoryStore {
    items: RwLock<HashMap<ItemKey, Item>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store stamping mutations with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Create a store pre-populated with `initial` key/value pairs.
    ///
    /// Each initial item receives its own stamp, in iteration order.
    pub fn seeded<I>(clock: Arc<dyn Clock>, initial: I) -> Self
    where
        I: IntoIterator<Item = (ItemKey, i64)>,
    {
        let store = Self::new(clock);
        {
            let mut items = store.write();
            for (key, value) in initial {
                let updated_at = store.clock.tick();
                items.insert(
                    key,
                    Item {
                        key,
                        value,
                        updated_at,
                    },
                );
            }
        }
        store
    }

    /// Set the value of `key` and stamp it with the current time.
    ///
    /// Inserts the item if the key is new. Returns a copy of the item as
    /// written.
    pub fn apply_mutation(&self, key: ItemKey, value: i64) -> Item {
        let mut items = self.write();
        // Stamped under the write lock: per-key stamps follow lock order.
        let updated_at = self.clock.tick();
        let item = Item {
            key,
            value,
            updated_at,
        };
        items.insert(key, item);
        item
    }

    /// Every key currently in the store, in ascending order.
    pub fn keys(&self) -> Vec<ItemKey> {
        let mut keys: Vec<ItemKey> = self.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of items in the store.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Writers replace whole items, so a poisoned lock still guards
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ItemKey, Item>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ItemKey, Item>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl ItemStore for MemoryStore {
    fn get(&self, key: ItemKey) -> Result<Item, StoreError> {
        self.read()
            .get(&key)
            .copied()
            .ok_or(StoreError::NotFound(key))
    }

    fn snapshot(&self) -> Snapshot {
        let items = self.read();
        Snapshot {
            items: items.values().copied().collect(),
            as_of: self.clock.now(),
        }
    }

    fn changes_since(&self, since: Timestamp) -> ChangeScan {
        let items = self.read();
        let keys = items
            .values()
            .filter(|item| item.updated_at > since)
            .map(|item| item.key)
            .collect();
        ChangeScan {
            keys,
            as_of: self.clock.now(),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }
}
