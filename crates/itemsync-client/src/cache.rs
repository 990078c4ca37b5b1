//! Client-side item cache.

use std::collections::HashMap;

use itemsync_core::{Item, ItemKey, Timestamp};

/// A client's private mirror of store state.
///
/// Besides the items it records the last successful sync time: the newest
/// stamp up to which the client knows it has seen every change. That time
/// is only moved by the sync procedures, never by live notifications, since
/// a live batch can arrive after an earlier one was dropped.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    items: HashMap<ItemKey, Item>,
    last_sync: Option<Timestamp>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item`, replacing whatever was cached under its key.
    ///
    /// Items always come straight from the store, so the newest copy is the
    /// one fetched last; no stamp comparison happens here.
    pub fn merge(&mut self, item: Item) {
        self.items.insert(item.key, item);
    }

    /// Move the last sync time forward to `to`. Never moves it back.
    pub fn advance_sync(&mut self, to: Timestamp) {
        self.last_sync = Some(match self.last_sync {
            Some(current) => current.max(to),
            None => to,
        });
    }

    /// `None` until the first full sync completed.
    pub fn last_sync(&self) -> Option<Timestamp> {
        self.last_sync
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(&key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Keys whose cached copy differs from `reference`, including keys
    /// missing from the cache. Sorted.
    pub fn diverged_from(&self, reference: &[Item]) -> Vec<ItemKey> {
        let mut diverged: Vec<ItemKey> = reference
            .iter()
            .filter(|item| self.items.get(&item.key) != Some(*item))
            .map(|item| item.key)
            .collect();
        diverged.sort_unstable();
        diverged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(key: u32, value: i64, stamp: u64) -> Item {
        Item {
            key: ItemKey(key),
            value,
            updated_at: Timestamp(stamp),
        }
    }

    #[test]
    fn test_merge_overwrites() {
        let mut cache = LocalCache::new();
        cache.merge(item(1, 10, 5));
        cache.merge(item(1, 11, 3));

        // Unconditional: the later merge wins even with an older stamp.
        assert_eq!(cache.get(ItemKey(1)), Some(&item(1, 11, 3)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_merge_idempotent() {
        let mut cache = LocalCache::new();
        cache.merge(item(2, 20, 7));
        let once = cache.clone();
        cache.merge(item(2, 20, 7));

        assert_eq!(cache.len(), once.len());
        assert_eq!(cache.get(ItemKey(2)), once.get(ItemKey(2)));
        assert!(cache.diverged_from(&[item(2, 20, 7)]).is_empty());
    }

    #[test]
    fn test_advance_sync_never_regresses() {
        let mut cache = LocalCache::new();
        assert_eq!(cache.last_sync(), None);

        cache.advance_sync(Timestamp(10));
        cache.advance_sync(Timestamp(4));
        assert_eq!(cache.last_sync(), Some(Timestamp(10)));

        cache.advance_sync(Timestamp(12));
        assert_eq!(cache.last_sync(), Some(Timestamp(12)));
    }

    #[test]
    fn test_diverged_from() {
        let mut cache = LocalCache::new();
        cache.merge(item(0, 1, 1));
        cache.merge(item(1, 2, 2));

        let reference = vec![item(2, 3, 3), item(1, 9, 4), item(0, 1, 1)];
        assert_eq!(cache.diverged_from(&reference), vec![ItemKey(1), ItemKey(2)]);
    }
}
