//! Identity-keyed weak map
//!
//! [`IdentityWeakMap`] associates values with objects by *identity* (the
//! address of an `Arc` allocation) rather than by value equality, and never
//! keeps its keys alive. Each entry holds a [`Weak`] to its key. As long as
//! that weak reference exists the allocation cannot be handed out again, so
//! an address stays unambiguous for the lifetime of its entry.
//!
//! Dead entries are reclaimed in batches: every `purge_interval` calls to
//! [`IdentityWeakMap::put`] a purge pass drops the entries whose keys have
//! no strong references left. Lookups never purge.
//!
//! The map is not synchronized. The owner is expected to guard it with a
//! single lock (see `EventEmitter`).

use fxhash::FxHashMap;
use std::sync::{Arc, Weak};

/// Number of puts between two purge passes
pub const DEFAULT_PURGE_INTERVAL: usize = 1000;

struct Entry<K: ?Sized, V> {
    key: Weak<K>,
    value: V,
}

/// Map from object identity to `V` that does not retain its keys
pub struct IdentityWeakMap<K: ?Sized, V> {
    entries: FxHashMap<usize, Entry<K, V>>,
    /// One-slot cache for repeated lookups on the same object
    last: Option<(Weak<K>, Option<V>)>,
    puts_since_purge: usize,
    purge_interval: usize,
}

impl<K: ?Sized, V: Clone> Default for IdentityWeakMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn address_of<K: ?Sized>(key: &Arc<K>) -> usize {
    Arc::as_ptr(key).cast::<()>() as usize
}

impl<K: ?Sized, V: Clone> IdentityWeakMap<K, V> {
    pub fn new() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }

    /// Create a map that purges dead entries every `purge_interval` puts
    pub fn with_purge_interval(purge_interval: usize) -> Self {
        IdentityWeakMap {
            entries: FxHashMap::default(),
            last: None,
            puts_since_purge: 0,
            purge_interval: purge_interval.max(1),
        }
    }

    /// Look up the value associated with this exact object
    pub fn get(&mut self, key: &Arc<K>) -> Option<V> {
        if let Some((last_key, last_value)) = &self.last
            && std::ptr::addr_eq(last_key.as_ptr(), Arc::as_ptr(key))
        {
            return last_value.clone();
        }

        let value = self
            .entries
            .get(&address_of(key))
            .filter(|entry| entry.key.strong_count() > 0)
            .map(|entry| entry.value.clone());
        self.last = Some((Arc::downgrade(key), value.clone()));
        value
    }

    /// Associate `value` with this exact object, replacing any previous value
    pub fn put(&mut self, key: &Arc<K>, value: V) {
        self.put_with(key, value, drop);
    }

    /// Like [`put`](Self::put), handing the value of every entry reclaimed
    /// by a triggered purge pass to `on_reclaimed`
    pub fn put_with(&mut self, key: &Arc<K>, value: V, on_reclaimed: impl FnMut(V)) {
        self.puts_since_purge += 1;
        if self.puts_since_purge >= self.purge_interval {
            self.purge_with(on_reclaimed);
        }

        let weak = Arc::downgrade(key);
        self.last = Some((weak.clone(), Some(value.clone())));
        self.entries
            .insert(address_of(key), Entry { key: weak, value });
    }

    /// Drop every entry whose key is no longer alive
    ///
    /// Returns the number of entries removed.
    pub fn purge(&mut self) -> usize {
        self.purge_with(drop)
    }

    /// Like [`purge`](Self::purge), handing each removed value to `on_reclaimed`
    pub fn purge_with(&mut self, mut on_reclaimed: impl FnMut(V)) -> usize {
        let before = self.entries.len();
        let dead: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.key.strong_count() == 0)
            .map(|(address, _)| *address)
            .collect();
        for address in dead {
            if let Some(entry) = self.entries.remove(&address) {
                on_reclaimed(entry.value);
            }
        }
        self.last = None;
        self.puts_since_purge = 0;

        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "purged dead identity entries");
        }
        removed
    }

    /// Number of entries, including dead ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Debug, PartialEq)]
    struct Account(u32);

    #[test]
    fn test_value_equal_objects_get_distinct_entries() {
        let mut map = IdentityWeakMap::new();
        let a = Arc::new(Account(7));
        let b = Arc::new(Account(7));
        assert_eq!(*a, *b);

        map.put(&a, 1u32);
        map.put(&b, 2u32);

        assert_eq!(map.get(&a), Some(1));
        assert_eq!(map.get(&b), Some(2));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_clones_share_identity() {
        let mut map = IdentityWeakMap::new();
        let a = Arc::new(Account(1));
        let alias = Arc::clone(&a);

        map.put(&a, "a");
        assert_eq!(map.get(&alias), Some("a"));
    }

    #[test]
    fn test_put_replaces_value_for_same_identity() {
        let mut map = IdentityWeakMap::new();
        let a = Arc::new(Account(1));

        map.put(&a, 1u32);
        map.put(&a, 2u32);

        assert_eq!(map.get(&a), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_cache_is_replaced_by_other_key() {
        let mut map = IdentityWeakMap::new();
        let a = Arc::new(Account(1));
        let b = Arc::new(Account(2));

        map.put(&a, 10u32);
        assert_eq!(map.get(&a), Some(10));
        assert_eq!(map.get(&b), None);
        // Cached miss for `b` must not hide a later insert
        map.put(&b, 20);
        assert_eq!(map.get(&b), Some(20));
        assert_eq!(map.get(&a), Some(10));
    }

    #[test]
    fn test_map_does_not_keep_keys_alive() {
        let mut map = IdentityWeakMap::new();
        let a = Arc::new(Account(1));
        map.put(&a, 1u32);
        let _ = map.get(&a);

        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn test_dead_entries_are_purged_after_interval() {
        let mut map = IdentityWeakMap::with_purge_interval(10);
        let keep = Arc::new(Account(0));
        map.put(&keep, 0u32);
        let before = map.len();

        let dropped = Arc::new(Account(1));
        map.put(&dropped, 1u32);
        drop(dropped);
        assert_eq!(map.len(), before + 1);

        // Re-putting a live key advances the counter without adding entries
        for i in 0..10 {
            map.put(&keep, i);
        }

        assert_eq!(map.len(), before);
    }

    #[test]
    fn test_explicit_purge_reports_removed() {
        let mut map = IdentityWeakMap::new();
        let keys: Vec<_> = (0..5).map(|i| Arc::new(Account(i))).collect();
        for (i, key) in keys.iter().enumerate() {
            map.put(key, i);
        }
        drop(keys);

        assert_eq!(map.purge(), 5);
        assert!(map.is_empty());
    }

    #[test]
    fn test_reclaimed_values_are_handed_back() {
        let mut map = IdentityWeakMap::with_purge_interval(3);
        let keep = Arc::new(Account(0));
        map.put(&keep, 0u32);
        map.put(&Arc::new(Account(1)), 1);

        let mut reclaimed = Vec::new();
        map.put_with(&keep, 2, |value| reclaimed.push(value));
        assert_eq!(reclaimed, vec![1]);

        map.put(&Arc::new(Account(3)), 3);
        let mut reclaimed = Vec::new();
        assert_eq!(map.purge_with(|value| reclaimed.push(value)), 1);
        assert_eq!(reclaimed, vec![3]);
        assert_eq!(map.get(&keep), Some(2));
    }

    #[test]
    fn test_new_object_never_sees_old_value() {
        let mut map = IdentityWeakMap::with_purge_interval(1);
        for round in 0..100u32 {
            let key = Arc::new(Account(round));
            assert_eq!(map.get(&key), None);
            map.put(&key, round);
            assert_eq!(map.get(&key), Some(round));
        }
    }

    #[test]
    fn test_dyn_any_keys() {
        let mut map: IdentityWeakMap<dyn Any + Send + Sync, u32> = IdentityWeakMap::new();
        let a: Arc<dyn Any + Send + Sync> = Arc::new(String::from("lock"));
        let b: Arc<dyn Any + Send + Sync> = Arc::new(42u64);

        map.put(&a, 1);
        map.put(&b, 2);

        assert_eq!(map.get(&a), Some(1));
        assert_eq!(map.get(&b), Some(2));
    }
}
