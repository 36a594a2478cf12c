//! Fixed-capacity least-recently-used cache.
//!
//! Entries live in a slab (`Vec<Option<Entry>>`) threaded by a doubly-linked
//! recency list of slot indices; a `HashMap` maps keys to slots. Every
//! operation is O(1) amortized.
//!
//! # Invariants
//!
//! 1. `len() <= capacity()` at all times.
//! 2. `get` and `set` move the touched key to the most-recently-used end;
//!    `has` and `peek` never change recency.
//! 3. `set` of an existing key updates in place and never evicts.
//! 4. `set` of a new key on a full cache evicts exactly one entry: the least
//!    recently used.
//! 5. There is no time-based expiry.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use crate::error::CacheError;

/// Hit/miss/eviction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A least-recently-used cache with a fixed capacity.
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        NonZeroUsize::new(capacity)
            .map(Self::with_capacity)
            .ok_or(CacheError::InvalidCapacity { capacity })
    }

    /// Create a cache from a capacity that is known to be positive.
    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            index: HashMap::with_capacity(capacity.get()),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(&slot) = self.index.get(key) else {
            self.stats.misses += 1;
            return None;
        };
        self.stats.hits += 1;
        self.promote(slot);
        Some(&self.entry(slot).value)
    }

    /// Look up `key` without touching recency or statistics.
    #[must_use]
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.index.get(key)?;
        Some(&self.entry(slot).value)
    }

    /// Whether `key` is present. Does not affect recency.
    #[must_use]
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Insert or update `key`, marking it most-recently-used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.entry_mut(slot).value = value;
            self.promote(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity.get() {
            self.pop_lru()
        } else {
            None
        };

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.push_front(slot);
        self.index.insert(key, slot);

        if evicted.is_some() {
            self.stats.evictions += 1;
        }
        evicted
    }

    /// Remove `key`, returning its value.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        Some(entry.value)
    }

    /// Remove every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn size(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Keys from most to least recently used.
    #[must_use]
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let entry = self.entry(slot);
            keys.push(entry.key.clone());
            cursor = entry.next;
        }
        keys
    }

    // -------------------------------------------------------------------
    // Internal: recency list
    // -------------------------------------------------------------------

    fn entry(&self, slot: usize) -> &Entry<K, V> {
        match &self.slots[slot] {
            Some(entry) => entry,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        match &mut self.slots[slot] {
            Some(entry) => entry,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.entry(slot);
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.entry_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let entry = self.entry_mut(slot);
        entry.prev = None;
        entry.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let entry = self.entry_mut(slot);
            entry.prev = None;
            entry.next = old_head;
        }
        match old_head {
            Some(h) => self.entry_mut(h).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        self.unlink(slot);
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.index.len())
            .field("stats", &self.stats)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(capacity: usize) -> LruCache<String, i32> {
        LruCache::new(capacity).unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = LruCache::<String, i32>::new(0).unwrap_err();
        assert_eq!(err, CacheError::InvalidCapacity { capacity: 0 });
        assert_eq!(
            err.to_string(),
            "cache capacity must be greater than 0 (got 0)"
        );
    }

    #[test]
    fn size_tracks_inserts_and_deletes() {
        let mut c = cache(5);
        assert_eq!(c.size(), 0);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        assert_eq!(c.size(), 2);
        c.delete("a");
        assert_eq!(c.size(), 1);
        c.clear();
        assert_eq!(c.size(), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn set_and_get() {
        let mut c = cache(3);
        c.set("a".into(), 1);
        assert_eq!(c.get("a"), Some(&1));
        assert_eq!(c.get("missing"), None);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        let evicted = c.set("c".into(), 3);
        assert_eq!(evicted, Some(("a".to_string(), 1)));
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some(&2));
        assert_eq!(c.get("c"), Some(&3));
    }

    #[test]
    fn get_promotes() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.get("a");
        c.set("c".into(), 3);
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(&1));
        assert_eq!(c.get("c"), Some(&3));
    }

    #[test]
    fn has_and_peek_do_not_promote() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        assert!(c.has("a"));
        assert_eq!(c.peek("a"), Some(&1));
        c.set("c".into(), 3);
        assert!(!c.has("a"));
    }

    #[test]
    fn updating_existing_key_does_not_evict() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        assert_eq!(c.set("a".into(), 10), None);
        assert_eq!(c.size(), 2);
        c.set("c".into(), 3);
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(&10));
    }

    #[test]
    fn deleted_slots_are_reused() {
        let mut c = cache(3);
        for i in 0..10 {
            c.set(format!("k{i}"), i);
            if i % 2 == 0 {
                c.delete(&format!("k{}", i.max(1) - 1));
            }
        }
        assert!(c.size() <= 3);
        assert!(c.slots.len() <= 4);
    }

    #[test]
    fn recency_order_and_stats() {
        let mut c = cache(3);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        c.get("a");
        c.get("zzz");
        assert_eq!(c.keys_by_recency(), vec!["a", "c", "b"]);
        c.set("d".into(), 4);
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn capacity_one() {
        let mut c = cache(1);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        assert_eq!(c.keys_by_recency(), vec!["b"]);
        assert_eq!(c.capacity(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Get(u8),
        Set(u8, i32),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8).prop_map(Op::Get),
            (0u8..8, any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..8).prop_map(Op::Delete),
        ]
    }

    proptest! {
        /// Compare against a naive vector model ordered most-recent first.
        #[test]
        fn matches_naive_model(capacity in 1usize..5, ops in prop::collection::vec(op(), 0..64)) {
            let mut lru = LruCache::<u8, i32>::new(capacity).unwrap();
            let mut model: Vec<(u8, i32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Get(k) => {
                        let expected = model.iter().position(|(mk, _)| *mk == k).map(|i| {
                            let entry = model.remove(i);
                            model.insert(0, entry);
                            entry.1
                        });
                        prop_assert_eq!(lru.get(&k).copied(), expected);
                    }
                    Op::Set(k, v) => {
                        if let Some(i) = model.iter().position(|(mk, _)| *mk == k) {
                            model.remove(i);
                        } else if model.len() == capacity {
                            model.pop();
                        }
                        model.insert(0, (k, v));
                        lru.set(k, v);
                    }
                    Op::Delete(k) => {
                        let expected = model.iter().position(|(mk, _)| *mk == k).map(|i| model.remove(i).1);
                        prop_assert_eq!(lru.delete(&k), expected);
                    }
                }
                prop_assert!(lru.len() <= capacity);
                let keys: Vec<u8> = model.iter().map(|(k, _)| *k).collect();
                prop_assert_eq!(lru.keys_by_recency(), keys);
            }
        }
    }
}
