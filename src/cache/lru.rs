//! LRU (Least Recently Used) tracking

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Access-order tracker with lazy removal
///
/// Every insert or touch appends `(key, generation)`; stale pairs are
/// skipped when popping and dropped on compaction.
pub struct LruCache<K: Clone + Eq + Hash> {
    /// Access log (front = oldest)
    order: VecDeque<(K, u64)>,
    /// Latest generation per live key
    positions: HashMap<K, u64>,
    /// Generation counter
    generation: u64,
}

impl<K: Clone + Eq + Hash> LruCache<K> {
    /// Create a new LRU tracker
    pub fn new() -> Self {
        LruCache {
            order: VecDeque::new(),
            positions: HashMap::new(),
            generation: 0,
        }
    }

    /// Insert a key as most recently used
    pub fn insert(&mut self, key: K) {
        self.generation += 1;
        self.positions.insert(key.clone(), self.generation);
        self.order.push_back((key, self.generation));
        self.maybe_compact();
    }

    /// Mark a tracked key as recently used
    pub fn touch(&mut self, key: &K) {
        if self.positions.contains_key(key) {
            self.insert(key.clone());
        }
    }

    /// Stop tracking a key
    pub fn remove(&mut self, key: &K) {
        self.positions.remove(key);
    }

    /// Pop the least recently used key
    pub fn pop_oldest(&mut self) -> Option<K> {
        while let Some((key, gen)) = self.order.pop_front() {
            if self.positions.get(&key) == Some(&gen) {
                self.positions.remove(&key);
                return Some(key);
            }
        }
        None
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Get count of tracked keys
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Clear all keys
    pub fn clear(&mut self) {
        self.order.clear();
        self.positions.clear();
        self.generation = 0;
    }

    /// Drop stale entries from the access log
    pub fn compact(&mut self) {
        let positions = &self.positions;
        self.order
            .retain(|(key, gen)| positions.get(key) == Some(gen));
    }

    fn maybe_compact(&mut self) {
        if self.order.len() > 2 * self.positions.len() + 64 {
            self.compact();
        }
    }
}

impl<K: Clone + Eq + Hash> Default for LruCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_pop() {
        let mut lru = LruCache::new();

        lru.insert("a");
        lru.insert("b");
        lru.insert("c");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.pop_oldest(), Some("a"));
        assert_eq!(lru.pop_oldest(), Some("b"));
        assert_eq!(lru.pop_oldest(), Some("c"));
        assert_eq!(lru.pop_oldest(), None);
    }

    #[test]
    fn test_touch_updates_order() {
        let mut lru = LruCache::new();

        lru.insert("a");
        lru.insert("b");
        lru.insert("c");

        lru.touch(&"a");

        assert_eq!(lru.pop_oldest(), Some("b"));
        assert_eq!(lru.pop_oldest(), Some("c"));
        assert_eq!(lru.pop_oldest(), Some("a"));
    }

    #[test]
    fn test_touch_untracked_is_ignored() {
        let mut lru = LruCache::new();
        lru.touch(&"ghost");
        assert!(lru.is_empty());
        assert_eq!(lru.pop_oldest(), None);
    }

    #[test]
    fn test_remove() {
        let mut lru = LruCache::new();

        lru.insert("a");
        lru.insert("b");
        lru.insert("c");

        lru.remove(&"b");

        assert_eq!(lru.len(), 2);
        assert_eq!(lru.pop_oldest(), Some("a"));
        assert_eq!(lru.pop_oldest(), Some("c"));
    }

    #[test]
    fn test_compaction_keeps_order() {
        let mut lru = LruCache::new();
        lru.insert(1);
        lru.insert(2);
        for _ in 0..500 {
            lru.touch(&1);
        }

        assert!(lru.order.len() < 200);
        assert_eq!(lru.pop_oldest(), Some(2));
        assert_eq!(lru.pop_oldest(), Some(1));
    }

    #[test]
    fn test_clear() {
        let mut lru = LruCache::new();

        lru.insert("a");
        lru.insert("b");

        lru.clear();

        assert!(lru.is_empty());
        assert_eq!(lru.pop_oldest(), None);
    }
}
