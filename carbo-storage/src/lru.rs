//! Bounded least-recently-used map.
//!
//! Recency is a monotonically increasing tick per access; the oldest tick
//! is the eviction candidate. `get`, `insert` and `remove` are O(log n).

use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    tick: u64,
}

/// String-keyed LRU map with a fixed capacity.
#[derive(Debug)]
pub struct LruMap<V> {
    capacity: usize,
    entries: HashMap<String, Slot<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl<V> LruMap<V> {
    /// Create a map holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(&slot.value)
    }

    /// Look up without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace `key`, returning the key evicted to make room.
    pub fn insert(&mut self, key: String, value: V) -> Option<String> {
        let tick = self.bump();
        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            slot.value = value;
            self.recency.insert(tick, key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Slot { value, tick });
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut lru = LruMap::new(2);
        assert_eq!(lru.insert("a".into(), 1), None);
        assert_eq!(lru.insert("b".into(), 2), None);
        // touch a so b becomes the oldest
        assert_eq!(lru.get("a"), Some(&1));
        assert_eq!(lru.insert("c".into(), 3), Some("b".to_string()));
        assert!(lru.contains_key("a"));
        assert!(!lru.contains_key("b"));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut lru = LruMap::new(2);
        lru.insert("a".into(), 1);
        lru.insert("b".into(), 2);
        assert_eq!(lru.insert("a".into(), 10), None);
        assert_eq!(lru.peek("a"), Some(&10));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut lru = LruMap::new(0);
        assert_eq!(lru.capacity(), 1);
        lru.insert("a".into(), 1);
        assert_eq!(lru.insert("b".into(), 2), Some("a".to_string()));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut lru = LruMap::new(3);
        lru.insert("a".into(), 1);
        lru.insert("b".into(), 2);
        assert_eq!(lru.remove("a"), Some(1));
        assert_eq!(lru.remove("a"), None);
        lru.clear();
        assert!(lru.is_empty());
    }
}
