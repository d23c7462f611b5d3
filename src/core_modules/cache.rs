// THEORY:
// Feature computation is the most expensive step of a prediction, and interactive
// use asks for the same tiles again and again. `BoundedCache` keeps recent results
// around without letting memory grow without limit.
//
// Key architectural principles:
// 1.  **Bounded**: The cache never holds more than `capacity` entries. A capacity of
//     zero is a configuration error, not a silently disabled cache.
// 2.  **Content-Addressed**: Keys are values (a source name plus a `Region`), never
//     object identities, so equal requests hit the same entry.
// 3.  **Least Recently Used**: A recency queue, trimmed from the front like a sliding
//     history window, decides which entry is evicted.

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A capacity-bounded map with least-recently-used eviction.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Keys ordered from least to most recently used.
    recency: VecDeque<K>,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Configuration("cache capacity must be at least 1".into()));
        }
        Ok(Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            stats: CacheStats::default(),
        })
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

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn touch(&mut self, key: &K) {
        if let Some(position) = self.recency.iter().position(|k| k == key) {
            if let Some(existing) = self.recency.remove(position) {
                self.recency.push_back(existing);
            }
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key).cloned() {
            Some(value) => {
                self.stats.hits += 1;
                self.touch(key);
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.recency.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }

    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        compute: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
