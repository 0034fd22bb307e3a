//! Bounded-LRU / no-op cache capability, a reusable primitive for the stem
//! hasher's two caches.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A memoizing cache with two strategies: bounded LRU, or a no-op that never
/// retains anything. Selecting the strategy by capacity (`0` => no-op) lets
/// callers configure caching with a single integer, matching
/// [`crate::config::TrieConfig`].
pub enum Cache<K: Eq + Hash, V: Clone> {
    Bounded(LruCache<K, V>),
    Noop,
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    pub fn new(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(cap) => Cache::Bounded(LruCache::new(cap)),
            None => Cache::Noop,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self {
            Cache::Bounded(lru) => lru.get(key).cloned(),
            Cache::Noop => None,
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        if let Cache::Bounded(lru) = self {
            lru.put(key, value);
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Cache::Bounded(lru) => lru.len(),
            Cache::Noop => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_never_retains() {
        let mut cache: Cache<u8, u8> = Cache::new(0);
        cache.put(1, 2);
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_retains_and_evicts() {
        let mut cache: Cache<u8, u8> = Cache::new(1);
        cache.put(1, 10);
        assert_eq!(cache.get(&1), Some(10));
        cache.put(2, 20);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
    }
}
