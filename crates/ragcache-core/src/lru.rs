//! Recency-ordered keyed map.
//!
//! [`LruIndex`] wraps an unbounded `LruCache` from the `lru` crate.
//! Capacity is enforced by the owner, which has to remove the evicted
//! entry's file as well, so the index never drops entries on insert.

use ::lru::LruCache;

pub struct LruIndex<V> {
    cache: LruCache<String, V>,
}

impl<V> LruIndex<V> {
    pub fn new() -> Self {
        Self {
            cache: LruCache::unbounded(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    /// Borrow a value without changing its recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.cache.peek(key)
    }

    /// Mark `key` most recently used and return it mutably.
    pub fn touch(&mut self, key: &str) -> Option<&mut V> {
        self.cache.get_mut(key)
    }

    /// Insert or overwrite `key` as most recently used, returning the
    /// previous value if there was one.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        self.cache.put(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.cache.pop(key)
    }

    /// Key of the least recently used entry.
    pub fn oldest(&self) -> Option<&str> {
        self.cache.peek_lru().map(|(k, _)| k.as_str())
    }

    /// Remove and return the least recently used entry.
    pub fn pop_oldest(&mut self) -> Option<(String, V)> {
        self.cache.pop_lru()
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &str> {
        self.cache.iter().rev().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.cache.iter().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl<V> Default for LruIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}
