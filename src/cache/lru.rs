//! LRU Module
//!
//! Implements Least Recently Used tracking and a bounded, size-aware cache
//! built on top of it.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::Mutex;

use crate::cache::CacheStats;

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with a monotonically increasing tick; the
/// smallest tick is the least recently used key.
#[derive(Debug)]
pub struct LruTracker<K> {
    /// Tick -> key, oldest first
    order: BTreeMap<u64, K>,
    /// Key -> its current tick
    ticks: HashMap<K, u64>,
    next_tick: u64,
}

impl<K> Default for LruTracker<K> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            ticks: HashMap::new(),
            next_tick: 0,
        }
    }
}

impl<K: Hash + Eq + Clone> LruTracker<K> {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &K) {
        self.remove(key);
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        self.ticks.insert(key.clone(), tick);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&K> {
        self.order.values().next()
    }

    /// Iterates keys from least to most recently used.
    pub fn iter_oldest(&self) -> impl Iterator<Item = &K> {
        self.order.values()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.ticks.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.ticks.clear();
    }
}

// == LRU Cache ==
/// Sizing function deciding how much of the budget an entry consumes.
pub type Sizer<K, V> = Box<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// Bounded key -> value map evicting least recently used entries once the
/// summed entry size exceeds `max_size`.
///
/// All mutation happens behind a single mutex, so the cache can be shared
/// between worker threads and the calling thread. Values are cloned out on
/// `get`; store cheaply clonable values.
pub struct LruCache<K, V> {
    inner: Mutex<LruInner<K, V>>,
    sizer: Sizer<K, V>,
}

struct LruInner<K, V> {
    entries: HashMap<K, V>,
    lru: LruTracker<K>,
    stats: CacheStats,
    size: usize,
    max_size: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructors ==
    /// Creates a cache where every entry has size 1, so `max_size` is an
    /// entry count.
    pub fn new(max_size: usize) -> Self {
        Self::with_sizer(max_size, |_, _| 1)
    }

    /// Creates a cache whose entry sizes are computed by `sizer`.
    pub fn with_sizer(
        max_size: usize,
        sizer: impl Fn(&K, &V) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                stats: CacheStats::new(),
                size: 0,
                max_size,
            }),
            sizer: Box::new(sizer),
        }
    }

    // == Get ==
    /// Returns a clone of the value for `key`, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key).cloned() {
            Some(value) => {
                inner.lru.touch(key);
                inner.stats.record_hit();
                Some(value)
            }
            None => {
                inner.stats.record_miss();
                None
            }
        }
    }

    // == Put ==
    /// Inserts or replaces `key`, then evicts until within budget.
    ///
    /// Returns the previous value, if any. An entry larger than the whole
    /// budget is evicted straight away.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let added = (self.sizer)(&key, &value);
        let mut inner = self.inner.lock();

        inner.stats.record_put();
        inner.size += added;
        let previous = inner.entries.insert(key.clone(), value);
        if let Some(old) = &previous {
            inner.size -= (self.sizer)(&key, old);
        }
        inner.lru.touch(&key);

        let max_size = inner.max_size;
        self.trim_to(&mut inner, max_size);
        previous
    }

    // == Remove ==
    /// Removes `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.remove(key)?;
        inner.size -= (self.sizer)(key, &value);
        inner.lru.remove(key);
        Some(value)
    }

    // == Evict All ==
    /// Evicts every entry, counting each as an eviction.
    pub fn evict_all(&self) {
        let mut inner = self.inner.lock();
        self.trim_to(&mut inner, 0);
        // Zero-sized entries survive a trim to 0
        inner.entries.clear();
        inner.lru.clear();
        inner.size = 0;
    }

    // == Resize ==
    /// Changes the budget, evicting immediately if it shrank.
    pub fn resize(&self, max_size: usize) {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        self.trim_to(&mut inner, max_size);
    }

    fn trim_to(&self, inner: &mut LruInner<K, V>, max_size: usize) {
        while inner.size > max_size {
            let Some(oldest) = inner.lru.evict_oldest() else {
                break;
            };
            if let Some(value) = inner.entries.remove(&oldest) {
                inner.size -= (self.sizer)(&oldest, &value);
                inner.stats.record_eviction();
            }
        }
    }

    // == Accessors ==
    /// Sum of entry sizes currently held.
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn put_count(&self) -> u64 {
        self.inner.lock().stats.puts
    }

    pub fn hit_count(&self) -> u64 {
        self.inner.lock().stats.hits
    }

    pub fn miss_count(&self) -> u64 {
        self.inner.lock().stats.misses
    }

    pub fn eviction_count(&self) -> u64 {
        self.inner.lock().stats.evictions
    }

    // == Stats ==
    /// Returns a snapshot of the counters together with current sizes.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.set_sizes(inner.entries.len(), inner.size, inner.max_size);
        stats
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("entries", &inner.entries.len())
            .field("size", &inner.size)
            .field("max_size", &inner.max_size)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_tracker_new() {
        let lru: LruTracker<String> = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_tracker_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        // Touch key1 again - should move to front
        lru.touch(&key("key1"));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some(&key("key2")));
    }

    #[test]
    fn test_tracker_evict_order() {
        let mut lru = LruTracker::new();

        lru.touch(&key("a"));
        lru.touch(&key("b"));
        lru.touch(&key("c"));
        lru.touch(&key("a"));
        lru.touch(&key("c"));
        lru.touch(&key("b"));

        assert_eq!(lru.evict_oldest(), Some(key("a")));
        assert_eq!(lru.evict_oldest(), Some(key("c")));
        assert_eq!(lru.evict_oldest(), Some(key("b")));
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_tracker_remove_and_iterate() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));
        lru.remove(&key("key2"));
        lru.remove(&key("nonexistent"));

        assert!(!lru.contains(&key("key2")));
        let order: Vec<_> = lru.iter_oldest().cloned().collect();
        assert_eq!(order, vec![key("key1"), key("key3")]);
    }

    #[test]
    fn test_cache_counts_puts_hits_misses_evictions() {
        let cache = LruCache::new(2);

        assert_eq!(cache.max_size(), 2);
        assert_eq!(cache.size(), 0);
        cache.put(1, "AA");
        assert_eq!(cache.size(), 1);
        cache.put(2, "BB");
        assert_eq!(cache.size(), 2);

        // Third put evicts the oldest value
        cache.put(3, "CC");
        assert_eq!(cache.put_count(), 3);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.eviction_count(), 1);
        assert_eq!(cache.hit_count(), 0);
        assert_eq!(cache.miss_count(), 1);

        assert_eq!(cache.get(&2), Some("BB"));
        assert_eq!(cache.get(&3), Some("CC"));
        assert_eq!(cache.hit_count(), 2);

        cache.remove(&2);
        assert_eq!(cache.get(&2), None);

        cache.put(4, "DD");
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_cache_evict_all_then_resize() {
        let cache = LruCache::new(2);
        cache.put(1, "AA");
        cache.put(2, "BB");

        cache.evict_all();
        assert_eq!(cache.size(), 0);

        cache.resize(3);
        assert_eq!(cache.max_size(), 3);
        cache.put(1, "AA");
        cache.put(2, "BB");
        cache.put(3, "CC");
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.eviction_count(), 2);
    }

    #[test]
    fn test_cache_resize_shrinks_immediately() {
        let cache = LruCache::new(4);
        for i in 0..4 {
            cache.put(i, i * 10);
        }
        // Keep 0 recent
        cache.get(&0);

        cache.resize(2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&0), Some(0));
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_cache_sizer_accounts_bytes() {
        let cache = LruCache::with_sizer(10, |_: &&str, v: &Vec<u8>| v.len());

        cache.put("a", vec![0; 4]);
        cache.put("b", vec![0; 4]);
        assert_eq!(cache.size(), 8);

        // Replacement swaps sizes rather than adding them up
        cache.put("a", vec![0; 2]);
        assert_eq!(cache.size(), 6);

        // Pushes over budget, evicting "b" (oldest after "a" was replaced)
        cache.put("c", vec![0; 5]);
        assert_eq!(cache.size(), 7);
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_cache_oversized_entry_is_not_retained() {
        let cache = LruCache::with_sizer(3, |_: &u8, v: &String| v.len());
        cache.put(1, "toolarge".to_string());
        assert!(cache.is_empty());
        assert_eq!(cache.eviction_count(), 1);
    }

    #[test]
    fn test_cache_shared_between_threads() {
        let cache = Arc::new(LruCache::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        cache.put(t * 1000 + i, i);
                        cache.get(&(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 400);
        assert_eq!(cache.put_count(), 400);
        assert_eq!(cache.hit_count(), 400);
    }
}
