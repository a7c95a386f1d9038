//! Generic keyed cache with pluggable eviction policy.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

struct Entry<V> {
    value: V,
    size_bytes: usize,
    inserted_at: Instant,
    last_access: Instant,
    access_count: u64,
    expires_at: Option<Instant>,
    insertion_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_size: usize,
    pub current_bytes: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A value's size, for the `max_size_bytes` cap. Implemented for `Vec<u8>`
/// (what the controller caches); other value types fall back to 0, opting
/// out of the byte cap.
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    max_size_bytes: Option<usize>,
    default_ttl: Option<Duration>,
    policy: EvictionPolicy,
    stats: CacheStats,
    next_seq: u64,
    on_evict: Option<Box<dyn Fn(&K) + Send + Sync>>,
}

/// A keyed store with a capacity cap, an optional byte-size cap, and one of
/// four eviction policies. Internally single-locked: every operation takes
/// the same mutex, so the eviction callback always runs with the lock held
/// and must never call back into the cache.
pub struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + ByteSize,
{
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                capacity,
                max_size_bytes: None,
                default_ttl: None,
                policy,
                stats: CacheStats::default(),
                next_seq: 0,
                on_evict: None,
            }),
        }
    }

    pub fn with_max_size_bytes(self, max_size_bytes: usize) -> Self {
        self.inner.lock().unwrap().max_size_bytes = Some(max_size_bytes);
        self
    }

    pub fn with_default_ttl(self, ttl: Duration) -> Self {
        self.inner.lock().unwrap().default_ttl = Some(ttl);
        self
    }

    pub fn with_on_evict(self, callback: Box<dyn Fn(&K) + Send + Sync>) -> Self {
        self.inner.lock().unwrap().on_evict = Some(callback);
        self
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired = inner
            .entries
            .get(key)
            .map(|e| e.expires_at.is_some_and(|exp| now >= exp))
            .unwrap_or(false);
        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            inner.recompute_size();
            return None;
        }
        let hit_value = if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_access = now;
            entry.access_count += 1;
            Some(entry.value.clone())
        } else {
            None
        };
        if hit_value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit_value
    }

    pub fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let effective_ttl = ttl.or(inner.default_ttl);
        let size_bytes = value.byte_size();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.entries.insert(
            key,
            Entry {
                value,
                size_bytes,
                inserted_at: now,
                last_access: now,
                access_count: 0,
                expires_at: effective_ttl.map(|d| now + d),
                insertion_seq: seq,
            },
        );

        inner.evict_to_fit();
        inner.recompute_size();
    }

    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key);
        inner.recompute_size();
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.recompute_size();
    }

    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some(entry) => !entry
                .expires_at
                .is_some_and(|exp| Instant::now() >= exp),
            None => false,
        }
    }

    pub fn touch(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_access = now;
        }
    }

    pub fn set_ttl(&self, key: &K, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn recompute_size(&mut self) {
        self.stats.current_size = self.entries.len();
        self.stats.current_bytes = self.entries.values().map(|e| e.size_bytes).sum();
    }

    fn pick_eviction_candidate(&self) -> Option<K> {
        match self.policy {
            EvictionPolicy::Lru => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo | EvictionPolicy::Ttl => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.insertion_seq)
                .map(|(k, _)| k.clone()),
        }
    }

    fn evict_to_fit(&mut self) {
        loop {
            let over_capacity = self.entries.len() > self.capacity;
            let over_bytes = self.max_size_bytes.is_some_and(|cap| {
                let total: usize = self.entries.values().map(|e| e.size_bytes).sum();
                total > cap
            });
            if !over_capacity && !over_bytes {
                break;
            }
            let Some(victim) = self.pick_eviction_candidate() else {
                break;
            };
            self.entries.remove(&victim);
            self.stats.evictions += 1;
            if let Some(callback) = &self.on_evict {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(&victim);
                }));
                if let Err(panic) = result {
                    let message = panic
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("unknown panic");
                    tracing::warn!(error = message, "cache eviction callback panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, policy: EvictionPolicy) -> Cache<&'static str, Vec<u8>> {
        Cache::new(capacity, policy)
    }

    #[test]
    fn put_then_get_round_trips() {
        let c = cache(4, EvictionPolicy::Lru);
        c.put("a", vec![1, 2, 3], None);
        assert_eq!(c.get(&"a"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn hit_ratio_matches_hits_over_total() {
        let c = cache(4, EvictionPolicy::Lru);
        c.put("a", vec![1], None);
        c.get(&"a");
        c.get(&"a");
        c.get(&"missing");
        let stats = c.get_stats();
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let c = cache(2, EvictionPolicy::Lru);
        c.put("a", vec![1], None);
        c.put("b", vec![2], None);
        c.get(&"a");
        c.put("c", vec![3], None);
        assert_eq!(c.get(&"b"), None);
        assert_eq!(c.get(&"a"), Some(vec![1]));
        assert_eq!(c.get(&"c"), Some(vec![3]));
    }

    #[test]
    fn lfu_evicts_least_frequently_used() {
        let c = cache(2, EvictionPolicy::Lfu);
        c.put("a", vec![1], None);
        c.put("b", vec![2], None);
        c.get(&"a");
        c.get(&"a");
        c.get(&"b");
        c.put("c", vec![3], None);
        let mut keys: Vec<_> = [c.contains(&"a"), c.contains(&"c")].into_iter().collect();
        keys.sort();
        assert!(c.contains(&"a"));
        assert!(c.contains(&"c"));
        assert!(!c.contains(&"b"));
    }

    #[test]
    fn capacity_one_evicts_on_every_distinct_put() {
        let c = cache(1, EvictionPolicy::Fifo);
        c.put("a", vec![1], None);
        c.put("b", vec![2], None);
        assert!(!c.contains(&"a"));
        assert!(c.contains(&"b"));
    }

    #[test]
    fn expired_entry_counts_as_a_miss_and_is_removed() {
        let c = cache(4, EvictionPolicy::Ttl);
        c.put("a", vec![1], Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.get_stats().expirations, 1);
    }
}
