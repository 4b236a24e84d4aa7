//! Descriptor cache
//!
//! Bounded memo of parsed standard records keyed by canonical identifier.
//! The backend is content addressed, so an entry never goes stale; entries
//! only leave the cache when capacity pressure evicts the least recently
//! used one.
//!
//! The internal lock is held only for the in-memory operation itself. Callers
//! fetch and parse outside the lock and insert afterwards, so two concurrent
//! misses on the same key may both fetch; the second insert simply replaces
//! an identical record.

use crate::error::{GatewayError, Result};
use crate::record::StandardRecord;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type Entries = LruCache<String, Arc<StandardRecord>>;

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

/// Thread-safe LRU cache of standard records
pub struct DescriptorCache {
    entries: Mutex<Entries>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl DescriptorCache {
    /// Create a cache holding at most `capacity` records
    ///
    /// # Returns
    /// * `Ok(DescriptorCache)` for a positive capacity
    /// * `Err(GatewayError::ConfigError)` if `capacity` is zero
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            GatewayError::ConfigError("descriptor cache capacity must be greater than 0".to_string())
        })?;

        Ok(DescriptorCache {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // a panic while holding the lock cannot leave a half-written record
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a record and mark it as most recently used
    pub fn get(&self, key: &str) -> Option<Arc<StandardRecord>> {
        let found = self.lock().get(key).cloned();

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Descriptor cache hit: key={}", key);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Descriptor cache miss: key={}", key);
        }

        found
    }

    /// Look up a record without touching its recency or the statistics
    pub fn peek(&self, key: &str) -> Option<Arc<StandardRecord>> {
        self.lock().peek(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// Insert a record, evicting the least recently used entry when full
    ///
    /// # Returns
    /// The key that was evicted to make room, if any
    pub fn put(&self, key: impl Into<String>, record: Arc<StandardRecord>) -> Option<String> {
        let key = key.into();
        let displaced = self.lock().push(key.clone(), record);
        self.insertions.fetch_add(1, Ordering::Relaxed);

        match displaced {
            Some((old_key, _)) if old_key != key => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Descriptor cache evicted key={} to insert key={}", old_key, key);
                Some(old_key)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: &str) -> Arc<StandardRecord> {
        let json = format!(r#"{{"s":{{"cid":"{}"}}}}"#, address);
        Arc::new(StandardRecord::from_slice(json.as_bytes()).unwrap())
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(DescriptorCache::new(0).is_err());
    }

    #[test]
    fn test_get_put() {
        let cache = DescriptorCache::new(4).unwrap();
        assert!(cache.get("k1").is_none());

        cache.put("k1", record("abc"));
        let hit = cache.get("k1").unwrap();
        assert_eq!(hit.structural.address.as_str(), "abc");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = DescriptorCache::new(2).unwrap();
        cache.put("a", record("a1"));
        cache.put("b", record("b1"));

        // touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());

        let evicted = cache.put("c", record("c1"));
        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.get("b").is_none());
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_key_is_not_eviction() {
        let cache = DescriptorCache::new(1).unwrap();
        cache.put("a", record("a1"));
        assert!(cache.put("a", record("a2")).is_none());
        assert_eq!(cache.peek("a").unwrap().structural.address.as_str(), "a2");
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let cache = DescriptorCache::new(2).unwrap();
        cache.put("a", record("a1"));
        cache.put("b", record("b1"));
        assert!(cache.peek("a").is_some());

        assert_eq!(cache.put("c", record("c1")).as_deref(), Some("a"));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(DescriptorCache::new(16).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("k{}", (t * 100 + i) % 32);
                        if cache.get(&key).is_none() {
                            cache.put(key, record("abc"));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 16);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 800);
    }
}
