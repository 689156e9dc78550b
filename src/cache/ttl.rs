//! Generic TTL cache.

use crate::Result;
use crate::clock::Clock;
use crate::sweep::{SweepHandle, spawn_sweeper};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A cached value and its expiry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: u64,
}

impl<V> CacheEntry<V> {
    const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Capacity-bounded cache with per-entry expiry.
///
/// Expired entries are never returned: `get` evicts them lazily and
/// [`Self::purge_expired`] (or the background sweeper) removes the rest.
/// When full, the least recently used entry is evicted.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use teamrecall::{ManualClock, TtlCache};
///
/// let clock = Arc::new(ManualClock::new(0));
/// let cache: TtlCache<String, u32> =
///     TtlCache::new("example", 10, Duration::from_secs(1), clock.clone());
/// cache.set("a".to_string(), 1);
/// assert_eq!(cache.get(&"a".to_string()), Some(1));
/// clock.advance_ms(1_000);
/// assert_eq!(cache.get(&"a".to_string()), None);
/// ```
pub struct TtlCache<K, V>
where
    K: Hash + Eq,
{
    name: &'static str,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache. A zero capacity is treated as one.
    #[must_use]
    pub fn new(
        name: &'static str,
        capacity: usize,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            clock,
        }
    }

    /// Returns the cache name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the default TTL.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a live value, evicting it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let value = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            },
            None => None,
        };
        drop(entries);

        if value.is_some() {
            metrics::counter!("cache_hits_total", "cache" => self.name).increment(1);
        } else {
            metrics::counter!("cache_misses_total", "cache" => self.name).increment(1);
        }
        value
    }

    /// Stores a value with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores a value with an explicit TTL.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_ms().saturating_add(ttl_ms);
        self.lock().put(key, CacheEntry { value, expires_at });
    }

    /// Returns true if a live entry exists. Does not affect LRU order.
    pub fn has(&self, key: &K) -> bool {
        let now = self.clock.now_ms();
        self.lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Removes an entry. Returns true if one was present.
    pub fn delete(&self, key: &K) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Removes every entry whose key matches `predicate`.
    ///
    /// Returns the number of entries removed.
    pub fn delete_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut entries = self.lock();
        let doomed: Vec<K> = entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns the number of live entries.
    pub fn size(&self) -> usize {
        let now = self.clock.now_ms();
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }

    /// Removes expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        let remaining = entries.len();
        drop(entries);

        if !expired.is_empty() {
            debug!(cache = self.name, purged = expired.len(), remaining, "Purged expired entries");
        }
        expired.len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a background thread that purges expired entries every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> Result<SweepHandle> {
        spawn_sweeper(
            &format!("teamrecall-cache-{}", self.name),
            interval,
            Arc::downgrade(self),
            |cache: &Self| {
                cache.purge_expired();
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(clock: &Arc<ManualClock>, capacity: usize) -> TtlCache<String, u32> {
        TtlCache::new("test", capacity, Duration::from_millis(100), clock.clone())
    }

    #[test]
    fn test_expires_at_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = cache(&clock, 10);
        cache.set("k".to_string(), 7);
        clock.advance_ms(99);
        assert_eq!(cache.get(&"k".to_string()), Some(7));
        clock.advance_ms(1);
        assert!(!cache.has(&"k".to_string()));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn test_set_with_ttl_overrides_default() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock, 10);
        cache.set_with_ttl("long".to_string(), 1, Duration::from_secs(10));
        clock.advance_ms(5_000);
        assert_eq!(cache.get(&"long".to_string()), Some(1));
    }

    #[test]
    fn test_lru_eviction() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock, 2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        let _ = cache.get(&"a".to_string());
        cache.set("c".to_string(), 3);
        assert!(cache.has(&"a".to_string()));
        assert!(!cache.has(&"b".to_string()));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_purge_and_delete() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock, 10);
        cache.set("a".to_string(), 1);
        cache.set_with_ttl("b".to_string(), 2, Duration::from_secs(60));
        clock.advance_ms(200);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.delete(&"b".to_string()));
        assert!(!cache.delete(&"b".to_string()));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_delete_where() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock, 10);
        cache.set("u1:a".to_string(), 1);
        cache.set("u1:b".to_string(), 2);
        cache.set("u2:a".to_string(), 3);
        assert_eq!(cache.delete_where(|k| k.starts_with("u1:")), 2);
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock, 0);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        assert_eq!(cache.size(), 1);
    }
}
