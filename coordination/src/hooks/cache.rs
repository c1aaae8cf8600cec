//! TTL + LRU cache for low-priority hook results
//!
//! Backed by `moka::sync::Cache` with the LRU eviction policy. Each entry
//! carries its own TTL, applied through an [`Expiry`] impl. Expired entries
//! are invisible to reads immediately and are removed for good when pending
//! maintenance runs ([`ResultCache::purge_expired`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use serde::Serialize;
use tracing::debug;

use super::types::HookResult;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: HookResult,
    pub cached_at: Instant,
    pub ttl: Duration,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Per-entry time to live
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded key → [`HookResult`] store
pub struct ResultCache {
    entries: Cache<String, CacheEntry>,
    counters: Arc<Counters>,
    capacity: usize,
    default_ttl: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = counters.clone();

        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .eviction_listener(move |key: Arc<String>, _value, cause| match cause {
                RemovalCause::Size => {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Evicted least recently used cache entry");
                }
                RemovalCause::Expired => {
                    listener_counters.expirations.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Cache entry expired");
                }
                _ => {}
            })
            .build();

        Self {
            entries,
            counters,
            capacity,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh value for `key`, refreshing its recency
    pub fn get(&self, key: &str) -> Option<HookResult> {
        match self.entries.get(key) {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace `key`; `ttl` defaults to the cache-wide TTL
    pub fn put(&self, key: impl Into<String>, value: HookResult, ttl: Option<Duration>) {
        if self.capacity == 0 {
            return;
        }
        let entry = CacheEntry {
            value,
            cached_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.insert(key.into(), entry);
    }

    /// Run pending maintenance, dropping expired entries and applying
    /// capacity eviction. Returns how many entries expired during this run.
    pub fn purge_expired(&self) -> usize {
        let before = self.counters.expirations.load(Ordering::Relaxed);
        self.entries.run_pending_tasks();
        let after = self.counters.expirations.load(Ordering::Relaxed);
        after.saturating_sub(before) as usize
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Live entry count; flushes pending maintenance first
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let len = self.len();
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            len,
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> HookResult {
        HookResult::empty(id)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("k", result("e1"), None);
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.metadata.event_id, "e1");
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("k", result("e1"), Some(Duration::ZERO));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_per_entry_ttl() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("short", result("s"), Some(Duration::from_millis(20)));
        cache.put("long", result("l"), None);
        std::thread::sleep(Duration::from_millis(50));

        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn test_lru_eviction_respects_reads() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a", result("a"), None);
        cache.put("b", result("b"), None);
        cache.purge_expired();
        // reading "a" makes "b" the eviction candidate
        assert!(cache.get("a").is_some());
        cache.purge_expired();
        cache.put("c", result("c"), None);
        cache.purge_expired();

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a", result("a1"), None);
        cache.put("b", result("b"), None);
        cache.put("a", result("a2"), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().metadata.event_id, "a2");
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = ResultCache::new(8, Duration::from_secs(60));
        cache.put("stale-1", result("x"), Some(Duration::ZERO));
        cache.put("stale-2", result("y"), Some(Duration::ZERO));
        cache.put("fresh", result("z"), None);
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = ResultCache::new(0, Duration::from_secs(60));
        cache.put("a", result("a"), None);
        assert!(cache.get("a").is_none());
    }
}
