//! In-memory TTL cache for resolved profiles.
//!
//! Entries older than the configured TTL are treated as absent by `get`
//! (with lazy removal) and are eligible for physical removal by `sweep`.
//! The cache never fails a request: a `set` that cannot be honored reports
//! `false` and the caller proceeds without caching.

use crate::profile::DriverProfile;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One cached profile.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<DriverProfile>,
    stored_at: Instant,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entry_count: usize,
}

impl CacheStats {
    /// Hit rate over all lookups, 0.0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL key→profile store.
///
/// Thread-safe; shared between the scheduler (cache-first admission) and
/// the single-flight resolver (short-circuit and write-back).
pub struct ProfileCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    /// Entry budget; storing beyond it evicts the oldest entry first.
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

/// Default entry budget; a page rarely shows more than a few dozen drivers.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

impl ProfileCache {
    /// Creates a cache with the given TTL and the default entry budget.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    /// Creates a cache with an explicit entry budget.
    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a profile.
    ///
    /// An entry older than the TTL behaves as a miss and is removed.
    pub fn get(&self, key: &str) -> Option<Arc<DriverProfile>> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.value))
            }
            Some(_) => {
                // Expired: lazily remove so the map doesn't accumulate.
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a profile.
    ///
    /// Returns `false` when the entry could not be stored; the resolution
    /// still succeeds for its consumers, it just won't be served from cache.
    pub fn set(&self, key: &str, value: Arc<DriverProfile>) -> bool {
        if self.max_entries == 0 {
            return false;
        }

        let mut entries = self.entries.lock().unwrap();

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            // Over budget: evict the oldest entry to make room.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Removes one entry, if present.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Physically removes every entry older than `max_age`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < max_age);
        let removed = before - entries.len();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, remaining = entries.len(), "Cache sweep");
        }
        removed
    }

    /// Current number of stored entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and leaves counters intact.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(name: &str) -> Arc<DriverProfile> {
        Arc::new(DriverProfile::from_value(json!({ "display_name": name })))
    }

    #[test]
    fn test_set_then_get_within_ttl() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        assert!(cache.set("alice", profile("Alice")));

        let hit = cache.get("alice").expect("entry should be present");
        assert_eq!(hit.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_get_miss_on_unknown_key() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        assert!(cache.get("nobody").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_behaves_as_miss_and_is_removed() {
        let cache = ProfileCache::new(Duration::from_millis(10));
        cache.set("alice", profile("Alice"));
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("alice").is_none());
        // Lazy removal happened.
        assert_eq!(cache.len(), 0);

        // A fresh set is required before a hit recurs.
        cache.set("alice", profile("Alice"));
        assert!(cache.get("alice").is_some());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        cache.set("bob", profile("Bob"));
        cache.invalidate("bob");
        assert!(cache.get("bob").is_none());
    }

    #[test]
    fn test_sweep_removes_only_old_entries() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        cache.set("old", profile("Old"));
        std::thread::sleep(Duration::from_millis(20));
        cache.set("new", profile("New"));

        let removed = cache.sweep(Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ProfileCache::with_capacity(Duration::from_secs(60), 2);
        cache.set("first", profile("First"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("second", profile("Second"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("third", profile("Third"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_zero_capacity_reports_set_failure() {
        let cache = ProfileCache::with_capacity(Duration::from_secs(60), 0);
        assert!(!cache.set("alice", profile("Alice")));
        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn test_hit_rate() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        cache.set("alice", profile("Alice"));
        cache.get("alice");
        cache.get("alice");
        cache.get("nobody");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_replace_existing_refreshes_value() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        cache.set("alice", profile("Alice"));
        cache.set("alice", profile("Alice Updated"));

        let hit = cache.get("alice").unwrap();
        assert_eq!(hit.display_name.as_deref(), Some("Alice Updated"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        cache.set("alice", profile("Alice"));
        cache.set("bob", profile("Bob"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
