// src/cache/mod.rs

//! Response cache for wrapped service calls.
//!
//! Entries expire lazily: an entry older than its TTL is treated as absent and
//! removed by the read that finds it, or replaced by the next write. There is
//! no background sweeper; eviction happens on the calling path.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::{GuardError, Result, StorageError};

/// Entry in the response cache
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Counts of cached entries, split by validity at the time of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// TTL applied when a caller does not pass one
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Returns the cached value if it is still valid, evicting it otherwise
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.is_valid(now) => return Some(entry.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop read lock and acquire write lock to remove it
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| !entry.is_valid(now)) {
            entries.remove(key);
        }
        None
    }

    /// Stores a value, replacing any previous entry under the same key
    pub fn insert(&self, key: &str, data: Value, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.len() >= self.config.max_entries && !entries.contains_key(key) {
            entries.retain(|_, entry| entry.is_valid(now));
            if entries.len() >= self.config.max_entries {
                return Err(GuardError::Storage(StorageError::CapacityExceeded(format!(
                    "response cache is full ({} entries)",
                    self.config.max_entries
                ))));
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: now,
                ttl,
            },
        );
        Ok(())
    }

    /// Removes every entry whose TTL has elapsed, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let valid_entries = entries.values().filter(|e| e.is_valid(now)).count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries,
            expired_entries: entries.len() - valid_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time;

    fn small_cache(max_entries: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            default_ttl: Duration::from_secs(300),
            max_entries,
        })
    }

    #[tokio::test]
    async fn test_get_returns_valid_entry() {
        let cache = ResponseCache::default();
        cache.insert("clients", json!([1, 2, 3]), Duration::from_secs(60)).unwrap();

        assert_eq!(cache.get("clients"), Some(json!([1, 2, 3])));
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_evicted() {
        let cache = ResponseCache::default();
        cache.insert("k", json!("v"), Duration::from_millis(50)).unwrap();

        time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.stats().expired_entries, 1);
        assert_eq!(cache.get("k"), None);
        // The read evicted it
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_stats_split_valid_and_expired() {
        let cache = ResponseCache::default();
        cache.insert("short", json!(1), Duration::from_millis(30)).unwrap();
        cache.insert("long", json!(2), Duration::from_secs(60)).unwrap();

        time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            cache.stats(),
            CacheStats {
                total_entries: 2,
                valid_entries: 1,
                expired_entries: 1,
            }
        );
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_full_cache_purges_expired_before_rejecting() {
        let cache = small_cache(2);
        cache.insert("a", json!(1), Duration::from_millis(20)).unwrap();
        cache.insert("b", json!(2), Duration::from_secs(60)).unwrap();

        time::sleep(Duration::from_millis(40)).await;

        // "a" is expired, so there is room
        cache.insert("c", json!(3), Duration::from_secs(60)).unwrap();

        // Now both live entries fill the cache
        let err = cache.insert("d", json!(4), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, GuardError::Storage(StorageError::CapacityExceeded(_))));

        // Replacing an existing key is always allowed
        cache.insert("b", json!(20), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("b"), Some(json!(20)));
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let cache = ResponseCache::default();
        cache.insert("a", json!(1), Duration::from_secs(60)).unwrap();
        cache.insert("b", json!(2), Duration::from_secs(60)).unwrap();

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));

        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
