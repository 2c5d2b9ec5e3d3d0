//! Short-TTL cache for computed dynamics
//!
//! Snapshot lists, volume info and the dtl status of a vDisk are expensive
//! to derive from the volume driver and may be slightly stale: the volume
//! driver stays authoritative. Values are stored as JSON so any serde type
//! fits behind the object-safe [`Cache`] trait; [`CacheExt`] adds typed
//! access on top.

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use vdisk_common::Clock;

/// Best-effort key/value cache
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value, ttl_secs: u64);

    fn delete(&self, key: &str);
}

/// Typed helpers for any [`Cache`]
pub trait CacheExt {
    /// Read and decode a value; undecodable entries count as misses
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T>;

    /// Encode and store a value
    fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64);
}

impl<C: Cache + ?Sized> CacheExt for C {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Dropping undecodable cache entry {}: {}", key, e);
                self.delete(key);
                None
            }
        }
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl_secs),
            Err(e) => debug!("Not caching {}: {}", key, e),
        }
    }
}

/// Cache key builders
pub mod cache_keys {
    use vdisk_common::VDiskGuid;

    #[must_use]
    pub fn snapshots(vdisk: &VDiskGuid) -> String {
        format!("vdisk_{vdisk}_snapshots")
    }

    #[must_use]
    pub fn volume_info(vdisk: &VDiskGuid) -> String {
        format!("vdisk_{vdisk}_info")
    }

    #[must_use]
    pub fn dtl_status(vdisk: &VDiskGuid) -> String {
        format!("vdisk_{vdisk}_dtl_status")
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub expirations: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

struct CacheEntry {
    value: Value,
    expires_at: i64,
}

/// In-process cache with per-entry expiry driven by a [`Clock`]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl MemoryCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of entries, expired ones included until they are touched
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires_at = self.clock.now().saturating_add(ttl);
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_common::ManualClock;

    #[test]
    fn test_entries_expire() {
        let clock = Arc::new(ManualClock::new(100));
        let cache = MemoryCache::new(clock.clone());
        cache.set_as("k", &vec![1, 2, 3], 10);

        assert_eq!(cache.get_as::<Vec<i32>>("k"), Some(vec![1, 2, 3]));
        clock.advance(9);
        assert!(cache.get("k").is_some());
        clock.advance(1);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_delete_and_type_mismatch() {
        let cache = MemoryCache::new(Arc::new(ManualClock::new(0)));
        cache.set_as("k", &"text", 60);
        assert_eq!(cache.get_as::<u32>("k"), None);
        // Undecodable entries are dropped
        assert!(cache.get("k").is_none());

        cache.set_as("k", &7u32, 60);
        cache.delete("k");
        assert_eq!(cache.get_as::<u32>("k"), None);
        assert!(cache.stats().hit_ratio() < 0.5);
    }

    #[test]
    fn test_cache_keys() {
        let guid = vdisk_common::VDiskGuid::new("vd-1");
        assert_eq!(cache_keys::snapshots(&guid), "vdisk_vd-1_snapshots");
        assert_eq!(cache_keys::dtl_status(&guid), "vdisk_vd-1_dtl_status");
    }
}
