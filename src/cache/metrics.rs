//! Cache Metrics
//!
//! Cache-line aligned counters, updated lock-free from every cache call.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Entity Cache Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for one entity cache, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct EntityCacheMetrics {
    /// Loads answered from the local map
    pub hits: AtomicU64,
    /// Loads that had to go to the remote table
    pub misses: AtomicU64,
    /// Local entries purged because their TTL had passed
    pub expirations: AtomicU64,
    /// Remote point lookups issued
    pub remote_lookups: AtomicU64,
    /// Remote lookups that found no row
    pub remote_not_found: AtomicU64,
    /// Successful saves
    pub saves: AtomicU64,
    /// Failed saves, loads and initializations
    pub failures: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<EntityCacheMetrics>() <= CACHE_LINE_SIZE);

impl Default for EntityCacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCacheMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            remote_lookups: AtomicU64::new(0),
            remote_not_found: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Record a remote lookup and whether it found a row
    #[inline]
    pub fn record_lookup(&self, found: bool) {
        self.remote_lookups.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.remote_not_found.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    #[inline]
    pub fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            remote_lookups: self.remote_lookups.load(Ordering::Relaxed),
            remote_not_found: self.remote_not_found.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time snapshot of cache metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub remote_lookups: u64,
    pub remote_not_found: u64,
    pub saves: u64,
    pub failures: u64,
}

impl CacheMetricsSnapshot {
    /// Get total load requests
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<EntityCacheMetrics>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<EntityCacheMetrics>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_metrics_operations() {
        let metrics = EntityCacheMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.remote_lookups, 2);
        assert_eq!(snapshot.remote_not_found, 1);
        assert_eq!(snapshot.failures, 1);
        assert!((snapshot.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_empty_hit_ratio() {
        assert_eq!(CacheMetricsSnapshot::default().hit_ratio(), 0.0);
    }
}
