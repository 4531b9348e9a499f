//! Cache Entry Types

use chrono::{DateTime, Duration, Utc};

// =============================================================================
// Cache Entry
// =============================================================================

/// A locally cached entity with its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry<E> {
    /// The cached record
    pub value: E,
    /// Time the entry was stored locally
    pub cached_at: DateTime<Utc>,
    /// Entry is live up to and including this instant
    pub expires_at: DateTime<Utc>,
}

impl<E> CacheEntry<E> {
    /// Create an entry that lives for `ttl` from `now`
    pub fn new(value: E, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Get age in seconds since the entry was stored
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.cached_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cache_entry_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 11, 0, 0).unwrap();
        let entry = CacheEntry::new("value", now, Duration::hours(1));

        assert!(!entry.is_expired(now));
        // Exactly at expiry is still live
        assert!(!entry.is_expired(now + Duration::hours(1)));
        assert!(entry.is_expired(now + Duration::hours(1) + Duration::seconds(1)));
        assert_eq!(entry.age_seconds(now + Duration::minutes(2)), 120);
    }
}
