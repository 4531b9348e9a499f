//! Entity Cache
//!
//! Process-local, TTL-bounded map in front of one table. The remote table is
//! authoritative; the local map only saves round trips and never survives a
//! restart.

use crate::cache::entry::CacheEntry;
use crate::cache::metrics::{CacheMetricsSnapshot, EntityCacheMetrics};
use crate::clock::ClockRef;
use crate::entity::Entity;
use crate::error::{Error, ErrorClass, Result};
use crate::table::{AzureTableService, TableServiceRef};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default local time-to-live
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for an entity cache
#[derive(Debug, Clone)]
pub struct EntityCacheConfig {
    /// How long a locally cached entity stays live
    pub ttl: Duration,
}

impl Default for EntityCacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl EntityCacheConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }
}

// =============================================================================
// Entity Cache
// =============================================================================

/// Two-layer store for one entity kind
///
/// `save` and `load` never return errors: failures are logged and reported as
/// `false` / `None`. `try_save` and `try_load` expose the underlying result.
pub struct EntityCache<E: Entity> {
    /// Local layer, keyed by row key
    local: DashMap<String, CacheEntry<E>>,
    /// Remote binding, `None` until initialized
    service: RwLock<Option<TableServiceRef>>,
    clock: ClockRef,
    ttl: chrono::Duration,
    metrics: EntityCacheMetrics,
}

impl<E: Entity> EntityCache<E> {
    /// Create an unbound cache
    pub fn new(config: EntityCacheConfig, clock: ClockRef) -> Self {
        let ttl = chrono::Duration::from_std(config.ttl).unwrap_or_else(|_| {
            warn!(table = E::PARTITION_KEY, ttl = ?config.ttl, "TTL out of range, using default");
            chrono::Duration::hours(1)
        });

        Self {
            local: DashMap::new(),
            service: RwLock::new(None),
            clock,
            ttl,
            metrics: EntityCacheMetrics::new(),
        }
    }

    /// Table this cache is bound to
    pub fn table_name(&self) -> &'static str {
        E::PARTITION_KEY
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn is_connected(&self) -> bool {
        self.service.read().is_some()
    }

    /// Ensure the table exists and bind to it.
    ///
    /// On failure the cache stays unbound and every remote call fails.
    pub async fn initialize(&self, service: TableServiceRef) -> bool {
        match service.create_table_if_not_exists(E::PARTITION_KEY).await {
            Ok(creation) => {
                info!(
                    table = E::PARTITION_KEY,
                    backend = service.backend(),
                    ?creation,
                    "Table cache bound"
                );
                *self.service.write() = Some(service);
                true
            }
            Err(e) => {
                self.metrics.record_failure();
                error!(
                    table = E::PARTITION_KEY,
                    backend = service.backend(),
                    error = %e,
                    "Cannot initialize table, cache stays unbound"
                );
                false
            }
        }
    }

    /// Build the Azure adapter from a connection string and initialize
    pub async fn connect(&self, connection_string: &str) -> bool {
        match AzureTableService::from_connection_string(connection_string) {
            Ok(service) => self.initialize(Arc::new(service)).await,
            Err(e) => {
                self.metrics.record_failure();
                error!(table = E::PARTITION_KEY, error = %e, "Invalid storage connection string");
                false
            }
        }
    }

    fn service(&self) -> Result<TableServiceRef> {
        self.service.read().clone().ok_or_else(|| Error::TableUnavailable {
            table: E::PARTITION_KEY.to_string(),
        })
    }

    fn store_local(&self, row_key: String, entity: E) {
        let entry = CacheEntry::new(entity, self.clock.now(), self.ttl);
        self.local.insert(row_key, entry);
    }

    /// Live local entry, purging it if expired
    fn lookup_local(&self, row_key: &str) -> Option<E> {
        let now = self.clock.now();
        let expired = match self.local.get(row_key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some((_, entry)) = self.local.remove_if(row_key, |_, e| e.is_expired(now)) {
                self.metrics.record_expiration();
                debug!(
                    table = E::PARTITION_KEY,
                    row_key,
                    age_secs = entry.age_seconds(now),
                    "Purged expired entry"
                );
            }
        }
        None
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Upsert-merge the entity remotely, then refresh the local entry.
    ///
    /// On failure neither layer changes.
    pub async fn try_save(&self, entity: &E) -> Result<()> {
        let row_key = entity.row_key();
        let service = self.service().map_err(|e| self.failed(e))?;

        service
            .upsert_merge(E::PARTITION_KEY, E::PARTITION_KEY, &row_key, &entity.to_row())
            .await
            .map_err(|e| self.failed(e))?;

        self.store_local(row_key.clone(), entity.clone());
        self.metrics.record_save();
        debug!(table = E::PARTITION_KEY, row_key = %row_key, "Saved entity");
        Ok(())
    }

    /// Save, logging any failure. Returns whether the write went through.
    pub async fn save(&self, entity: &E) -> bool {
        match self.try_save(entity).await {
            Ok(()) => true,
            Err(e) => {
                self.log_failure("save", &entity.row_key(), &e);
                false
            }
        }
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Look the entity up, locally first unless `bypass_cache` is set.
    ///
    /// `Ok(None)` means the row does not exist remotely. Absence is not
    /// cached.
    pub async fn try_load(&self, id: E::Id, bypass_cache: bool) -> Result<Option<E>> {
        let row_key = E::format_row_key(id);

        if !bypass_cache {
            if let Some(entity) = self.lookup_local(&row_key) {
                self.metrics.record_hit();
                return Ok(Some(entity));
            }
        }
        self.metrics.record_miss();

        let service = self.service().map_err(|e| self.failed(e))?;
        let row = service
            .get_row(E::PARTITION_KEY, E::PARTITION_KEY, &row_key)
            .await
            .map_err(|e| self.failed(e))?;
        self.metrics.record_lookup(row.is_some());

        let Some(row) = row else {
            info!(table = E::PARTITION_KEY, row_key = %row_key, "Entity not found");
            return Ok(None);
        };

        let entity = E::from_row(&row).map_err(|e| self.failed(e))?;
        self.store_local(row_key, entity.clone());
        Ok(Some(entity))
    }

    /// Load, logging any failure as absence
    pub async fn load(&self, id: E::Id, bypass_cache: bool) -> Option<E> {
        match self.try_load(id, bypass_cache).await {
            Ok(entity) => entity,
            Err(e) => {
                self.log_failure("load", &E::format_row_key(id), &e);
                None
            }
        }
    }

    // =========================================================================
    // Local Maintenance
    // =========================================================================

    /// Drop the local entry for `id`. The remote row is untouched.
    pub fn invalidate(&self, id: E::Id) -> bool {
        self.local.remove(&E::format_row_key(id)).is_some()
    }

    /// Drop every local entry
    pub fn clear_local(&self) -> usize {
        let entries = self.local.len();
        self.local.clear();
        info!(table = E::PARTITION_KEY, entries, "Cleared local cache");
        entries
    }

    /// Number of local entries, expired ones included
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn failed(&self, e: Error) -> Error {
        self.metrics.record_failure();
        e
    }

    fn log_failure(&self, operation: &str, row_key: &str, e: &Error) {
        match e.class() {
            ErrorClass::Transient => {
                warn!(
                    table = E::PARTITION_KEY,
                    row_key,
                    operation,
                    error = %e,
                    "Table storage call failed"
                )
            }
            ErrorClass::Configuration => {
                error!(
                    table = E::PARTITION_KEY,
                    row_key,
                    operation,
                    error = %e,
                    "Table storage not usable"
                )
            }
            ErrorClass::Data => {
                error!(
                    table = E::PARTITION_KEY,
                    row_key,
                    operation,
                    error = %e,
                    "Stored row is malformed"
                )
            }
            ErrorClass::Internal => {
                error!(
                    table = E::PARTITION_KEY,
                    row_key,
                    operation,
                    error = %e,
                    "Table storage call failed"
                )
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::{Row, ServerConfigEntity, UserStatsEntity};
    use crate::table::InMemoryTableService;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<InMemoryTableService>,
        clock: Arc<ManualClock>,
        cache: EntityCache<UserStatsEntity>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTableService::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        let cache = EntityCache::new(EntityCacheConfig::default(), clock.clone());
        assert!(cache.initialize(store.clone()).await);
        Fixture { store, clock, cache }
    }

    fn user(id: u64, num_easy: u32) -> UserStatsEntity {
        UserStatsEntity {
            num_easy,
            ..UserStatsEntity::new(id)
        }
    }

    #[tokio::test]
    async fn test_save_then_load_stays_local() {
        let f = fixture().await;
        assert!(f.cache.save(&user(7, 3)).await);

        let before = f.store.total_calls();
        assert_eq!(f.cache.load(7, false).await, Some(user(7, 3)));
        assert_eq!(f.store.total_calls(), before);
        assert_eq!(f.cache.metrics().hits, 1);
    }

    #[tokio::test]
    async fn test_load_after_ttl_goes_remote_once() {
        let f = fixture().await;
        assert!(f.cache.save(&user(7, 3)).await);

        f.clock.advance(chrono::Duration::hours(1) + chrono::Duration::seconds(1));
        let gets = f.store.get_calls();
        assert_eq!(f.cache.load(7, false).await, Some(user(7, 3)));
        assert_eq!(f.store.get_calls(), gets + 1);
        assert_eq!(f.cache.metrics().expirations, 1);

        // Refreshed by the lookup
        assert_eq!(f.cache.load(7, false).await, Some(user(7, 3)));
        assert_eq!(f.store.get_calls(), gets + 1);
    }

    #[tokio::test]
    async fn test_entry_live_exactly_at_expiry() {
        let f = fixture().await;
        assert!(f.cache.save(&user(7, 3)).await);

        f.clock.advance(chrono::Duration::hours(1));
        let gets = f.store.get_calls();
        assert!(f.cache.load(7, false).await.is_some());
        assert_eq!(f.store.get_calls(), gets);
    }

    #[tokio::test]
    async fn test_bypass_reads_remote_and_sees_out_of_band_edits() {
        let f = fixture().await;
        assert!(f.cache.save(&user(7, 3)).await);

        f.store.put_raw("UserCache", user(7, 10).to_row());
        assert_eq!(f.cache.load(7, false).await.map(|u| u.num_easy), Some(3));
        assert_eq!(f.cache.load(7, true).await.map(|u| u.num_easy), Some(10));
        // The bypass refreshed the local entry
        assert_eq!(f.cache.load(7, false).await.map(|u| u.num_easy), Some(10));
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let f = fixture().await;
        assert_eq!(f.cache.load(404, false).await, None);
        assert_eq!(f.cache.load(404, false).await, None);
        assert_eq!(f.store.get_calls(), 2);

        let metrics = f.cache.metrics();
        assert_eq!(metrics.remote_not_found, 2);
        assert_eq!(metrics.failures, 0);
    }

    #[tokio::test]
    async fn test_failed_save_changes_nothing() {
        let f = fixture().await;
        assert!(f.cache.save(&user(7, 3)).await);

        f.store.set_available(false);
        assert!(!f.cache.save(&user(7, 4)).await);
        assert_eq!(f.cache.load(7, false).await, Some(user(7, 3)));

        f.store.set_available(true);
        assert_eq!(f.cache.load(7, true).await, Some(user(7, 3)));
        assert_eq!(f.cache.metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_absence() {
        let f = fixture().await;
        f.store.set_available(false);

        assert_eq!(f.cache.load(7, false).await, None);
        let err = f.cache.try_load(7, false).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_row_is_a_data_error() {
        let f = fixture().await;
        f.store.put_raw(
            "UserCache",
            Row::keyed("UserCache", "7").with("currStreakStartDate", "someday"),
        );

        assert_eq!(f.cache.load(7, false).await, None);
        let err = f.cache.try_load(7, false).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Data);
        assert_eq!(f.cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_unbound_cache_degrades() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        let cache: EntityCache<UserStatsEntity> =
            EntityCache::new(EntityCacheConfig::default(), clock);

        assert!(!cache.is_connected());
        assert!(!cache.save(&user(1, 1)).await);
        assert_eq!(cache.load(1, false).await, None);
        assert_matches!(cache.try_save(&user(1, 1)).await, Err(Error::TableUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_cache_unbound() {
        let store = Arc::new(InMemoryTableService::new());
        store.set_available(false);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        let cache: EntityCache<ServerConfigEntity> =
            EntityCache::new(EntityCacheConfig::default(), clock);

        assert!(!cache.initialize(store.clone()).await);
        assert!(!cache.is_connected());

        store.set_available(true);
        assert!(cache.initialize(store.clone()).await);
        // Second binding finds the table already there
        assert!(cache.initialize(store.clone()).await);
        assert!(store.has_table("ChannelCache"));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_connection_string() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        let cache: EntityCache<UserStatsEntity> =
            EntityCache::new(EntityCacheConfig::default(), clock);
        assert!(!cache.connect("AccountName=only").await);
        assert!(!cache.is_connected());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let f = fixture().await;
        assert!(f.cache.save(&user(1, 1)).await);
        assert!(f.cache.save(&user(2, 2)).await);

        assert!(f.cache.invalidate(1));
        assert!(!f.cache.invalidate(1));
        assert_eq!(f.cache.local_len(), 1);

        assert_eq!(f.cache.clear_local(), 1);
        let gets = f.store.get_calls();
        assert_eq!(f.cache.load(2, false).await, Some(user(2, 2)));
        assert_eq!(f.store.get_calls(), gets + 1);
    }

    #[tokio::test]
    async fn test_concurrent_saves_across_rows() {
        let f = fixture().await;
        let cache = Arc::new(f.cache);

        let handles: Vec<_> = (0..32u64)
            .map(|id| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.save(&user(id, id as u32)).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(cache.local_len(), 32);
        assert_eq!(f.store.upsert_calls(), 32);
        assert_eq!(cache.load(17, false).await.map(|u| u.num_easy), Some(17));
    }

    #[tokio::test]
    async fn test_custom_ttl() {
        let store = Arc::new(InMemoryTableService::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        let cache: EntityCache<UserStatsEntity> =
            EntityCache::new(EntityCacheConfig::with_ttl(Duration::from_secs(30)), clock.clone());
        assert!(cache.initialize(store.clone()).await);
        assert!(cache.save(&user(1, 1)).await);

        clock.advance(chrono::Duration::seconds(31));
        let gets = store.get_calls();
        assert!(cache.load(1, false).await.is_some());
        assert_eq!(store.get_calls(), gets + 1);
    }
}
