//! Entity Caching
//!
//! A process-local, time-expiring layer in front of remote table storage,
//! one instance per entity kind.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     EntityCache<E: Entity>                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────┐      ┌─────────────────────────┐  │
//! │  │      Local layer        │ miss │     TableService        │  │
//! │  │  DashMap<row key,       │ ───▶ │  (Azure / in-memory)    │  │
//! │  │    CacheEntry<E>>       │ ◀─── │  source of truth        │  │
//! │  │  expires at now + TTL   │ fill │                         │  │
//! │  └─────────────────────────┘      └─────────────────────────┘  │
//! │                                                               │
//! │  save: remote upsert-merge first, local refresh on success    │
//! │  load: local check unless bypassed, remote lookup on miss     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use daily_streak_bot::cache::{EntityCache, EntityCacheConfig};
//! use daily_streak_bot::clock::SystemClock;
//! use daily_streak_bot::entity::UserStatsEntity;
//!
//! let cache: EntityCache<UserStatsEntity> =
//!     EntityCache::new(EntityCacheConfig::default(), SystemClock::shared());
//! cache.connect(&connection_string).await;
//!
//! if let Some(stats) = cache.load(user_id, false).await {
//!     println!("{} solved", stats.total_solved());
//! }
//! ```

pub mod entity_cache;
pub mod entry;
pub mod metrics;

pub use entity_cache::{EntityCache, EntityCacheConfig, DEFAULT_TTL};
pub use entry::CacheEntry;
pub use metrics::{CacheMetricsSnapshot, EntityCacheMetrics};
