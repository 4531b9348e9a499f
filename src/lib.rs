//! Daily Streak Bot - Core
//!
//! Once a day a challenge is released and broadcast to every guild that has a
//! notification channel; users who solve it build up per-difficulty counts
//! and daily streaks. Everything is persisted in table storage behind a
//! process-local TTL cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           DailyScheduler                             │
//! │        rollover @ release - 2 min          broadcast @ release       │
//! ├───────────────────────────────┬──────────────────────────────────────┤
//! │          StatsEngine          │           DailyBroadcast             │
//! │  log_completion / rollover    │   ChallengeSource -> Notifier        │
//! │        ReleaseSchedule        │          ChannelRegistry             │
//! ├───────────────────────────────┴──────────────────────────────────────┤
//! │   EntityCache<UserStatsEntity>        EntityCache<ServerConfigEntity>│
//! │          (DashMap + TTL)                     (DashMap + TTL)         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 TableService (Azure Tables / in-memory)              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Entity cache over table storage
//! - [`entity`]: Table entities and row conversion
//! - [`table`]: Table storage backends
//! - [`stats`]: Streak statistics and the release schedule
//! - [`notify`]: Channel registry and daily broadcast
//! - [`schedule`]: Once-a-day job scheduler
//! - [`error`]: Error types and handling

pub mod cache;
pub mod clock;
pub mod entity;
pub mod error;
pub mod notify;
pub mod schedule;
pub mod stats;
pub mod table;

// Re-export commonly used types
pub use cache::{CacheMetricsSnapshot, EntityCache, EntityCacheConfig};

pub use clock::{Clock, ClockRef, ManualClock, SystemClock};

pub use entity::{Difficulty, Entity, Row, RowValue, ServerConfigEntity, UserStatsEntity};

pub use error::{Error, ErrorClass, Result};

pub use notify::{
    BroadcastReport, ChallengeSource, ChannelRegistry, DailyBroadcast, DailyChallenge,
    LoggingNotifier, Notifier, StaticChallengeSource,
};

pub use schedule::{
    BroadcastJob, DailyJob, DailyScheduler, RolloverJob, SchedulerConfig, DEFAULT_ROLLOVER_LEAD,
};

pub use stats::{
    CompletionOutcome, ReleaseSchedule, ReleaseWindow, RolloverReport, StaticUserDirectory,
    StatsEngine, StatsEngineConfig, UserDirectory, UserSummary,
};

pub use table::{AzureTableService, InMemoryTableService, TableService, TableServiceRef};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
