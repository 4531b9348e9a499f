//! Streak Statistics
//!
//! Completion bookkeeping and the daily rollover on top of the user stats
//! cache. All day arithmetic is relative to the [`ReleaseSchedule`].

pub mod engine;
pub mod release;

pub use engine::{
    CompletionOutcome, RolloverReport, StatsEngine, StatsEngineConfig, UserSummary,
};
pub use release::{ReleaseSchedule, ReleaseWindow};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// UserDirectory Trait (Port)
// =============================================================================

/// Enumerates the users the daily rollover has to visit
///
/// The same user may be reachable through several guilds; implementations
/// may return duplicates.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn known_users(&self) -> Vec<u64>;
}

/// Type alias for Arc'd UserDirectory
pub type UserDirectoryRef = Arc<dyn UserDirectory>;

/// Fixed user list, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: BTreeSet<u64>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = u64>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn known_users(&self) -> Vec<u64> {
        self.users.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_dedupes() {
        let directory = StaticUserDirectory::new([3, 1, 3, 2]);
        assert_eq!(directory.len(), 3);
        assert_eq!(directory.known_users().await, vec![1, 2, 3]);
    }
}
