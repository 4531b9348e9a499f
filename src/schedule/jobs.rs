//! Standard daily jobs

use crate::error::{Error, Result};
use crate::notify::DailyBroadcast;
use crate::schedule::DailyJob;
use crate::stats::{StatsEngine, UserDirectoryRef};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Closes the release day for every known user
pub struct RolloverJob {
    engine: Arc<StatsEngine>,
    directory: UserDirectoryRef,
}

impl RolloverJob {
    pub fn new(engine: Arc<StatsEngine>, directory: UserDirectoryRef) -> Self {
        Self { engine, directory }
    }
}

#[async_trait]
impl DailyJob for RolloverJob {
    fn name(&self) -> &str {
        "daily-rollover"
    }

    async fn run(&self) -> Result<()> {
        let report = self.engine.rollover_known_users(self.directory.as_ref()).await;
        if !report.is_clean() {
            // Safe to re-run by hand, already rolled users are skipped
            warn!(failed = report.failed, "Rollover left users unprocessed");
        }
        Ok(())
    }
}

/// Sends the daily challenge to the configured guilds
pub struct BroadcastJob {
    broadcast: Arc<DailyBroadcast>,
    guilds: Vec<u64>,
}

impl BroadcastJob {
    pub fn new(broadcast: Arc<DailyBroadcast>, guilds: Vec<u64>) -> Self {
        Self { broadcast, guilds }
    }
}

#[async_trait]
impl DailyJob for BroadcastJob {
    fn name(&self) -> &str {
        "daily-broadcast"
    }

    async fn run(&self) -> Result<()> {
        self.broadcast
            .run(&self.guilds)
            .await
            .map(|_| ())
            .map_err(|e| Error::JobFailed {
                job: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}
