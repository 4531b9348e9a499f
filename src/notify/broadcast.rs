//! Daily Broadcast
//!
//! Fetch the day's challenge once and hand it to every configured channel.
//! A failing guild is logged and skipped.

use crate::error::Result;
use crate::notify::channels::ChannelRegistry;
use crate::notify::{ChallengeSourceRef, NotifierRef};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub guilds: usize,
    pub delivered: usize,
    /// Guilds with no channel set
    pub unconfigured: usize,
    pub failed: usize,
}

/// Sends the daily challenge to every guild with a channel
pub struct DailyBroadcast {
    source: ChallengeSourceRef,
    notifier: NotifierRef,
    channels: Arc<ChannelRegistry>,
}

impl DailyBroadcast {
    pub fn new(
        source: ChallengeSourceRef,
        notifier: NotifierRef,
        channels: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            source,
            notifier,
            channels,
        }
    }

    /// Broadcast to `guild_ids`. Fails only when the challenge cannot be
    /// fetched.
    pub async fn run(&self, guild_ids: &[u64]) -> Result<BroadcastReport> {
        let challenge = self.source.fetch_daily().await?;
        let destinations = self.channels.destinations(guild_ids).await;

        let mut report = BroadcastReport {
            guilds: guild_ids.len(),
            unconfigured: guild_ids.len() - destinations.len(),
            ..Default::default()
        };

        for (guild_id, channel_id) in destinations {
            match self.notifier.deliver(guild_id, channel_id, &challenge).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(guild_id, channel_id, error = %e, "Failed to deliver daily challenge");
                }
            }
        }

        info!(
            title = %challenge.title,
            delivered = report.delivered,
            unconfigured = report.unconfigured,
            failed = report.failed,
            "Daily challenge broadcast"
        );
        Ok(report)
    }
}
