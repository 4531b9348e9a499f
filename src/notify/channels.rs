//! Guild channel registry

use crate::cache::EntityCache;
use crate::entity::ServerConfigEntity;
use std::sync::Arc;
use tracing::{debug, info};

/// Guild to notification channel mapping
pub struct ChannelRegistry {
    servers: Arc<EntityCache<ServerConfigEntity>>,
}

impl ChannelRegistry {
    pub fn new(servers: Arc<EntityCache<ServerConfigEntity>>) -> Self {
        Self { servers }
    }

    pub fn cache(&self) -> &Arc<EntityCache<ServerConfigEntity>> {
        &self.servers
    }

    /// Point `guild_id` at `channel_id`. Returns whether it was persisted.
    pub async fn set_channel(&self, guild_id: u64, channel_id: u64) -> bool {
        let saved = self
            .servers
            .save(&ServerConfigEntity::with_channel(guild_id, channel_id))
            .await;
        if saved {
            info!(guild_id, channel_id, "Notification channel set");
        }
        saved
    }

    /// Stored config, or an unconfigured one when there is none
    pub async fn config_for(&self, guild_id: u64) -> ServerConfigEntity {
        self.servers
            .load(guild_id, false)
            .await
            .unwrap_or_else(|| ServerConfigEntity::new(guild_id))
    }

    /// Configured channel, 0 when unset or unknown
    pub async fn channel_for(&self, guild_id: u64) -> u64 {
        self.config_for(guild_id).await.channel_id
    }

    /// `(guild, channel)` pairs for every listed guild that has a channel
    pub async fn destinations(&self, guild_ids: &[u64]) -> Vec<(u64, u64)> {
        let mut destinations = Vec::with_capacity(guild_ids.len());
        for &guild_id in guild_ids {
            match self.channel_for(guild_id).await {
                0 => debug!(guild_id, "No channel configured"),
                channel_id => destinations.push((guild_id, channel_id)),
            }
        }
        destinations
    }
}
