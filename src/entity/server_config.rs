//! Guild notification channel mapping

use crate::entity::{Entity, Row};
use crate::error::Result;

const CHANNEL_ID_COLUMN: &str = "ChannelId";

/// Which channel of a guild receives the daily challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerConfigEntity {
    pub guild_id: u64,
    /// 0 when no channel has been configured
    pub channel_id: u64,
}

impl ServerConfigEntity {
    /// Unconfigured guild
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            channel_id: 0,
        }
    }

    pub fn with_channel(guild_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            channel_id,
        }
    }

    pub fn has_channel(&self) -> bool {
        self.channel_id > 0
    }
}

impl Entity for ServerConfigEntity {
    const PARTITION_KEY: &'static str = "ChannelCache";

    type Id = u64;

    fn id(&self) -> u64 {
        self.guild_id
    }

    fn to_row(&self) -> Row {
        // Snowflakes exceed the table service's Int32 inference, keep them as strings
        Row::keyed(Self::PARTITION_KEY, &self.row_key())
            .with(CHANNEL_ID_COLUMN, self.channel_id.to_string())
    }

    fn from_row(row: &Row) -> Result<Self> {
        let guild_id = row
            .read_u64(crate::entity::ROW_KEY_COLUMN)?
            .ok_or_else(|| row.malformed("missing RowKey"))?;
        let channel_id = row.read_u64(CHANNEL_ID_COLUMN)?.unwrap_or(0);
        Ok(Self {
            guild_id,
            channel_id,
        })
    }
}
