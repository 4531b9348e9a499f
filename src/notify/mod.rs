//! Daily Challenge Notification
//!
//! Which guild channel receives the daily challenge, and handing the challenge
//! to the delivery side. Fetching the challenge and sending messages are ports;
//! this crate ships only a static source and a logging notifier.

pub mod broadcast;
pub mod channels;

pub use broadcast::{BroadcastReport, DailyBroadcast};
pub use channels::ChannelRegistry;

use crate::entity::Difficulty;
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Daily Challenge
// =============================================================================

/// The challenge released for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyChallenge {
    pub date: NaiveDate,
    pub title: String,
    /// Absolute URL of the problem
    pub link: String,
    pub difficulty: Difficulty,
    /// Acceptance rate in percent
    pub acceptance_rate: f64,
}

impl DailyChallenge {
    /// One-line announcement text
    pub fn headline(&self) -> String {
        format!(
            "Daily challenge for {}: {} ({}, {:.2}% acceptance) {}",
            self.date.format("%m-%d-%Y"),
            self.title,
            self.difficulty,
            self.acceptance_rate,
            self.link
        )
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Supplies the current daily challenge
#[async_trait]
pub trait ChallengeSource: Send + Sync {
    async fn fetch_daily(&self) -> Result<DailyChallenge>;
}

/// Type alias for Arc'd ChallengeSource
pub type ChallengeSourceRef = Arc<dyn ChallengeSource>;

/// Delivers the challenge to one channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        guild_id: u64,
        channel_id: u64,
        challenge: &DailyChallenge,
    ) -> Result<()>;
}

/// Type alias for Arc'd Notifier
pub type NotifierRef = Arc<dyn Notifier>;

// =============================================================================
// Built-in Adapters
// =============================================================================

/// Always returns the same challenge
#[derive(Debug, Clone)]
pub struct StaticChallengeSource {
    challenge: DailyChallenge,
}

impl StaticChallengeSource {
    pub fn new(challenge: DailyChallenge) -> Self {
        Self { challenge }
    }
}

#[async_trait]
impl ChallengeSource for StaticChallengeSource {
    async fn fetch_daily(&self) -> Result<DailyChallenge> {
        Ok(self.challenge.clone())
    }
}

/// Writes each delivery to the log instead of a chat channel
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn deliver(
        &self,
        guild_id: u64,
        channel_id: u64,
        challenge: &DailyChallenge,
    ) -> Result<()> {
        info!(guild_id, channel_id, headline = %challenge.headline(), "Daily challenge delivered");
        Ok(())
    }
}
