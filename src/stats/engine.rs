//! Stats Engine
//!
//! Read-modify-write of user stats through the entity cache. There is no
//! per-user lock: two completions for the same user racing inside one window
//! can both see `completed_today == false` and both be recorded.

use crate::cache::EntityCache;
use crate::clock::ClockRef;
use crate::entity::{Difficulty, UserStatsEntity};
use crate::stats::release::{ReleaseSchedule, ReleaseWindow};
use crate::stats::UserDirectory;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stats engine
#[derive(Debug, Clone)]
pub struct StatsEngineConfig {
    /// Users processed concurrently during rollover
    pub rollover_concurrency: usize,
}

impl Default for StatsEngineConfig {
    fn default() -> Self {
        Self {
            rollover_concurrency: 16,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of logging one completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Counted and marked complete for today
    Recorded {
        difficulty: Difficulty,
        /// This completion opened a new streak
        streak_started: bool,
        current_streak: u32,
        longest_streak: u32,
    },
    /// Today was already completed; nothing written
    AlreadyCompleted,
    /// Timestamp outside the current release window; nothing written
    OutsideWindow { window: ReleaseWindow },
    /// The store could not be read or written; nothing changed
    StoreFailed,
}

impl CompletionOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, CompletionOutcome::Recorded { .. })
    }
}

/// Per-user result inside a rollover batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RolloverStep {
    Continued,
    Broken,
    AlreadyApplied,
    Unknown,
    Failed,
}

/// Summary of one rollover pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    /// Release date the pass closed
    pub release_date: Option<NaiveDate>,
    /// Distinct users visited
    pub users: usize,
    /// Completed today, streak kept
    pub continued: usize,
    /// Not completed today, streak cleared
    pub broken: usize,
    /// Already rolled over for this release
    pub already_applied: usize,
    /// No stored stats
    pub unknown: usize,
    /// Load or save failed
    pub failed: usize,
    pub duration_ms: u64,
}

impl RolloverReport {
    fn record(&mut self, step: RolloverStep) {
        match step {
            RolloverStep::Continued => self.continued += 1,
            RolloverStep::Broken => self.broken += 1,
            RolloverStep::AlreadyApplied => self.already_applied += 1,
            RolloverStep::Unknown => self.unknown += 1,
            RolloverStep::Failed => self.failed += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Display snapshot of one user's stats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub user_id: u64,
    pub num_easy: u32,
    pub num_medium: u32,
    pub num_hard: u32,
    pub total_solved: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub completed_today: bool,
    pub streak_start: Option<NaiveDate>,
}

// =============================================================================
// Stats Engine
// =============================================================================

/// Completion logging and daily rollover
pub struct StatsEngine {
    users: Arc<EntityCache<UserStatsEntity>>,
    clock: ClockRef,
    schedule: ReleaseSchedule,
    config: StatsEngineConfig,
}

impl StatsEngine {
    pub fn new(
        users: Arc<EntityCache<UserStatsEntity>>,
        clock: ClockRef,
        schedule: ReleaseSchedule,
        config: StatsEngineConfig,
    ) -> Self {
        Self {
            users,
            clock,
            schedule,
            config,
        }
    }

    pub fn schedule(&self) -> ReleaseSchedule {
        self.schedule
    }

    pub fn users(&self) -> &Arc<EntityCache<UserStatsEntity>> {
        &self.users
    }

    /// Load a user's stats, a fresh record when there are none.
    /// `None` when the store failed.
    async fn load_or_fresh(&self, user_id: u64) -> Option<UserStatsEntity> {
        match self.users.try_load(user_id, false).await {
            Ok(Some(stats)) => Some(stats),
            Ok(None) => Some(UserStatsEntity::new(user_id)),
            Err(e) => {
                warn!(user_id, error = %e, "Cannot load user stats");
                None
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Record that `user_id` solved today's challenge at `completed_at`.
    ///
    /// Duplicate events for the same day are ignored. Counters and streak
    /// only change when `completed_at` falls in the current release window.
    pub async fn log_completion(
        &self,
        user_id: u64,
        completed_at: DateTime<Utc>,
        difficulty: Difficulty,
    ) -> CompletionOutcome {
        let Some(mut stats) = self.load_or_fresh(user_id).await else {
            return CompletionOutcome::StoreFailed;
        };

        if stats.completed_today {
            debug!(user_id, "Completion already recorded for today");
            return CompletionOutcome::AlreadyCompleted;
        }

        let window = self.schedule.window(self.clock.now());
        if !window.contains(completed_at) {
            info!(
                user_id,
                completed_at = %completed_at.to_rfc3339(),
                window = %window,
                "Completion outside the current release window, ignored"
            );
            return CompletionOutcome::OutsideWindow { window };
        }

        let release_date = window.release_date();
        stats.record_solved(difficulty);

        // Today is credited by the rollover, not here
        let streak_before_today = stats.current_streak(release_date);
        let streak_started = !stats.has_active_streak();
        if streak_started {
            stats.curr_streak_start_date = Some(release_date);
        }
        stats.completed_today = true;
        stats.raise_longest_streak(streak_before_today);

        if !self.users.save(&stats).await {
            return CompletionOutcome::StoreFailed;
        }

        let current_streak = stats.current_streak(release_date);
        info!(
            user_id,
            %difficulty,
            current_streak,
            longest_streak = stats.longest_streak,
            streak_started,
            "Completion recorded"
        );

        CompletionOutcome::Recorded {
            difficulty,
            streak_started,
            current_streak,
            longest_streak: stats.longest_streak,
        }
    }

    // =========================================================================
    // Rollover
    // =========================================================================

    /// Close the current release day for every listed user.
    ///
    /// Users without completion lose their streak; the rest get their
    /// longest streak raised. Failures are isolated per user. Running it
    /// again for the same release changes nothing.
    ///
    /// Closes the day of the latest release, so callers must only run it
    /// shortly before the next release (see [`ReleaseSchedule::is_closing`]).
    /// Run mid-day, it resets today's completions and the scheduled run
    /// then skips every user.
    pub async fn daily_rollover(&self, user_ids: &[u64]) -> RolloverReport {
        let started = Instant::now();
        let release_date = self.schedule.latest_release(self.clock.now()).date_naive();

        let mut ids = user_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut report = RolloverReport {
            release_date: Some(release_date),
            users: ids.len(),
            ..Default::default()
        };

        let steps: Vec<RolloverStep> = stream::iter(ids)
            .map(|user_id| self.rollover_user(user_id, release_date))
            .buffer_unordered(self.config.rollover_concurrency.max(1))
            .collect()
            .await;

        for step in steps {
            report.record(step);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.is_clean() {
            info!(
                %release_date,
                users = report.users,
                continued = report.continued,
                broken = report.broken,
                "Daily rollover complete"
            );
        } else {
            warn!(
                %release_date,
                users = report.users,
                failed = report.failed,
                "Daily rollover complete with failures"
            );
        }
        report
    }

    /// Roll over everyone the directory knows about
    pub async fn rollover_known_users(&self, directory: &dyn UserDirectory) -> RolloverReport {
        let users = directory.known_users().await;
        self.daily_rollover(&users).await
    }

    async fn rollover_user(&self, user_id: u64, release_date: NaiveDate) -> RolloverStep {
        let mut stats = match self.users.try_load(user_id, false).await {
            Ok(Some(stats)) => stats,
            Ok(None) => return RolloverStep::Unknown,
            Err(e) => {
                warn!(user_id, error = %e, "Rollover skipped user, load failed");
                return RolloverStep::Failed;
            }
        };

        if stats.rolled_over_for(release_date) {
            return RolloverStep::AlreadyApplied;
        }

        let step = if stats.completed_today {
            let streak = stats.current_streak(release_date);
            stats.raise_longest_streak(streak);
            RolloverStep::Continued
        } else {
            if stats.has_active_streak() {
                debug!(user_id, "Streak broken");
            }
            stats.curr_streak_start_date = None;
            RolloverStep::Broken
        };
        stats.completed_today = false;
        stats.last_rollover_date = Some(release_date);

        if self.users.save(&stats).await {
            step
        } else {
            RolloverStep::Failed
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Display snapshot; `None` for users with no stored stats
    pub async fn user_summary(&self, user_id: u64) -> Option<UserSummary> {
        let stats = self.users.load(user_id, false).await?;
        let release_date = self.schedule.latest_release(self.clock.now()).date_naive();

        Some(UserSummary {
            user_id,
            num_easy: stats.num_easy,
            num_medium: stats.num_medium,
            num_hard: stats.num_hard,
            total_solved: stats.total_solved(),
            current_streak: stats.current_streak(release_date),
            longest_streak: stats.longest_streak,
            completed_today: stats.completed_today,
            streak_start: stats.curr_streak_start_date,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
