//! Daily Job Scheduler
//!
//! Runs each registered job once a day at a fixed UTC time of day, one task
//! per job. Runs missed while the process was down are not replayed.

pub mod jobs;

pub use jobs::{BroadcastJob, RolloverJob};

use crate::clock::ClockRef;
use crate::error::Result;
use crate::stats::ReleaseSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default lead of the rollover ahead of the release
pub const DEFAULT_ROLLOVER_LEAD: std::time::Duration = std::time::Duration::from_secs(2 * 60);

// =============================================================================
// DailyJob Trait
// =============================================================================

/// Work performed once per day
#[async_trait]
pub trait DailyJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// Type alias for Arc'd DailyJob
pub type DailyJobRef = Arc<dyn DailyJob>;

// =============================================================================
// Configuration
// =============================================================================

/// When the standard jobs fire
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub release: ReleaseSchedule,
    /// Rollover runs this long before the release
    pub rollover_lead: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            release: ReleaseSchedule::default(),
            rollover_lead: DEFAULT_ROLLOVER_LEAD,
        }
    }
}

impl SchedulerConfig {
    /// Time of day the rollover fires
    pub fn rollover_time(&self) -> NaiveTime {
        let lead = Duration::from_std(self.rollover_lead).unwrap_or_else(|_| Duration::minutes(2));
        self.release.time_before(lead)
    }

    /// Time of day the broadcast fires
    pub fn broadcast_time(&self) -> NaiveTime {
        self.release.time
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct ScheduledJob {
    at: NaiveTime,
    job: DailyJobRef,
}

/// First instant strictly after `after` whose time of day is `at`
pub fn next_occurrence(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive().and_time(at).and_utc();
    if today > after {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Fires registered jobs once a day
pub struct DailyScheduler {
    clock: ClockRef,
    jobs: Vec<ScheduledJob>,
}

impl DailyScheduler {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
        }
    }

    /// Register `job` to run every day at `at` (UTC)
    pub fn add(&mut self, at: NaiveTime, job: DailyJobRef) -> &mut Self {
        info!(job = job.name(), at = %at.format("%H:%M:%S"), "Daily job registered");
        self.jobs.push(ScheduledJob { at, job });
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Spawn one task per job. Tasks end when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|scheduled| {
                let clock = self.clock.clone();
                let cancel = cancel.clone();
                tokio::spawn(run_daily(scheduled, clock, cancel))
            })
            .collect()
    }
}

async fn run_daily(scheduled: ScheduledJob, clock: ClockRef, cancel: CancellationToken) {
    let name = scheduled.job.name().to_string();
    let mut last_target: Option<DateTime<Utc>> = None;

    loop {
        let now = clock.now();
        // Never fire twice for the same target if the timer wakes early
        let after = last_target.map_or(now, |last| last.max(now));
        let target = next_occurrence(after, scheduled.at);
        let wait = (target - now).to_std().unwrap_or_default();

        debug!(
            job = %name,
            next_run = %target.to_rfc3339(),
            wait_secs = wait.as_secs(),
            "Sleeping until next run"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(job = %name, "Daily job stopping");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                last_target = Some(target);
                match scheduled.job.run().await {
                    Ok(()) => info!(job = %name, "Daily job finished"),
                    Err(e) => error!(job = %name, error = %e, "Daily job failed"),
                }
            }
        }
    }
}
