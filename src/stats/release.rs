//! Daily Release Boundary
//!
//! One challenge is released per day at a fixed UTC time of day. A "day" for
//! streak purposes runs from one release up to, but excluding, the next.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::fmt;

/// Default release time of day (UTC)
pub const DEFAULT_RELEASE_HOUR: u32 = 11;
pub const DEFAULT_RELEASE_MINUTE: u32 = 0;

// =============================================================================
// Release Window
// =============================================================================

/// Half-open interval `[start, end)` between two consecutive releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReleaseWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Calendar date the window's release belongs to
    pub fn release_date(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

impl fmt::Display for ReleaseWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// =============================================================================
// Release Schedule
// =============================================================================

/// Fixed daily release time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseSchedule {
    /// Time of day (UTC) the daily challenge goes live
    pub time: NaiveTime,
}

impl Default for ReleaseSchedule {
    fn default() -> Self {
        Self {
            time: NaiveTime::MIN
                + Duration::hours(i64::from(DEFAULT_RELEASE_HOUR))
                + Duration::minutes(i64::from(DEFAULT_RELEASE_MINUTE)),
        }
    }
}

impl ReleaseSchedule {
    /// Release at `hour:minute` UTC. `None` for an invalid time of day.
    pub fn at(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { time })
    }

    /// Most recent release instant at or before `now`
    pub fn latest_release(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.time).and_utc();
        if now >= today {
            today
        } else {
            today - Duration::days(1)
        }
    }

    /// First release instant strictly after `now`
    pub fn next_release(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.latest_release(now) + Duration::days(1)
    }

    /// Release window `now` falls in
    pub fn window(&self, now: DateTime<Utc>) -> ReleaseWindow {
        let start = self.latest_release(now);
        ReleaseWindow {
            start,
            end: start + Duration::days(1),
        }
    }

    /// Whether `now` is within `lead` of the next release, i.e. the current
    /// release day is about to close
    pub fn is_closing(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        now >= self.next_release(now) - lead
    }

    /// Time of day `lead` before the release, wrapping past midnight
    pub fn time_before(&self, lead: Duration) -> NaiveTime {
        self.time - lead
    }
}

impl fmt::Display for ReleaseSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} UTC", self.time.format("%H:%M"))
    }
}
