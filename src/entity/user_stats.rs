//! Per-user completion statistics

use crate::entity::{Entity, Row, ROW_KEY_COLUMN};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

const NUM_EASY_COLUMN: &str = "numEasy";
const NUM_MEDIUM_COLUMN: &str = "numMedium";
const NUM_HARD_COLUMN: &str = "numHard";
const LONGEST_STREAK_COLUMN: &str = "longestStreak";
const STREAK_START_COLUMN: &str = "currStreakStartDate";
const COMPLETED_TODAY_COLUMN: &str = "completedToday";
const LAST_ROLLOVER_COLUMN: &str = "lastRolloverDate";

/// Marker stored in place of an unset streak start
const NO_STREAK: &str = "None";

// =============================================================================
// Difficulty
// =============================================================================

/// Challenge difficulty category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Parse a difficulty label. Anything unrecognized counts as hard.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "medium" => Difficulty::Medium,
            _ => Difficulty::Hard,
        }
    }
}

impl From<&str> for Difficulty {
    fn from(label: &str) -> Self {
        Self::from_label(label)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

// =============================================================================
// User Stats Entity
// =============================================================================

/// Solved counts and streak bookkeeping for one user
///
/// `completed_today` implies `curr_streak_start_date` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatsEntity {
    pub user_id: u64,
    pub num_easy: u32,
    pub num_medium: u32,
    pub num_hard: u32,
    pub longest_streak: u32,
    /// Release date of the first day of the active streak
    pub curr_streak_start_date: Option<NaiveDate>,
    pub completed_today: bool,
    /// Release date of the last rollover applied to this user
    pub last_rollover_date: Option<NaiveDate>,
}

impl UserStatsEntity {
    /// Fresh user with no history
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            num_easy: 0,
            num_medium: 0,
            num_hard: 0,
            longest_streak: 0,
            curr_streak_start_date: None,
            completed_today: false,
            last_rollover_date: None,
        }
    }

    /// Total challenges solved
    pub fn total_solved(&self) -> u64 {
        u64::from(self.num_easy) + u64::from(self.num_medium) + u64::from(self.num_hard)
    }

    /// Count one solved challenge
    pub fn record_solved(&mut self, difficulty: Difficulty) {
        let counter = match difficulty {
            Difficulty::Easy => &mut self.num_easy,
            Difficulty::Medium => &mut self.num_medium,
            Difficulty::Hard => &mut self.num_hard,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn has_active_streak(&self) -> bool {
        self.curr_streak_start_date.is_some()
    }

    /// Length of the active streak as of the release on `latest_release_date`.
    ///
    /// Today only counts once it has been completed; until the next rollover
    /// an uncompleted today is a grace period, not a break.
    pub fn current_streak(&self, latest_release_date: NaiveDate) -> u32 {
        let Some(start) = self.curr_streak_start_date else {
            return 0;
        };

        let today_bonus = if self.completed_today { 0 } else { -1 };
        let days = (latest_release_date - start).num_days() + 1 + today_bonus;
        u32::try_from(days.max(0)).unwrap_or(u32::MAX)
    }

    /// Whether the rollover for `release_date` was already applied
    pub fn rolled_over_for(&self, release_date: NaiveDate) -> bool {
        self.last_rollover_date
            .map_or(false, |last| last >= release_date)
    }

    /// Raise the longest streak to `streak` if it is a new maximum
    pub fn raise_longest_streak(&mut self, streak: u32) -> bool {
        if streak > self.longest_streak {
            self.longest_streak = streak;
            true
        } else {
            false
        }
    }
}

fn parse_date_column(row: &Row, column: &str, raw: &str) -> Result<Option<NaiveDate>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NO_STREAK {
        return Ok(None);
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }

    // Older rows stored the full datetime
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.date_naive()));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Some(dt.date()));
    }

    Err(row.malformed(format!("{} = {:?} is not a date", column, raw)))
}

impl Entity for UserStatsEntity {
    const PARTITION_KEY: &'static str = "UserCache";

    type Id = u64;

    fn id(&self) -> u64 {
        self.user_id
    }

    fn to_row(&self) -> Row {
        let streak_start = self
            .curr_streak_start_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| NO_STREAK.to_string());

        let mut row = Row::keyed(Self::PARTITION_KEY, &self.row_key())
            .with(NUM_EASY_COLUMN, self.num_easy)
            .with(NUM_MEDIUM_COLUMN, self.num_medium)
            .with(NUM_HARD_COLUMN, self.num_hard)
            .with(LONGEST_STREAK_COLUMN, self.longest_streak)
            .with(STREAK_START_COLUMN, streak_start)
            .with(COMPLETED_TODAY_COLUMN, self.completed_today);

        if let Some(last) = self.last_rollover_date {
            row.insert(LAST_ROLLOVER_COLUMN, last.format("%Y-%m-%d").to_string());
        }
        row
    }

    fn from_row(row: &Row) -> Result<Self> {
        let user_id = row
            .read_u64(ROW_KEY_COLUMN)?
            .ok_or_else(|| row.malformed("missing RowKey"))?;

        let curr_streak_start_date = match row.read_str(STREAK_START_COLUMN) {
            Some(raw) => parse_date_column(row, STREAK_START_COLUMN, raw)?,
            None => None,
        };
        let last_rollover_date = match row.read_str(LAST_ROLLOVER_COLUMN) {
            Some(raw) => parse_date_column(row, LAST_ROLLOVER_COLUMN, raw)?,
            None => None,
        };

        Ok(Self {
            user_id,
            num_easy: row.read_u32(NUM_EASY_COLUMN)?.unwrap_or(0),
            num_medium: row.read_u32(NUM_MEDIUM_COLUMN)?.unwrap_or(0),
            num_hard: row.read_u32(NUM_HARD_COLUMN)?.unwrap_or(0),
            longest_streak: row.read_u32(LONGEST_STREAK_COLUMN)?.unwrap_or(0),
            curr_streak_start_date,
            completed_today: row.read_bool(COMPLETED_TODAY_COLUMN)?.unwrap_or(false),
            last_rollover_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn active_user() -> UserStatsEntity {
        UserStatsEntity {
            user_id: 1181234567890,
            num_easy: 4,
            num_medium: 9,
            num_hard: 2,
            longest_streak: 11,
            curr_streak_start_date: Some(date(2024, 1, 2)),
            completed_today: true,
            last_rollover_date: Some(date(2024, 1, 1)),
        }
    }

    #[test]
    fn test_round_trip_active_streak() {
        let user = active_user();
        let row = user.to_row();
        assert_eq!(row.read_str("currStreakStartDate"), Some("2024-01-02"));
        assert_eq!(row.read_str("lastRolloverDate"), Some("2024-01-01"));
        assert_eq!(UserStatsEntity::from_row(&row).unwrap(), user);
    }

    #[test]
    fn test_round_trip_unset_streak() {
        let user = UserStatsEntity::new(99);
        let row = user.to_row();
        assert_eq!(row.read_str("currStreakStartDate"), Some("None"));
        assert!(row.get("lastRolloverDate").is_none());
        assert_eq!(UserStatsEntity::from_row(&row).unwrap(), user);
    }

    #[test]
    fn test_sparse_row_defaults() {
        let row = Row::keyed("UserCache", "12").with("numHard", 3u32);
        let user = UserStatsEntity::from_row(&row).unwrap();
        assert_eq!(user.num_hard, 3);
        assert_eq!(user.num_easy, 0);
        assert_eq!(user.curr_streak_start_date, None);
        assert!(!user.completed_today);
    }

    #[test]
    fn test_reads_legacy_datetime_start() {
        let row = Row::keyed("UserCache", "12")
            .with("currStreakStartDate", "2024-01-02T11:00:00+00:00")
            .with("completedToday", true);
        let user = UserStatsEntity::from_row(&row).unwrap();
        assert_eq!(user.curr_streak_start_date, Some(date(2024, 1, 2)));

        let row = Row::keyed("UserCache", "12").with("currStreakStartDate", "2024-01-05T00:00:00");
        let user = UserStatsEntity::from_row(&row).unwrap();
        assert_eq!(user.curr_streak_start_date, Some(date(2024, 1, 5)));
    }

    #[test]
    fn test_bad_date_is_a_data_error() {
        let row = Row::keyed("UserCache", "12").with("currStreakStartDate", "yesterday");
        let err = UserStatsEntity::from_row(&row).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Data);
    }

    #[test]
    fn test_difficulty_fallback_is_hard() {
        assert_eq!(Difficulty::from_label("Easy"), Difficulty::Easy);
        assert_eq!(Difficulty::from_label(" MEDIUM "), Difficulty::Medium);
        assert_eq!(Difficulty::from_label("hard"), Difficulty::Hard);
        assert_eq!(Difficulty::from_label("nightmare"), Difficulty::Hard);
        assert_eq!(Difficulty::from_label(""), Difficulty::Hard);
    }

    #[test]
    fn test_record_solved() {
        let mut user = UserStatsEntity::new(1);
        user.record_solved(Difficulty::Easy);
        user.record_solved(Difficulty::Hard);
        user.record_solved(Difficulty::Hard);
        assert_eq!((user.num_easy, user.num_medium, user.num_hard), (1, 0, 2));
        assert_eq!(user.total_solved(), 3);
    }

    #[test]
    fn test_current_streak() {
        let mut user = UserStatsEntity::new(1);
        assert_eq!(user.current_streak(date(2024, 1, 3)), 0);

        // Started two releases ago, today already done
        user.curr_streak_start_date = Some(date(2024, 1, 1));
        user.completed_today = true;
        assert_eq!(user.current_streak(date(2024, 1, 2)), 2);

        // Same streak, today still pending: grace period, today not counted
        user.completed_today = false;
        assert_eq!(user.current_streak(date(2024, 1, 2)), 1);

        // Opened today but not completed never goes negative
        user.curr_streak_start_date = Some(date(2024, 1, 3));
        assert_eq!(user.current_streak(date(2024, 1, 3)), 0);
    }

    #[test]
    fn test_raise_longest_streak_never_lowers() {
        let mut user = UserStatsEntity::new(1);
        assert!(user.raise_longest_streak(3));
        assert!(!user.raise_longest_streak(2));
        assert_eq!(user.longest_streak, 3);
    }

    #[test]
    fn test_rolled_over_for() {
        let mut user = UserStatsEntity::new(1);
        assert!(!user.rolled_over_for(date(2024, 1, 2)));

        user.last_rollover_date = Some(date(2024, 1, 2));
        assert!(user.rolled_over_for(date(2024, 1, 2)));
        assert!(user.rolled_over_for(date(2024, 1, 1)));
        assert!(!user.rolled_over_for(date(2024, 1, 3)));
    }
}
