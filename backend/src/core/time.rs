//! Time management for the simulation
//!
//! The simulation operates in discrete episodes. Each episode is one dated
//! dismissal event; consecutive episodes are a fixed number of days apart.
//! This module provides deterministic date advancement plus the minute-of-day
//! arithmetic used by the risk model and the schedule.

use chrono::{Days, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Maps episode indices to calendar dates
///
/// Episode `i` falls on `start + i × interval_days`. The calendar holds no
/// cursor of its own, so any episode date can be recomputed from the index
/// alone (which is what makes a run restartable from a checkpoint).
///
/// # Example
/// ```
/// use chrono::NaiveDate;
/// use dismissal_coordinator_core::EpisodeCalendar;
///
/// let start = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
/// let calendar = EpisodeCalendar::new(start, 7);
/// assert_eq!(calendar.date_of(0), start);
/// assert_eq!(calendar.date_of(2), NaiveDate::from_ymd_opt(2024, 9, 16).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeCalendar {
    /// Date of episode 0
    start: NaiveDate,
    /// Days between consecutive episodes
    interval_days: u32,
}

impl EpisodeCalendar {
    /// Create a new calendar
    ///
    /// # Panics
    /// Panics if `interval_days` is zero. Scenario validation rejects that
    /// before a calendar is ever built.
    pub fn new(start: NaiveDate, interval_days: u32) -> Self {
        assert!(interval_days > 0, "interval_days must be positive");
        Self {
            start,
            interval_days,
        }
    }

    /// Date of episode `index` (0-indexed)
    pub fn date_of(&self, index: usize) -> NaiveDate {
        let offset = u64::from(self.interval_days) * index as u64;
        self.start
            .checked_add_days(Days::new(offset))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Date one interval after `date`
    ///
    /// Used for commitment due dates and for carrying debts forward.
    ///
    /// # Example
    /// ```
    /// use chrono::NaiveDate;
    /// use dismissal_coordinator_core::EpisodeCalendar;
    ///
    /// let start = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
    /// let calendar = EpisodeCalendar::new(start, 7);
    /// assert_eq!(calendar.next_after(start), NaiveDate::from_ymd_opt(2024, 9, 9).unwrap());
    /// ```
    pub fn next_after(&self, date: NaiveDate) -> NaiveDate {
        date.checked_add_days(Days::new(u64::from(self.interval_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Date of episode 0
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Days between episodes
    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }
}

pub const MINUTES_PER_DAY: i32 = 24 * 60;

/// Minutes since midnight for a dismissal time
pub fn minute_of_day(time: NaiveTime) -> i32 {
    (time.num_seconds_from_midnight() / 60) as i32
}

/// Dismissal time for a minute-of-day value
///
/// Values outside a single day wrap around midnight. Displacement and bucketing
/// assume they never do: scenarios keep every dismissal ± `max_schedule_change`
/// inside the day, and offers that would cross midnight are refused.
pub fn time_from_minute(minute: i32) -> NaiveTime {
    let wrapped = minute.rem_euclid(MINUTES_PER_DAY) as u32;
    NaiveTime::from_hms_opt(wrapped / 60, wrapped % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Shift a dismissal time by a signed number of minutes
///
/// # Example
/// ```
/// use chrono::NaiveTime;
/// use dismissal_coordinator_core::core::time::shift_minutes;
///
/// let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
/// assert_eq!(shift_minutes(t, -10), NaiveTime::from_hms_opt(12, 20, 0).unwrap());
/// ```
pub fn shift_minutes(time: NaiveTime, delta: i32) -> NaiveTime {
    time_from_minute(minute_of_day(time) + delta)
}

/// Serde adapter storing a dismissal time as `"HH:MM"`
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}
