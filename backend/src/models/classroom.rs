//! Classroom model
//!
//! Represents a classroom whose students leave through the shared hallway.
//! Each classroom has:
//! - A student count (the load it puts on the bottleneck)
//! - A flexibility in [0, 1] scaling how far it will move per offer
//! - A hard cap on displacement from its timetabled dismissal
//! - A reputation built from how it repays commitments
//!
//! A classroom's dismissal time is mutated only by accepted offers and by
//! applied commitments.

use crate::core::time::{hhmm, minute_of_day, shift_minutes, MINUTES_PER_DAY};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Reputation of a classroom that has never owed anything
pub const INITIAL_REPUTATION: f64 = 1.0;

/// A classroom participating in dismissal coordination
///
/// # Example
/// ```
/// use chrono::NaiveTime;
/// use dismissal_coordinator_core::Classroom;
///
/// let dismissal = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
/// let mut room = Classroom::new("C101".to_string(), 80, 0.5, 10, dismissal);
/// assert_eq!(room.max_offer_delta(), 5);
///
/// room.apply_delta(-5);
/// assert_eq!(room.displacement(), -5);
/// assert_eq!(room.scheduled_dismissal(), NaiveTime::from_hms_opt(12, 25, 0).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    /// Unique classroom identifier (e.g., "C101")
    id: String,

    /// Number of students dismissed into the hallway
    students: u32,

    /// Fraction in [0, 1] of `max_schedule_change` the classroom typically accepts per offer
    flexibility: f64,

    /// Hard cap (minutes) on any single change and on total displacement
    max_schedule_change: u32,

    /// Timetabled dismissal, the reference point for displacement
    #[serde(with = "hhmm")]
    base_dismissal: NaiveTime,

    /// Current dismissal after accepted offers and applied commitments
    #[serde(with = "hhmm")]
    scheduled_dismissal: NaiveTime,

    /// Commitment reputation in [0, 1]
    reputation: f64,

    /// Number of commitments not fully repaid when due
    violation_count: u32,
}

impl Classroom {
    /// Create a new classroom dismissing at its timetabled time
    ///
    /// Flexibility is clamped into [0, 1]; scenario validation reports
    /// out-of-range values before any classroom is built.
    pub fn new(
        id: String,
        students: u32,
        flexibility: f64,
        max_schedule_change: u32,
        dismissal: NaiveTime,
    ) -> Self {
        Self {
            id,
            students,
            flexibility: flexibility.clamp(0.0, 1.0),
            max_schedule_change,
            base_dismissal: dismissal,
            scheduled_dismissal: dismissal,
            reputation: INITIAL_REPUTATION,
            violation_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn students(&self) -> u32 {
        self.students
    }

    pub fn flexibility(&self) -> f64 {
        self.flexibility
    }

    pub fn max_schedule_change(&self) -> u32 {
        self.max_schedule_change
    }

    pub fn base_dismissal(&self) -> NaiveTime {
        self.base_dismissal
    }

    pub fn scheduled_dismissal(&self) -> NaiveTime {
        self.scheduled_dismissal
    }

    /// Current dismissal as minutes since midnight
    pub fn dismissal_minute(&self) -> i32 {
        minute_of_day(self.scheduled_dismissal)
    }

    pub fn reputation(&self) -> f64 {
        self.reputation
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    /// Signed minutes between the current and the timetabled dismissal
    ///
    /// This is the sum of every offer and commitment applied so far.
    pub fn displacement(&self) -> i32 {
        self.dismissal_minute() - minute_of_day(self.base_dismissal)
    }

    /// Largest |delta| this classroom negotiates in a single offer
    ///
    /// `floor(flexibility × max_schedule_change)`, never above the hard cap.
    pub fn max_offer_delta(&self) -> u32 {
        let scaled = (self.flexibility * f64::from(self.max_schedule_change) + 1e-9).floor();
        (scaled.max(0.0) as u32).min(self.max_schedule_change)
    }

    /// Remaining displacement headroom in the direction of `delta`
    ///
    /// # Example
    /// ```
    /// use chrono::NaiveTime;
    /// use dismissal_coordinator_core::Classroom;
    ///
    /// let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
    /// let mut room = Classroom::new("C1".to_string(), 30, 1.0, 8, t);
    /// room.apply_delta(6);
    /// assert_eq!(room.headroom(1), 2);
    /// assert_eq!(room.headroom(-1), 14);
    /// ```
    pub fn headroom(&self, delta: i32) -> u32 {
        let cap = self.max_schedule_change as i32;
        let room = if delta >= 0 {
            cap - self.displacement()
        } else {
            cap + self.displacement()
        };
        room.max(0) as u32
    }

    /// Whether applying `delta` keeps |displacement| within the hard cap
    pub fn within_displacement_cap(&self, delta: i32) -> bool {
        (self.displacement() + delta).unsigned_abs() <= self.max_schedule_change
    }

    /// Whether applying `delta` keeps the dismissal on the same day
    pub fn stays_within_day(&self, delta: i32) -> bool {
        (0..MINUTES_PER_DAY).contains(&(self.dismissal_minute() + delta))
    }

    /// Move the dismissal by `delta` minutes
    pub fn apply_delta(&mut self, delta: i32) {
        self.scheduled_dismissal = shift_minutes(self.scheduled_dismissal, delta);
    }

    /// Reward a fully repaid commitment
    pub(crate) fn record_fulfilment(&mut self, bonus: f64) {
        self.reputation = (self.reputation + bonus).clamp(0.0, 1.0);
    }

    /// Penalise a commitment that could not be fully repaid when due
    ///
    /// Returns the updated violation count.
    pub(crate) fn record_violation(&mut self, penalty: f64) -> u32 {
        self.reputation = (self.reputation - penalty).clamp(0.0, 1.0);
        self.violation_count += 1;
        self.violation_count
    }
}
