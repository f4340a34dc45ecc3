//! Congestion risk model
//!
//! Turns a schedule into a risk score for the shared hallway. Classrooms are
//! grouped into overlapping buckets, one centred on every distinct dismissal
//! time; a bucket's load is its student count divided by the bottleneck
//! capacity. The risk score is the peak bucket load once it reaches capacity
//! and zero below it.
//!
//! The model is a pure function of its inputs: no state, no caching, safe to
//! call for every candidate schedule a negotiation round produces.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveTime;
//! use dismissal_coordinator_core::{Classroom, RiskModel, RiskThresholds, Schedule};
//!
//! let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
//! let schedule = Schedule::new(vec![
//!     Classroom::new("C101".to_string(), 80, 0.7, 15, t),
//!     Classroom::new("C102".to_string(), 75, 0.4, 15, t),
//!     Classroom::new("C103".to_string(), 80, 0.7, 15, t),
//! ]);
//!
//! let model = RiskModel::new(150.0, 10, RiskThresholds::default());
//! let assessment = model.assess(&schedule);
//! assert!((assessment.risk() - 235.0 / 150.0).abs() < 1e-9);
//! ```

use crate::core::time::{hhmm, time_from_minute};
use crate::models::schedule::Schedule;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance used when comparing bucket loads for ties
const LOAD_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Thresholds and levels
// ============================================================================

/// Reporting thresholds on the peak load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.7,
            medium: 1.0,
            high: 1.5,
        }
    }
}

impl RiskThresholds {
    /// Categorise a load against the thresholds
    pub fn classify(&self, load: f64) -> RiskLevel {
        if load <= self.low {
            RiskLevel::Normal
        } else if load <= self.medium {
            RiskLevel::Moderate
        } else if load <= self.high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Congestion category, for reporting only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Normal,
    Moderate,
    High,
    Critical,
}

// ============================================================================
// Assessment
// ============================================================================

/// Load of one time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketLoad {
    /// First minute covered by the bucket
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    /// Dismissal time the bucket is centred on
    #[serde(with = "hhmm")]
    pub center: NaiveTime,
    /// Aggregate students dismissing inside the bucket
    pub students: u32,
    /// `students / capacity`
    pub load: f64,
    /// Contributing classrooms, in schedule order
    pub classroom_ids: Vec<String>,
}

/// Risk of one schedule snapshot
///
/// Episode-scoped: assessments are recomputed, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    risk: f64,
    peak_load: f64,
    level: RiskLevel,
    buckets: Vec<BucketLoad>,
}

impl RiskAssessment {
    /// Risk score: the peak load at or above capacity, otherwise 0
    pub fn risk(&self) -> f64 {
        self.risk
    }

    /// Highest bucket load, reported even below capacity
    pub fn peak_load(&self) -> f64 {
        self.peak_load
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    /// Buckets in ascending time order
    pub fn buckets(&self) -> &[BucketLoad] {
        &self.buckets
    }

    /// Bucket start time mapped to its aggregate student count
    pub fn contributions(&self) -> BTreeMap<NaiveTime, u32> {
        self.buckets.iter().map(|b| (b.start, b.students)).collect()
    }

    /// Buckets whose load equals the peak
    pub fn peak_buckets(&self) -> impl Iterator<Item = &BucketLoad> {
        let peak = self.peak_load;
        self.buckets
            .iter()
            .filter(move |b| peak > 0.0 && (b.load - peak).abs() <= LOAD_TOLERANCE)
    }

    /// Classrooms contributing to the highest-load bucket(s)
    ///
    /// Ordered by first appearance in the schedule; this is the at-risk set a
    /// negotiation round works on.
    pub fn peak_classrooms(&self, schedule: &Schedule) -> Vec<String> {
        let mut in_peak: Vec<&str> = self
            .peak_buckets()
            .flat_map(|b| b.classroom_ids.iter().map(String::as_str))
            .collect();
        in_peak.sort_unstable();
        in_peak.dedup();

        schedule
            .classrooms()
            .iter()
            .filter(|c| in_peak.binary_search(&c.id()).is_ok())
            .map(|c| c.id().to_string())
            .collect()
    }
}

// ============================================================================
// Model
// ============================================================================

/// Stateless risk evaluator for one bottleneck
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    capacity: f64,
    window: u32,
    thresholds: RiskThresholds,
}

impl RiskModel {
    /// Create a model for a bottleneck
    ///
    /// `capacity` and `window` are validated positive by scenario loading.
    pub fn new(capacity: f64, window: u32, thresholds: RiskThresholds) -> Self {
        Self {
            capacity,
            window,
            thresholds,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Assess a schedule
    pub fn assess(&self, schedule: &Schedule) -> RiskAssessment {
        assess_with_thresholds(schedule, self.capacity, self.window, &self.thresholds)
    }

    /// Risk score only, for comparing candidate schedules
    pub fn risk_of(&self, schedule: &Schedule) -> f64 {
        self.assess(schedule).risk()
    }
}

/// Assess `schedule` against a bottleneck with default reporting thresholds
pub fn assess(schedule: &Schedule, capacity: f64, window: u32) -> RiskAssessment {
    assess_with_thresholds(schedule, capacity, window, &RiskThresholds::default())
}

fn assess_with_thresholds(
    schedule: &Schedule,
    capacity: f64,
    window: u32,
    thresholds: &RiskThresholds,
) -> RiskAssessment {
    let window = i64::from(window);

    let mut centers: Vec<i32> = schedule
        .classrooms()
        .iter()
        .map(|c| c.dismissal_minute())
        .collect();
    centers.sort_unstable();
    centers.dedup();

    let buckets: Vec<BucketLoad> = centers
        .into_iter()
        .map(|center| {
            let members: Vec<_> = schedule
                .classrooms()
                .iter()
                .filter(|c| 2 * (i64::from(c.dismissal_minute()) - i64::from(center)).abs() <= window)
                .collect();
            let students: u32 = members.iter().map(|c| c.students()).sum();
            BucketLoad {
                start: time_from_minute(center - (window / 2) as i32),
                center: time_from_minute(center),
                students,
                load: if capacity > 0.0 {
                    f64::from(students) / capacity
                } else {
                    0.0
                },
                classroom_ids: members.iter().map(|c| c.id().to_string()).collect(),
            }
        })
        .collect();

    let peak_load = buckets.iter().map(|b| b.load).fold(0.0_f64, f64::max);
    let risk = if peak_load >= 1.0 { peak_load } else { 0.0 };

    RiskAssessment {
        risk,
        peak_load,
        level: thresholds.classify(peak_load),
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classroom::Classroom;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn room(id: &str, students: u32, time: NaiveTime) -> Classroom {
        Classroom::new(id.to_string(), students, 0.5, 15, time)
    }

    #[test]
    fn test_empty_schedule_has_zero_risk() {
        let assessment = assess(&Schedule::default(), 100.0, 10);
        assert_eq!(assessment.risk(), 0.0);
        assert_eq!(assessment.peak_load(), 0.0);
        assert!(assessment.buckets().is_empty());
        assert_eq!(assessment.level(), RiskLevel::Normal);
    }

    #[test]
    fn test_below_capacity_reports_load_but_zero_risk() {
        let schedule = Schedule::new(vec![room("A", 60, at(12, 30))]);
        let assessment = assess(&schedule, 100.0, 10);
        assert_eq!(assessment.risk(), 0.0);
        assert!((assessment.peak_load() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_exactly_at_capacity_is_one() {
        let schedule = Schedule::new(vec![room("A", 60, at(12, 30)), room("B", 40, at(12, 35))]);
        let assessment = assess(&schedule, 100.0, 10);
        assert_eq!(assessment.risk(), 1.0);
    }

    #[test]
    fn test_bucket_membership_uses_half_window() {
        // 12:25 and 12:35 sit exactly five minutes either side of 12:30
        let schedule = Schedule::new(vec![
            room("A", 50, at(12, 25)),
            room("B", 50, at(12, 30)),
            room("C", 50, at(12, 35)),
            room("D", 50, at(12, 41)),
        ]);
        let assessment = assess(&schedule, 100.0, 10);

        let contributions = assessment.contributions();
        assert_eq!(contributions[&at(12, 25)], 150);
        assert_eq!(contributions[&at(12, 20)], 100);
        assert_eq!(contributions[&at(12, 36)], 50);
        assert!((assessment.risk() - 1.5).abs() < 1e-12);
        assert_eq!(
            assessment.peak_classrooms(&schedule),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn test_tied_peaks_union_their_classrooms() {
        let schedule = Schedule::new(vec![
            room("A", 120, at(12, 0)),
            room("B", 120, at(13, 0)),
            room("C", 10, at(14, 0)),
        ]);
        let assessment = assess(&schedule, 100.0, 10);
        assert_eq!(assessment.peak_buckets().count(), 2);
        assert_eq!(
            assessment.peak_classrooms(&schedule),
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn test_levels_follow_thresholds() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.classify(0.5), RiskLevel::Normal);
        assert_eq!(thresholds.classify(1.0), RiskLevel::Moderate);
        assert_eq!(thresholds.classify(1.03), RiskLevel::High);
        assert_eq!(thresholds.classify(1.57), RiskLevel::Critical);
    }
}
