//! Scenario configuration
//!
//! A `Scenario` is the complete, immutable input of a run: the bottleneck,
//! the classrooms and their policies, and every tunable parameter. It is
//! loaded once (JSON or a named preset), validated, and handed to the
//! simulator by value; nothing is read from ambient process state afterwards.
//!
//! Every section except `classrooms` has defaults, so a minimal scenario is
//! just a capacity and a list of classrooms.

use crate::core::time::{hhmm, minute_of_day, EpisodeCalendar, MINUTES_PER_DAY};
use crate::models::classroom::Classroom;
use crate::models::episode::PerformanceThresholds;
use crate::models::schedule::Schedule;
use crate::negotiation::NegotiationParams;
use crate::policy::PolicyConfig;
use crate::risk::{RiskModel, RiskThresholds};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Names accepted by [`Scenario::preset`]
pub const PRESET_NAMES: [&str; 4] = ["demo", "stress", "balanced", "extreme"];

/// Fatal scenario validation errors
///
/// Raised before any episode runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("bottleneck_capacity must be positive, got {0}")]
    NonPositiveCapacity(f64),

    #[error("coordination_window must be positive")]
    ZeroWindow,

    #[error("scenario has no classrooms")]
    NoClassrooms,

    #[error("classroom id must not be empty")]
    EmptyId,

    #[error("duplicate classroom id: {0}")]
    DuplicateId(String),

    #[error("classroom {id}: flexibility {value} is outside [0, 1]")]
    FlexibilityOutOfRange { id: String, value: f64 },

    #[error("classroom {0}: student count must be positive")]
    ZeroStudents(String),

    #[error("classroom {0}: max_schedule_change must be positive")]
    ZeroMaxChange(String),

    #[error("classroom {0}: dismissal ± max_schedule_change crosses midnight")]
    CrossesMidnight(String),

    #[error("risk thresholds must satisfy 0 <= low <= medium <= high")]
    ThresholdsNotAscending,

    #[error("performance thresholds must satisfy 0 <= acceptable <= good <= excellent")]
    PerformanceNotAscending,

    #[error("max_rounds must be positive")]
    ZeroMaxRounds,

    #[error("{name} must be a finite value in [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{0} must be positive")]
    ZeroDuration(&'static str),

    #[error("interval_days must be positive")]
    ZeroInterval,

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("scenario could not be parsed: {0}")]
    Parse(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Initial state and policy of one classroom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomConfig {
    pub id: String,
    pub students: u32,
    pub flexibility: f64,
    #[serde(default = "default_max_schedule_change")]
    pub max_schedule_change: u32,
    #[serde(with = "hhmm")]
    pub dismissal: NaiveTime,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_max_schedule_change() -> u32 {
    15
}

impl ClassroomConfig {
    pub fn build(&self) -> Classroom {
        Classroom::new(
            self.id.clone(),
            self.students,
            self.flexibility,
            self.max_schedule_change,
            self.dismissal,
        )
    }
}

/// Episode sequencing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeParams {
    pub episode_count: usize,
    pub interval_days: u32,
}

impl Default for EpisodeParams {
    fn default() -> Self {
        Self {
            episode_count: 4,
            interval_days: 7,
        }
    }
}

/// How commitment repayment moves a classroom's reputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationParams {
    pub fulfillment_bonus: f64,
    pub violation_penalty: f64,
    /// Violations at which a classroom is flagged
    pub violation_threshold: u32,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            fulfillment_bonus: 0.1,
            violation_penalty: 0.2,
            violation_threshold: 3,
        }
    }
}

// ============================================================================
// Scenario
// ============================================================================

/// Complete input of a simulation run
///
/// # Example
///
/// ```
/// use dismissal_coordinator_core::orchestrator::Scenario;
///
/// let scenario = Scenario::from_json(r#"{
///     "bottleneck_capacity": 100,
///     "classrooms": [
///         {"id": "A", "students": 60, "flexibility": 0.5, "dismissal": "12:30"},
///         {"id": "B", "students": 50, "flexibility": 0.5, "dismissal": "12:30"}
///     ]
/// }"#).unwrap();
///
/// assert_eq!(scenario.coordination_window, 10);
/// assert_eq!(scenario.episodes.interval_days, 7);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,

    /// Students per minute the hallway absorbs
    pub bottleneck_capacity: f64,

    /// Minutes within which dismissals overlap
    #[serde(default = "default_window")]
    pub coordination_window: u32,

    /// Date of episode 0
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    pub classrooms: Vec<ClassroomConfig>,

    #[serde(default)]
    pub risk_thresholds: RiskThresholds,

    #[serde(default)]
    pub negotiation: NegotiationParams,

    #[serde(default)]
    pub episodes: EpisodeParams,

    #[serde(default)]
    pub reputation: ReputationParams,

    #[serde(default)]
    pub performance: PerformanceThresholds,
}

fn default_window() -> u32 {
    10
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap_or(NaiveDate::MIN)
}

impl Scenario {
    /// Scenario with default parameters around the given classrooms
    pub fn new(name: &str, bottleneck_capacity: f64, classrooms: Vec<ClassroomConfig>) -> Self {
        Self {
            name: name.to_string(),
            bottleneck_capacity,
            coordination_window: default_window(),
            start_date: default_start_date(),
            classrooms,
            risk_thresholds: RiskThresholds::default(),
            negotiation: NegotiationParams::default(),
            episodes: EpisodeParams::default(),
            reputation: ReputationParams::default(),
            performance: PerformanceThresholds::default(),
        }
    }

    /// Parse and validate a JSON scenario
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bottleneck_capacity.is_finite() && self.bottleneck_capacity > 0.0) {
            return Err(ConfigError::NonPositiveCapacity(self.bottleneck_capacity));
        }
        if self.coordination_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.classrooms.is_empty() {
            return Err(ConfigError::NoClassrooms);
        }

        let mut ids = HashSet::new();
        for room in &self.classrooms {
            if room.id.trim().is_empty() {
                return Err(ConfigError::EmptyId);
            }
            if !ids.insert(room.id.as_str()) {
                return Err(ConfigError::DuplicateId(room.id.clone()));
            }
            if !(0.0..=1.0).contains(&room.flexibility) {
                return Err(ConfigError::FlexibilityOutOfRange {
                    id: room.id.clone(),
                    value: room.flexibility,
                });
            }
            if room.students == 0 {
                return Err(ConfigError::ZeroStudents(room.id.clone()));
            }
            if room.max_schedule_change == 0 {
                return Err(ConfigError::ZeroMaxChange(room.id.clone()));
            }
            let minute = minute_of_day(room.dismissal);
            let reach = i64::from(room.max_schedule_change);
            if i64::from(minute) - reach < 0
                || i64::from(minute) + reach >= i64::from(MINUTES_PER_DAY)
            {
                return Err(ConfigError::CrossesMidnight(room.id.clone()));
            }
        }

        let t = &self.risk_thresholds;
        if !(0.0 <= t.low && t.low <= t.medium && t.medium <= t.high) {
            return Err(ConfigError::ThresholdsNotAscending);
        }
        let p = &self.performance;
        if !(0.0 <= p.acceptable && p.acceptable <= p.good && p.good <= p.excellent) {
            return Err(ConfigError::PerformanceNotAscending);
        }

        let n = &self.negotiation;
        if n.max_rounds == 0 {
            return Err(ConfigError::ZeroMaxRounds);
        }
        check_range("risk_threshold", n.risk_threshold, 0.0, f64::MAX)?;
        check_range("epsilon", n.epsilon, 0.0, f64::MAX)?;
        check_range("min_improvement_fraction", n.min_improvement_fraction, 0.0, 1.0)?;
        check_range("reciprocity_ratio", n.reciprocity_ratio, 0.0, 1.0)?;
        if n.policy_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("policy_timeout_ms"));
        }
        if n.round_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("round_timeout_ms"));
        }
        if n.episode_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroDuration("episode_timeout_ms"));
        }

        if self.episodes.interval_days == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        let r = &self.reputation;
        check_range("fulfillment_bonus", r.fulfillment_bonus, 0.0, 1.0)?;
        check_range("violation_penalty", r.violation_penalty, 0.0, 1.0)?;

        Ok(())
    }

    /// Initial schedule, classrooms in configuration order
    pub fn build_schedule(&self) -> Schedule {
        Schedule::new(self.classrooms.iter().map(ClassroomConfig::build).collect())
    }

    pub fn risk_model(&self) -> RiskModel {
        RiskModel::new(
            self.bottleneck_capacity,
            self.coordination_window,
            self.risk_thresholds.clone(),
        )
    }

    /// Calendar mapping episode indices to dates
    ///
    /// Requires a validated scenario (positive interval).
    pub fn calendar(&self) -> EpisodeCalendar {
        EpisodeCalendar::new(self.start_date, self.episodes.interval_days)
    }

    // ========================================================================
    // Presets
    // ========================================================================

    /// One of the built-in scenarios: `demo`, `stress`, `balanced`, `extreme`
    ///
    /// # Example
    /// ```
    /// use dismissal_coordinator_core::orchestrator::Scenario;
    ///
    /// let demo = Scenario::preset("demo").unwrap();
    /// assert_eq!(demo.classrooms.len(), 3);
    /// assert!(Scenario::preset("nope").is_err());
    /// ```
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        // Flexibility is a professor preference p in [-1, 1] rescaled to (p + 1) / 2.
        // Demo's C101 and C103 (0.65, 0.75) use 0.7 so a 10-minute move fits both.
        let (title, capacity, rooms): (&str, f64, &[(&str, u32, f64)]) = match name {
            "demo" => (
                "Demo Scenario",
                150.0,
                &[("C101", 80, 0.7), ("C102", 95, 0.4), ("C103", 60, 0.7)],
            ),
            "stress" => (
                "Stress Test Scenario",
                100.0,
                &[
                    ("C201", 120, 0.15),
                    ("C202", 110, 0.9),
                    ("C203", 95, 0.6),
                    ("C204", 85, 0.25),
                ],
            ),
            "balanced" => (
                "Balanced Load Scenario",
                120.0,
                &[
                    ("C301", 70, 0.7),
                    ("C302", 75, 0.45),
                    ("C303", 65, 0.8),
                    ("C304", 80, 0.35),
                ],
            ),
            "extreme" => (
                "Extreme Congestion Scenario",
                80.0,
                &[("C401", 150, 0.05), ("C402", 140, 0.95), ("C403", 130, 0.55)],
            ),
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        };

        let dismissal = NaiveTime::from_hms_opt(12, 30, 0).unwrap_or(NaiveTime::MIN);
        let classrooms = rooms
            .iter()
            .map(|(id, students, flexibility)| ClassroomConfig {
                id: id.to_string(),
                students: *students,
                flexibility: *flexibility,
                max_schedule_change: default_max_schedule_change(),
                dismissal,
                policy: PolicyConfig::default(),
            })
            .collect();

        Ok(Self::new(title, capacity, classrooms))
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}
