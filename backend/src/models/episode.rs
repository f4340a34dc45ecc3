//! Episode records and the report handed to the presentation layer
//!
//! An `Episode` is the full in-memory record of one dated dismissal event:
//! schedule snapshots, risk assessments, accepted offers, and the ledger
//! activity it caused. `EpisodeReport` is its flat, serialisable summary.
//!
//! Recoverable coordination failures are carried as `CoordinationIssue`
//! values so they stay auditable instead of disappearing into logs.

use crate::core::time::hhmm;
use crate::models::commitment::{Commitment, CommitmentId};
use crate::models::offer::{Offer, OfferDirection};
use crate::models::schedule::Schedule;
use crate::negotiation::{NegotiationConclusion, RoundRecord};
use crate::risk::{RiskAssessment, RiskLevel};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A recovered (non-fatal) failure observed while coordinating an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordinationIssue {
    /// A policy call exceeded its deadline and was treated as "no change"
    PolicyTimeout { classroom_id: String, round: usize },

    /// A policy call returned an error and was treated as "no change"
    PolicyFailure {
        classroom_id: String,
        round: usize,
        message: String,
    },

    /// An offer broke the flexibility or displacement bound and was dropped
    InvalidOffer {
        classroom_id: String,
        round: usize,
        delta: i32,
        reason: String,
    },

    /// A due commitment names a classroom absent from the scenario; left unapplied
    LedgerInconsistency {
        commitment_id: CommitmentId,
        classroom_id: String,
    },

    /// A round's candidate schedule raised risk; the round was discarded
    RiskRegression {
        round: usize,
        risk_before: f64,
        risk_after: f64,
    },
}

impl CoordinationIssue {
    /// Short machine-readable name of the issue kind
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationIssue::PolicyTimeout { .. } => "PolicyTimeout",
            CoordinationIssue::PolicyFailure { .. } => "PolicyFailure",
            CoordinationIssue::InvalidOffer { .. } => "InvalidOffer",
            CoordinationIssue::LedgerInconsistency { .. } => "LedgerInconsistency",
            CoordinationIssue::RiskRegression { .. } => "RiskRegression",
        }
    }

    /// Classroom the issue concerns, if any
    pub fn classroom_id(&self) -> Option<&str> {
        match self {
            CoordinationIssue::PolicyTimeout { classroom_id, .. }
            | CoordinationIssue::PolicyFailure { classroom_id, .. }
            | CoordinationIssue::InvalidOffer { classroom_id, .. }
            | CoordinationIssue::LedgerInconsistency { classroom_id, .. } => Some(classroom_id),
            CoordinationIssue::RiskRegression { .. } => None,
        }
    }
}

/// What happened to one due commitment at the start of an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentResolution {
    /// The commitment as it stands after resolution
    pub commitment: Commitment,
    /// Minutes actually forced onto the debtor this episode
    pub applied_delta: i32,
    /// Remainder re-recorded for a later episode, if the delta was capped
    pub carried_forward: Option<Commitment>,
}

impl CommitmentResolution {
    pub fn is_fulfilled(&self) -> bool {
        self.commitment.is_fulfilled()
    }
}

/// Reduction thresholds used to grade an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub excellent: f64,
    pub good: f64,
    pub acceptable: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.5,
            good: 0.3,
            acceptable: 0.1,
        }
    }
}

/// Qualitative grade of an episode's risk reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Acceptable,
    Poor,
}

impl PerformanceLevel {
    /// Grade a risk reduction against the configured thresholds
    ///
    /// # Example
    /// ```
    /// use dismissal_coordinator_core::models::episode::{PerformanceLevel, PerformanceThresholds};
    ///
    /// let thresholds = PerformanceThresholds::default();
    /// assert_eq!(PerformanceLevel::classify(0.54, &thresholds), PerformanceLevel::Excellent);
    /// assert_eq!(PerformanceLevel::classify(0.05, &thresholds), PerformanceLevel::Poor);
    /// ```
    pub fn classify(risk_reduction: f64, thresholds: &PerformanceThresholds) -> Self {
        if risk_reduction >= thresholds.excellent {
            PerformanceLevel::Excellent
        } else if risk_reduction >= thresholds.good {
            PerformanceLevel::Good
        } else if risk_reduction >= thresholds.acceptable {
            PerformanceLevel::Acceptable
        } else {
            PerformanceLevel::Poor
        }
    }
}

/// Complete record of one simulated dismissal event
#[derive(Debug, Clone)]
pub struct Episode {
    /// 0-indexed position in the run
    pub index: usize,
    pub date: NaiveDate,
    /// Schedule negotiation started from (due commitments already applied)
    pub schedule_before: Schedule,
    pub schedule_after: Schedule,
    pub initial_assessment: RiskAssessment,
    pub final_assessment: RiskAssessment,
    pub accepted_offers: Vec<Offer>,
    pub rounds: Vec<RoundRecord>,
    pub conclusion: NegotiationConclusion,
    pub success: bool,
    pub commitments_created: Vec<Commitment>,
    pub commitments_resolved: Vec<CommitmentResolution>,
    pub flagged_classrooms: Vec<String>,
    pub issues: Vec<CoordinationIssue>,
    pub performance: PerformanceLevel,
}

impl Episode {
    pub fn initial_risk(&self) -> f64 {
        self.initial_assessment.risk()
    }

    pub fn final_risk(&self) -> f64 {
        self.final_assessment.risk()
    }

    /// `initial − final`, never negative
    pub fn risk_reduction(&self) -> f64 {
        (self.initial_risk() - self.final_risk()).max(0.0)
    }

    /// Number of classrooms with at least one accepted offer
    pub fn agents_participated(&self) -> usize {
        let mut ids: Vec<&str> = self
            .accepted_offers
            .iter()
            .map(|o| o.classroom_id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Commitments marked fulfilled during this episode
    pub fn commitments_fulfilled(&self) -> impl Iterator<Item = &Commitment> {
        self.commitments_resolved
            .iter()
            .filter(|r| r.is_fulfilled())
            .map(|r| &r.commitment)
    }

    /// Flatten the episode into its presentation-layer report
    pub fn report(&self) -> EpisodeReport {
        let accepted_offers = self
            .accepted_offers
            .iter()
            .map(|offer| AcceptedOfferReport {
                classroom_id: offer.classroom_id().to_string(),
                before: offer.previous_time(),
                after: offer.proposed_time(),
                delta: offer.delta(),
                round: offer.round(),
                direction: offer.direction(),
            })
            .collect();

        let commitments_resolved: Vec<CommitmentReport> = self
            .commitments_resolved
            .iter()
            .map(CommitmentReport::from_resolution)
            .collect();
        let commitments_fulfilled = commitments_resolved
            .iter()
            .filter(|c| c.fulfilled)
            .cloned()
            .collect();

        EpisodeReport {
            episode: self.index,
            date: self.date,
            initial_risk: self.initial_risk(),
            final_risk: self.final_risk(),
            risk_reduction: self.risk_reduction(),
            initial_level: self.initial_assessment.level(),
            final_level: self.final_assessment.level(),
            success: self.success,
            performance: self.performance,
            rounds: self.rounds.len(),
            conclusion: self.conclusion,
            accepted_offers,
            agents_participated: self.agents_participated(),
            commitments_created: self
                .commitments_created
                .iter()
                .map(CommitmentReport::from_commitment)
                .collect(),
            commitments_resolved,
            commitments_fulfilled,
            flagged_classrooms: self.flagged_classrooms.clone(),
            issues: self.issues.clone(),
        }
    }
}

/// One accepted offer as shown in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedOfferReport {
    pub classroom_id: String,
    #[serde(with = "hhmm")]
    pub before: NaiveTime,
    #[serde(with = "hhmm")]
    pub after: NaiveTime,
    pub delta: i32,
    pub round: usize,
    pub direction: OfferDirection,
}

/// One commitment as shown in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentReport {
    pub id: String,
    pub debtor_id: String,
    pub creditor_id: String,
    pub owed_delta: i32,
    pub applied_delta: Option<i32>,
    pub origin_episode: NaiveDate,
    pub due_episode: NaiveDate,
    pub fulfilled: bool,
    pub carried_forward_as: Option<String>,
}

impl CommitmentReport {
    fn from_commitment(commitment: &Commitment) -> Self {
        Self {
            id: commitment.id().to_string(),
            debtor_id: commitment.debtor_id().to_string(),
            creditor_id: commitment.creditor_id().to_string(),
            owed_delta: commitment.owed_delta(),
            applied_delta: None,
            origin_episode: commitment.origin_episode(),
            due_episode: commitment.due_episode(),
            fulfilled: commitment.is_fulfilled(),
            carried_forward_as: None,
        }
    }

    fn from_resolution(resolution: &CommitmentResolution) -> Self {
        Self {
            applied_delta: Some(resolution.applied_delta),
            carried_forward_as: resolution
                .carried_forward
                .as_ref()
                .map(|c| c.id().to_string()),
            ..Self::from_commitment(&resolution.commitment)
        }
    }
}

/// Per-episode summary produced for an external presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode: usize,
    pub date: NaiveDate,
    pub initial_risk: f64,
    pub final_risk: f64,
    pub risk_reduction: f64,
    pub initial_level: RiskLevel,
    pub final_level: RiskLevel,
    pub success: bool,
    pub performance: PerformanceLevel,
    pub rounds: usize,
    pub conclusion: NegotiationConclusion,
    pub accepted_offers: Vec<AcceptedOfferReport>,
    pub agents_participated: usize,
    pub commitments_created: Vec<CommitmentReport>,
    /// Every due commitment handled this episode, including ones only rescheduled
    pub commitments_resolved: Vec<CommitmentReport>,
    /// The subset of `commitments_resolved` marked fulfilled this episode
    pub commitments_fulfilled: Vec<CommitmentReport>,
    pub flagged_classrooms: Vec<String>,
    pub issues: Vec<CoordinationIssue>,
}
