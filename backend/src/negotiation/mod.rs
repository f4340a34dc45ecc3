//! Multi-round negotiation over one episode's schedule
//!
//! The coordinator repeatedly asks the classrooms in the congested bucket(s)
//! for proposals, evaluates each round's proposals together against the
//! pre-round schedule, and keeps whatever lowers risk. It stops once risk is
//! below the threshold, the round budget is spent, or a round improves
//! nothing.
//!
//! Accepted earlier moves that no classroom reciprocates with a later move in
//! the same round leave the other peak classrooms in debt; those debts are
//! returned as `PendingCommitment`s for the ledger.

use crate::models::commitment::PendingCommitment;
use crate::models::episode::CoordinationIssue;
use crate::models::offer::Offer;
use crate::models::schedule::Schedule;
use crate::risk::RiskAssessment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod coordinator;
pub mod reciprocity;

pub use coordinator::{NegotiationCoordinator, PolicyMap};
pub use reciprocity::asymmetric_cost;

/// Negotiation parameters
///
/// All fields have defaults, so a scenario only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationParams {
    /// Upper bound on rounds per episode
    pub max_rounds: usize,

    /// Negotiation runs only while risk is at or above this value
    pub risk_threshold: f64,

    /// Minimum absolute risk drop that counts as an improvement
    pub epsilon: f64,

    /// Relative risk reduction an episode needs to count as a success
    pub min_improvement_fraction: f64,

    /// A later move reciprocates an earlier one of `d` minutes if it is at least `ceil(d × ratio)`
    pub reciprocity_ratio: f64,

    /// Deadline for a single policy call
    pub policy_timeout_ms: u64,

    /// Deadline shared by every policy call of one round
    pub round_timeout_ms: u64,

    /// Deadline shared by every policy call of one episode
    pub episode_timeout_ms: Option<u64>,

    /// Run the counter-offer sub-round for rejected proposals
    pub counter_offers: bool,

    /// Permit offers that push cumulative displacement past `max_schedule_change`
    pub allow_override: bool,
}

impl Default for NegotiationParams {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            risk_threshold: 1.0,
            epsilon: 0.01,
            min_improvement_fraction: 0.1,
            reciprocity_ratio: 0.5,
            policy_timeout_ms: 120_000,
            round_timeout_ms: 300_000,
            episode_timeout_ms: None,
            counter_offers: true,
            allow_override: false,
        }
    }
}

impl NegotiationParams {
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn episode_timeout(&self) -> Option<Duration> {
        self.episode_timeout_ms.map(Duration::from_millis)
    }

    /// Whether going from `initial` to `final_risk` is a meaningful improvement
    ///
    /// # Example
    /// ```
    /// use dismissal_coordinator_core::negotiation::NegotiationParams;
    ///
    /// let params = NegotiationParams::default();
    /// assert!(params.is_success(1.57, 1.03));
    /// assert!(!params.is_success(1.57, 1.50));
    /// assert!(!params.is_success(0.0, 0.0));
    /// ```
    pub fn is_success(&self, initial: f64, final_risk: f64) -> bool {
        initial > 0.0 && (initial - final_risk) / initial >= self.min_improvement_fraction
    }
}

/// Why a negotiation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationConclusion {
    /// Baseline risk was already below the threshold; no rounds were run
    NotNeeded,
    /// Risk fell below the threshold
    ThresholdReached,
    /// `max_rounds` rounds ran
    MaxRoundsExhausted,
    /// A round produced no improving change
    Stalled,
}

/// How a round's proposals were settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundResolution {
    /// Every valid proposal was applied together
    Atomic,
    /// Only individually profitable proposals (or counter-offers) were applied
    Greedy,
    /// No valid proposal arrived
    NoProposals,
    /// Proposals arrived but nothing lowered risk
    NoImprovement,
}

/// A counter-offer and the classroom's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferRecord {
    pub offer: Offer,
    pub accepted: bool,
    /// Accepted and actually applied to the schedule
    pub applied: bool,
}

/// Trace of one negotiation round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-indexed round number
    pub round: usize,
    pub risk_before: f64,
    pub risk_after: f64,
    /// Classrooms asked to propose
    pub at_risk: Vec<String>,
    pub resolution: RoundResolution,
    /// Offers applied this round, self-initiated first
    pub accepted: Vec<Offer>,
    /// Valid proposals that were not applied
    pub rejected: Vec<Offer>,
    pub counter_offers: Vec<CounterOfferRecord>,
    pub issues: Vec<CoordinationIssue>,
}

impl RoundRecord {
    pub fn improved(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Result of negotiating one episode
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    pub final_schedule: Schedule,
    /// Every applied offer, in application order
    pub accepted_offers: Vec<Offer>,
    pub initial_assessment: RiskAssessment,
    pub final_assessment: RiskAssessment,
    pub rounds: Vec<RoundRecord>,
    pub conclusion: NegotiationConclusion,
    pub success: bool,
    /// Asymmetric-cost debts to be recorded in the ledger
    pub pending_commitments: Vec<PendingCommitment>,
}

impl NegotiationOutcome {
    pub fn initial_risk(&self) -> f64 {
        self.initial_assessment.risk()
    }

    pub fn final_risk(&self) -> f64 {
        self.final_assessment.risk()
    }

    /// `initial − final`
    pub fn risk_reduction(&self) -> f64 {
        self.initial_risk() - self.final_risk()
    }

    pub fn rounds_used(&self) -> usize {
        self.rounds.len()
    }

    /// Recovered failures from every round, in order
    pub fn issues(&self) -> impl Iterator<Item = &CoordinationIssue> {
        self.rounds.iter().flat_map(|r| r.issues.iter())
    }
}
