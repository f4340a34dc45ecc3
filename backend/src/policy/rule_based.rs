//! Rule-based classroom policy
//!
//! Deterministic stand-in for a reasoning agent.
//!
//! # Behavior
//!
//! - **Propose**: rank the at-risk set by student count. The largest
//!   classroom stays put; the others fan out alternately earlier and later in
//!   steps just wider than half the coordination window, so neighbours fall
//!   out of each other's bucket. Each move is clamped to the classroom's
//!   flexibility bound and remaining displacement headroom.
//! - **Decide**: score the counter-offer's feasibility from flexibility,
//!   size of the change and reputation; accept above the threshold.

use super::{AgentPolicy, PolicyError, RiskContext};
use crate::models::classroom::Classroom;
use crate::models::offer::{Decision, Offer, OfferDirection};
use async_trait::async_trait;

/// Default feasibility score a counter-offer must exceed
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.5;

const BASE_FEASIBILITY: f64 = 0.4;
const FLEXIBILITY_WEIGHT: f64 = 0.6;
const PENALTY_PER_MINUTE: f64 = 0.05;
const REPUTATION_WEIGHT: f64 = 0.2;

/// Stagger-and-score policy
///
/// # Example
///
/// ```
/// use dismissal_coordinator_core::policy::RuleBasedPolicy;
///
/// let policy = RuleBasedPolicy::default();
/// assert_eq!(policy.acceptance_threshold(), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct RuleBasedPolicy {
    acceptance_threshold: f64,
}

impl RuleBasedPolicy {
    pub fn new(acceptance_threshold: f64) -> Self {
        Self {
            acceptance_threshold,
        }
    }

    pub fn acceptance_threshold(&self) -> f64 {
        self.acceptance_threshold
    }

    /// Stagger offset for the classroom ranked `rank` (0 = largest)
    fn stagger_delta(rank: usize, window: u32) -> i32 {
        let step = (window / 2 + 1) as i32;
        if rank == 0 {
            0
        } else if rank % 2 == 1 {
            -step * ((rank as i32 + 1) / 2)
        } else {
            step * (rank as i32 / 2)
        }
    }

    /// Feasibility of moving `classroom` by `delta` minutes, in [0, 1]
    pub fn feasibility(classroom: &Classroom, delta: i32) -> f64 {
        let score = BASE_FEASIBILITY + FLEXIBILITY_WEIGHT * classroom.flexibility()
            - PENALTY_PER_MINUTE * f64::from(delta.unsigned_abs())
            + (classroom.reputation() - 0.5) * REPUTATION_WEIGHT;
        score.clamp(0.0, 1.0)
    }
}

impl Default for RuleBasedPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTANCE_THRESHOLD)
    }
}

#[async_trait]
impl AgentPolicy for RuleBasedPolicy {
    async fn propose(
        &self,
        classroom: &Classroom,
        context: &RiskContext,
    ) -> Result<Option<Offer>, PolicyError> {
        let Some(rank) = context.rank_by_students(classroom.id()) else {
            return Ok(None);
        };

        let wanted = Self::stagger_delta(rank, context.coordination_window);
        if wanted == 0 {
            return Ok(None);
        }

        let limit = classroom.max_offer_delta().min(classroom.headroom(wanted)) as i32;
        let delta = wanted.clamp(-limit, limit);
        if delta == 0 {
            return Ok(None);
        }

        Ok(Some(Offer::new(
            classroom,
            delta,
            context.round,
            OfferDirection::SelfInitiated,
        )))
    }

    async fn decide(&self, offer: &Offer, classroom: &Classroom) -> Result<Decision, PolicyError> {
        if offer.delta().unsigned_abs() > classroom.max_offer_delta() {
            return Ok(Decision::Reject);
        }
        if Self::feasibility(classroom, offer.delta()) > self.acceptance_threshold {
            Ok(Decision::Accept)
        } else {
            Ok(Decision::Reject)
        }
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AtRiskClassroom;
    use chrono::{NaiveDate, NaiveTime};

    fn at_1230(id: &str, students: u32, flexibility: f64) -> Classroom {
        let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        Classroom::new(id.to_string(), students, flexibility, 15, t)
    }

    fn context(rooms: &[&Classroom]) -> RiskContext {
        RiskContext {
            episode: 0,
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            round: 1,
            risk: 1.57,
            peak_load: 1.57,
            risk_threshold: 1.0,
            bottleneck_capacity: 150.0,
            coordination_window: 10,
            at_risk: rooms
                .iter()
                .map(|c| AtRiskClassroom {
                    id: c.id().to_string(),
                    students: c.students(),
                    displacement: c.displacement(),
                    reputation: c.reputation(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_stagger_alternates_direction() {
        assert_eq!(RuleBasedPolicy::stagger_delta(0, 10), 0);
        assert_eq!(RuleBasedPolicy::stagger_delta(1, 10), -6);
        assert_eq!(RuleBasedPolicy::stagger_delta(2, 10), 6);
        assert_eq!(RuleBasedPolicy::stagger_delta(3, 10), -12);
        assert_eq!(RuleBasedPolicy::stagger_delta(4, 10), 12);
    }

    #[tokio::test]
    async fn test_propose_fans_out_and_clamps() {
        let big = at_1230("C102", 95, 0.4);
        let mid = at_1230("C101", 80, 0.7);
        let small = at_1230("C103", 60, 0.7);
        let tiny = at_1230("C104", 20, 0.2);
        let ctx = context(&[&mid, &big, &small, &tiny]);
        let policy = RuleBasedPolicy::default();

        assert!(policy.propose(&big, &ctx).await.unwrap().is_none());
        assert_eq!(policy.propose(&mid, &ctx).await.unwrap().unwrap().delta(), -6);
        assert_eq!(policy.propose(&small, &ctx).await.unwrap().unwrap().delta(), 6);
        // wants -12 but flexibility 0.2 of 15 allows 3
        assert_eq!(policy.propose(&tiny, &ctx).await.unwrap().unwrap().delta(), -3);
    }

    #[tokio::test]
    async fn test_decide_scores_feasibility() {
        let flexible = at_1230("C101", 80, 0.7);
        let rigid = at_1230("C102", 95, 0.2);
        let policy = RuleBasedPolicy::default();

        let offer = Offer::new(&flexible, 5, 1, OfferDirection::CounterOffer);
        assert_eq!(policy.decide(&offer, &flexible).await.unwrap(), Decision::Accept);

        // 0.4 + 0.12 - 0.15 + 0.1 = 0.47
        let offer = Offer::new(&rigid, 3, 1, OfferDirection::CounterOffer);
        assert_eq!(policy.decide(&offer, &rigid).await.unwrap(), Decision::Reject);
    }
}
