//! Negotiation coordinator
//!
//! # Round protocol
//!
//! 1. Assess the current schedule; the classrooms of the peak bucket(s) form
//!    the at-risk set.
//! 2. Ask every at-risk classroom's policy for a proposal concurrently. Each
//!    call is bounded by the earliest of its own deadline, the round deadline
//!    and the episode deadline; a late or failing call counts as no change.
//! 3. Validate proposals against the flexibility bound and the displacement
//!    cap. Invalid offers are dropped and reported.
//! 4. Apply all proposals together if that lowers risk by more than epsilon
//!    (atomic accept). Otherwise keep the individually profitable ones, or
//!    failing that the single best one (greedy accept).
//! 5. For each rejected proposal, offer the classroom the bounded change that
//!    helps most and apply it if accepted and still improving (one sub-round).
//!
//! Nothing outside the coordinator's local copy of the schedule is touched;
//! the caller decides what to keep from the returned outcome.

use super::reciprocity::asymmetric_cost;
use super::{
    CounterOfferRecord, NegotiationConclusion, NegotiationOutcome, NegotiationParams,
    RoundRecord, RoundResolution,
};
use crate::models::classroom::Classroom;
use crate::models::episode::CoordinationIssue;
use crate::models::offer::{Decision, Offer, OfferDirection};
use crate::models::schedule::Schedule;
use crate::policy::{AgentPolicy, AtRiskClassroom, PolicyError, RiskContext};
use crate::risk::{RiskAssessment, RiskModel};
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Policies keyed by classroom id
pub type PolicyMap = BTreeMap<String, Arc<dyn AgentPolicy>>;

/// Result of one bounded policy call
enum CallResult<T> {
    Answered(T),
    Failed(PolicyError),
    TimedOut,
}

async fn bounded<T, F>(deadline: Instant, call: F) -> CallResult<T>
where
    F: Future<Output = Result<T, PolicyError>>,
{
    match timeout_at(deadline, call).await {
        Ok(Ok(value)) => CallResult::Answered(value),
        Ok(Err(err)) => CallResult::Failed(err),
        Err(_) => CallResult::TimedOut,
    }
}

/// Drives negotiation for one bottleneck
#[derive(Debug, Clone)]
pub struct NegotiationCoordinator {
    risk_model: RiskModel,
    params: NegotiationParams,
}

impl NegotiationCoordinator {
    pub fn new(risk_model: RiskModel, params: NegotiationParams) -> Self {
        Self { risk_model, params }
    }

    pub fn risk_model(&self) -> &RiskModel {
        &self.risk_model
    }

    pub fn params(&self) -> &NegotiationParams {
        &self.params
    }

    /// Negotiate a schedule for episode `episode` held on `date`
    ///
    /// Always terminates after at most `max_rounds` rounds. Policy failures
    /// and timeouts are recorded in the round trace, never returned as errors.
    pub async fn negotiate(
        &self,
        initial: &Schedule,
        policies: &PolicyMap,
        episode: usize,
        date: NaiveDate,
    ) -> NegotiationOutcome {
        let initial_assessment = self.risk_model.assess(initial);
        let initial_risk = initial_assessment.risk();
        let episode_deadline = self.params.episode_timeout().map(|t| Instant::now() + t);

        info!(
            episode,
            risk = initial_risk,
            peak_load = initial_assessment.peak_load(),
            threshold = self.params.risk_threshold,
            "Baseline risk assessed"
        );

        if initial_risk < self.params.risk_threshold {
            debug!(episode, "Risk below threshold, no negotiation needed");
            return NegotiationOutcome {
                final_schedule: initial.clone(),
                accepted_offers: Vec::new(),
                final_assessment: initial_assessment.clone(),
                initial_assessment,
                rounds: Vec::new(),
                conclusion: NegotiationConclusion::NotNeeded,
                success: false,
                pending_commitments: Vec::new(),
            };
        }

        let mut schedule = initial.clone();
        let mut assessment = initial_assessment.clone();
        let mut accepted_offers = Vec::new();
        let mut pending_commitments = Vec::new();
        let mut rounds = Vec::new();
        let mut conclusion = NegotiationConclusion::MaxRoundsExhausted;

        for round in 1..=self.params.max_rounds {
            if assessment.risk() < self.params.risk_threshold {
                conclusion = NegotiationConclusion::ThresholdReached;
                break;
            }

            let record = self
                .run_round(&schedule, &assessment, policies, episode, date, round, episode_deadline)
                .await;

            if !record.improved() {
                info!(episode, round, "No improving change, negotiation stalled");
                rounds.push(record);
                conclusion = NegotiationConclusion::Stalled;
                break;
            }

            let peak_members = assessment.peak_classrooms(&schedule);
            pending_commitments.extend(asymmetric_cost(
                &schedule,
                &peak_members,
                &record.accepted,
                self.params.reciprocity_ratio,
            ));

            schedule = schedule.with_offers(&record.accepted);
            assessment = self.risk_model.assess(&schedule);
            accepted_offers.extend(record.accepted.iter().cloned());

            info!(
                episode,
                round,
                risk_before = record.risk_before,
                risk_after = assessment.risk(),
                accepted = record.accepted.len(),
                "Round complete"
            );
            rounds.push(record);

            if assessment.risk() < self.params.risk_threshold {
                conclusion = NegotiationConclusion::ThresholdReached;
                break;
            }
        }

        let success = self.params.is_success(initial_risk, assessment.risk());
        info!(
            episode,
            initial_risk,
            final_risk = assessment.risk(),
            rounds = rounds.len(),
            success,
            ?conclusion,
            "Negotiation concluded"
        );

        NegotiationOutcome {
            final_schedule: schedule,
            accepted_offers,
            initial_assessment,
            final_assessment: assessment,
            rounds,
            conclusion,
            success,
            pending_commitments,
        }
    }

    // ========================================================================
    // Round
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        schedule: &Schedule,
        assessment: &RiskAssessment,
        policies: &PolicyMap,
        episode: usize,
        date: NaiveDate,
        round: usize,
        episode_deadline: Option<Instant>,
    ) -> RoundRecord {
        let risk_before = assessment.risk();
        let at_risk = assessment.peak_classrooms(schedule);
        let round_deadline = Instant::now() + self.params.round_timeout();
        let deadline = match episode_deadline {
            Some(limit) => round_deadline.min(limit),
            None => round_deadline,
        };

        debug!(episode, round, risk = risk_before, at_risk = ?at_risk, "Round started");

        let context = RiskContext {
            episode,
            date,
            round,
            risk: risk_before,
            peak_load: assessment.peak_load(),
            risk_threshold: self.params.risk_threshold,
            bottleneck_capacity: self.risk_model.capacity(),
            coordination_window: self.risk_model.window(),
            at_risk: at_risk
                .iter()
                .filter_map(|id| schedule.get(id))
                .map(|c| AtRiskClassroom {
                    id: c.id().to_string(),
                    students: c.students(),
                    displacement: c.displacement(),
                    reputation: c.reputation(),
                })
                .collect(),
        };

        let mut issues = Vec::new();
        let proposals = self
            .collect_proposals(schedule, &at_risk, policies, &context, deadline, &mut issues)
            .await;

        let mut record = RoundRecord {
            round,
            risk_before,
            risk_after: risk_before,
            at_risk,
            resolution: RoundResolution::NoProposals,
            accepted: Vec::new(),
            rejected: Vec::new(),
            counter_offers: Vec::new(),
            issues: Vec::new(),
        };

        if proposals.is_empty() {
            record.issues = issues;
            return record;
        }

        // Atomic accept: all proposals against the pre-round schedule
        let candidate_risk = self.risk_model.risk_of(&schedule.with_offers(&proposals));
        if candidate_risk < risk_before - self.params.epsilon {
            debug!(episode, round, candidate_risk, "Round accepted atomically");
            record.resolution = RoundResolution::Atomic;
            record.risk_after = candidate_risk;
            record.accepted = proposals;
            record.issues = issues;
            return record;
        }
        if candidate_risk > risk_before {
            warn!(episode, round, risk_before, candidate_risk, "Round candidate raises risk");
            issues.push(CoordinationIssue::RiskRegression {
                round,
                risk_before,
                risk_after: candidate_risk,
            });
        }

        let (accepted, rejected) = self.greedy_accept(schedule, risk_before, proposals);
        let mut working = schedule.with_offers(&accepted);
        let mut working_risk = self.risk_model.risk_of(&working);
        record.accepted = accepted;

        if self.params.counter_offers && !rejected.is_empty() {
            let counters = self
                .counter_offer_round(&working, working_risk, &rejected, policies, round, deadline, &mut issues)
                .await;
            for (offer, decision) in counters {
                let applied = if decision.is_accept() {
                    let next = working.with_offers([&offer]);
                    let next_risk = self.risk_model.risk_of(&next);
                    if next_risk < working_risk - self.params.epsilon {
                        working = next;
                        working_risk = next_risk;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                };
                if applied {
                    record.accepted.push(offer.clone());
                }
                record.counter_offers.push(CounterOfferRecord {
                    offer,
                    accepted: decision.is_accept(),
                    applied,
                });
            }
        }

        record.resolution = if record.accepted.is_empty() {
            RoundResolution::NoImprovement
        } else {
            RoundResolution::Greedy
        };
        record.risk_after = working_risk;
        record.rejected = rejected;
        record.issues = issues;
        record
    }

    /// Ask every at-risk classroom for a proposal and keep the valid ones
    ///
    /// Results are returned in at-risk order regardless of completion order.
    async fn collect_proposals(
        &self,
        schedule: &Schedule,
        at_risk: &[String],
        policies: &PolicyMap,
        context: &RiskContext,
        deadline: Instant,
        issues: &mut Vec<CoordinationIssue>,
    ) -> Vec<Offer> {
        let call_deadline = (Instant::now() + self.params.policy_timeout()).min(deadline);
        let round = context.round;

        let calls = at_risk.iter().map(|id| {
            let classroom = schedule.get(id).cloned();
            let policy = policies.get(id).cloned();
            async move {
                let result = match (&classroom, &policy) {
                    (Some(classroom), Some(policy)) => {
                        Some(bounded(call_deadline, policy.propose(classroom, context)).await)
                    }
                    _ => None,
                };
                (id, classroom, result)
            }
        });

        let mut proposals = Vec::new();
        for (id, classroom, result) in join_all(calls).await {
            let Some(classroom) = classroom else {
                continue;
            };
            match result {
                None => issues.push(CoordinationIssue::PolicyFailure {
                    classroom_id: id.clone(),
                    round,
                    message: "no policy registered".to_string(),
                }),
                Some(CallResult::TimedOut) => {
                    warn!(classroom = %id, round, "Policy call timed out, treating as no change");
                    issues.push(CoordinationIssue::PolicyTimeout {
                        classroom_id: id.clone(),
                        round,
                    });
                }
                Some(CallResult::Failed(err)) => {
                    warn!(classroom = %id, round, error = %err, "Policy call failed, treating as no change");
                    issues.push(CoordinationIssue::PolicyFailure {
                        classroom_id: id.clone(),
                        round,
                        message: err.to_string(),
                    });
                }
                Some(CallResult::Answered(None)) => {}
                Some(CallResult::Answered(Some(offer))) => {
                    match self.validate_offer(&offer, &classroom) {
                        Ok(true) => proposals.push(offer),
                        Ok(false) => {}
                        Err(reason) => {
                            warn!(classroom = %id, round, delta = offer.delta(), %reason, "Invalid offer rejected");
                            issues.push(CoordinationIssue::InvalidOffer {
                                classroom_id: id.clone(),
                                round,
                                delta: offer.delta(),
                                reason,
                            });
                        }
                    }
                }
            }
        }
        proposals
    }

    /// Check an offer against the classroom it claims to move
    ///
    /// `Ok(false)` means a zero-delta offer, which is just "no change".
    fn validate_offer(&self, offer: &Offer, classroom: &Classroom) -> Result<bool, String> {
        if !offer.matches(classroom) {
            return Err(format!(
                "offer does not describe {} as scheduled",
                classroom.id()
            ));
        }
        if offer.delta() == 0 {
            return Ok(false);
        }
        if offer.delta().unsigned_abs() > classroom.max_offer_delta() {
            return Err(format!(
                "|delta| exceeds flexibility bound of {} minutes",
                classroom.max_offer_delta()
            ));
        }
        if !classroom.stays_within_day(offer.delta()) {
            return Err("dismissal would cross midnight".to_string());
        }
        if !self.params.allow_override && !classroom.within_displacement_cap(offer.delta()) {
            return Err(format!(
                "cumulative displacement would exceed {} minutes",
                classroom.max_schedule_change()
            ));
        }
        Ok(true)
    }

    /// Keep the proposals that lower risk on their own
    ///
    /// Returns `(accepted, rejected)`, both in proposal order.
    fn greedy_accept(
        &self,
        schedule: &Schedule,
        risk_before: f64,
        proposals: Vec<Offer>,
    ) -> (Vec<Offer>, Vec<Offer>) {
        let threshold = risk_before - self.params.epsilon;
        let solo: Vec<f64> = proposals
            .iter()
            .map(|p| self.risk_model.risk_of(&schedule.with_offers([p])))
            .collect();

        let profitable: Vec<usize> = (0..proposals.len()).filter(|i| solo[*i] < threshold).collect();
        if profitable.is_empty() {
            return (Vec::new(), proposals);
        }

        let together = schedule.with_offers(profitable.iter().map(|i| &proposals[*i]));
        let keep: Vec<usize> = if self.risk_model.risk_of(&together) < threshold {
            profitable
        } else {
            let best = profitable
                .iter()
                .copied()
                .fold(profitable[0], |best, i| if solo[i] < solo[best] { i } else { best });
            vec![best]
        };

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for (i, proposal) in proposals.into_iter().enumerate() {
            if keep.contains(&i) {
                accepted.push(proposal);
            } else {
                rejected.push(proposal);
            }
        }
        (accepted, rejected)
    }

    // ========================================================================
    // Counter-offers
    // ========================================================================

    /// Build and put counter-offers to the classrooms whose proposals were rejected
    #[allow(clippy::too_many_arguments)]
    async fn counter_offer_round(
        &self,
        working: &Schedule,
        working_risk: f64,
        rejected: &[Offer],
        policies: &PolicyMap,
        round: usize,
        deadline: Instant,
        issues: &mut Vec<CoordinationIssue>,
    ) -> Vec<(Offer, Decision)> {
        let counters: Vec<(Offer, Arc<dyn AgentPolicy>, Classroom)> = rejected
            .iter()
            .filter_map(|r| {
                let classroom = working.get(r.classroom_id())?;
                let policy = policies.get(r.classroom_id())?;
                let offer = self.build_counter_offer(working, working_risk, classroom, round)?;
                Some((offer, Arc::clone(policy), classroom.clone()))
            })
            .collect();

        if counters.is_empty() {
            return Vec::new();
        }

        let call_deadline = (Instant::now() + self.params.policy_timeout()).min(deadline);
        let calls = counters.into_iter().map(|(offer, policy, classroom)| async move {
            let result = bounded(call_deadline, policy.decide(&offer, &classroom)).await;
            (offer, result)
        });

        let mut decided = Vec::new();
        for (offer, result) in join_all(calls).await {
            let classroom_id = offer.classroom_id().to_string();
            match result {
                CallResult::Answered(decision) => {
                    debug!(classroom = %classroom_id, round, delta = offer.delta(), ?decision, "Counter-offer answered");
                    decided.push((offer, decision));
                }
                CallResult::TimedOut => {
                    warn!(classroom = %classroom_id, round, "Counter-offer decision timed out");
                    issues.push(CoordinationIssue::PolicyTimeout { classroom_id, round });
                    decided.push((offer, Decision::Reject));
                }
                CallResult::Failed(err) => {
                    warn!(classroom = %classroom_id, round, error = %err, "Counter-offer decision failed");
                    issues.push(CoordinationIssue::PolicyFailure {
                        classroom_id,
                        round,
                        message: err.to_string(),
                    });
                    decided.push((offer, Decision::Reject));
                }
            }
        }
        decided
    }

    /// The bounded change to `classroom` that lowers risk the most
    ///
    /// Smaller changes win ties, earlier before later. `None` if no change
    /// within bounds improves on `working_risk` by more than epsilon.
    fn build_counter_offer(
        &self,
        working: &Schedule,
        working_risk: f64,
        classroom: &Classroom,
        round: usize,
    ) -> Option<Offer> {
        let bound = classroom.max_offer_delta() as i32;
        let mut best: Option<(i32, f64)> = None;

        for magnitude in 1..=bound {
            for delta in [-magnitude, magnitude] {
                if !classroom.stays_within_day(delta) {
                    continue;
                }
                if !self.params.allow_override && !classroom.within_displacement_cap(delta) {
                    continue;
                }
                let mut candidate = working.clone();
                candidate.apply_delta(classroom.id(), delta);
                let risk = self.risk_model.risk_of(&candidate);
                if best.map_or(true, |(_, r)| risk < r) {
                    best = Some((delta, risk));
                }
            }
        }

        best.filter(|(_, risk)| *risk < working_risk - self.params.epsilon)
            .map(|(delta, _)| Offer::new(classroom, delta, round, OfferDirection::CounterOffer))
    }
}
