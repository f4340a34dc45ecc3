//! Episode Simulator
//!
//! Drives a scenario through a sequence of dated episodes. Each episode:
//!
//! ```text
//! 1. Apply commitments due on this date (capped per debtor, carry the rest)
//! 2. Update reputations, flag repeat violators
//! 3. Assess baseline risk
//! 4. Negotiate (concurrent policy calls, bounded by deadlines)
//! 5. Record reciprocal commitments due next episode
//! 6. Assess final risk, classify performance, log events
//! 7. Persist a checkpoint (when a store is attached)
//! ```
//!
//! Everything up to the negotiation is computed on a draft; the simulator's
//! own state is only replaced once the episode is complete. Dropping a
//! `next_episode` future mid-negotiation therefore leaves the simulator
//! exactly as it was.
//!
//! # Example
//!
//! ```rust
//! use dismissal_coordinator_core::orchestrator::{EpisodeSimulator, Scenario};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let mut simulator = EpisodeSimulator::new(Scenario::preset("demo").unwrap()).unwrap();
//! let episode = simulator.next_episode().await.unwrap();
//!
//! assert!(episode.final_risk() < episode.initial_risk());
//! assert_eq!(simulator.next_episode_index(), 1);
//! # });
//! ```

use crate::core::time::EpisodeCalendar;
use crate::ledger::{capped_delta, CommitmentLedger, LedgerError};
use crate::models::commitment::Commitment;
use crate::models::episode::{CommitmentResolution, CoordinationIssue, Episode, PerformanceLevel};
use crate::models::event::{Event, EventLog};
use crate::models::schedule::Schedule;
use crate::negotiation::{NegotiationCoordinator, NegotiationOutcome, PolicyMap};
use crate::orchestrator::checkpoint::{
    compute_config_hash, validate_checkpoint, CheckpointError, SimulatorCheckpoint,
};
use crate::orchestrator::config::{ConfigError, Scenario};
use crate::orchestrator::store::{StateStore, StoreError};
use crate::policy::{create_policy, AgentPolicy};
use crate::risk::RiskAssessment;
use chrono::NaiveDate;
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Fatal simulation errors
///
/// Recoverable coordination failures (timeouts, malformed offers, dangling
/// ledger references) never surface here; they are reported on the episode.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid scenario: {0}")]
    Config(#[from] ConfigError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown classroom: {0}")]
    UnknownClassroom(String),
}

// ============================================================================
// Simulator
// ============================================================================

/// Runs a scenario episode by episode
pub struct EpisodeSimulator {
    scenario: Scenario,
    config_hash: String,
    run_id: Uuid,
    calendar: EpisodeCalendar,
    coordinator: NegotiationCoordinator,
    policies: PolicyMap,

    /// Carried between episodes
    schedule: Schedule,
    ledger: CommitmentLedger,
    next_episode: usize,

    event_log: EventLog,
    store: Option<Arc<dyn StateStore>>,
}

/// Working copy of one episode's state
struct EpisodeDraft {
    index: usize,
    date: NaiveDate,
    schedule: Schedule,
    ledger: CommitmentLedger,
    events: Vec<Event>,
    issues: Vec<CoordinationIssue>,
    flagged: Vec<String>,
    resolved: Vec<CommitmentResolution>,
    created: Vec<Commitment>,
}

impl EpisodeSimulator {
    /// Create a simulator at episode 0
    ///
    /// Validates the scenario and instantiates each classroom's configured policy.
    pub fn new(scenario: Scenario) -> Result<Self, SimulationError> {
        scenario.validate()?;
        let schedule = scenario.build_schedule();
        let ledger = CommitmentLedger::new(scenario.episodes.interval_days);
        Self::assemble(scenario, Uuid::new_v4(), schedule, ledger, 0)
    }

    /// Resume from a checkpoint saved with the same scenario
    pub fn restore(
        scenario: Scenario,
        checkpoint: SimulatorCheckpoint,
    ) -> Result<Self, SimulationError> {
        scenario.validate()?;
        validate_checkpoint(&checkpoint, &scenario)?;
        info!(
            run_id = %checkpoint.run_id,
            next_episode = checkpoint.next_episode,
            pending = checkpoint.ledger.pending_count(),
            "Restoring simulator from checkpoint"
        );
        Self::assemble(
            scenario,
            checkpoint.run_id,
            Schedule::new(checkpoint.classrooms),
            checkpoint.ledger,
            checkpoint.next_episode,
        )
    }

    /// Resume from `store` if it holds a checkpoint, otherwise start fresh
    ///
    /// The store stays attached and receives a checkpoint after every episode.
    pub fn resume(
        scenario: Scenario,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, SimulationError> {
        let simulator = match store.load()? {
            Some(checkpoint) => Self::restore(scenario, checkpoint)?,
            None => Self::new(scenario)?,
        };
        Ok(simulator.with_store(store))
    }

    fn assemble(
        scenario: Scenario,
        run_id: Uuid,
        schedule: Schedule,
        ledger: CommitmentLedger,
        next_episode: usize,
    ) -> Result<Self, SimulationError> {
        let config_hash = compute_config_hash(&scenario)?;
        let policies: PolicyMap = scenario
            .classrooms
            .iter()
            .map(|c| (c.id.clone(), create_policy(&c.policy)))
            .collect();
        let coordinator =
            NegotiationCoordinator::new(scenario.risk_model(), scenario.negotiation.clone());

        Ok(Self {
            calendar: scenario.calendar(),
            scenario,
            config_hash,
            run_id,
            coordinator,
            policies,
            schedule,
            ledger,
            next_episode,
            event_log: EventLog::new(),
            store: None,
        })
    }

    /// Replace one classroom's policy (e.g. with an externally backed agent)
    pub fn with_policy(
        mut self,
        classroom_id: &str,
        policy: Arc<dyn AgentPolicy>,
    ) -> Result<Self, SimulationError> {
        match self.policies.get_mut(classroom_id) {
            Some(slot) => {
                *slot = policy;
                Ok(self)
            }
            None => Err(SimulationError::UnknownClassroom(classroom_id.to_string())),
        }
    }

    /// Persist a checkpoint to `store` after every completed episode
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn calendar(&self) -> &EpisodeCalendar {
        &self.calendar
    }

    /// Schedule the next episode will start from
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn ledger(&self) -> &CommitmentLedger {
        &self.ledger
    }

    /// Events of every episode completed by this simulator instance
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn next_episode_index(&self) -> usize {
        self.next_episode
    }

    /// Episodes left before `episodes.episode_count` is reached
    pub fn remaining_episodes(&self) -> usize {
        self.scenario
            .episodes
            .episode_count
            .saturating_sub(self.next_episode)
    }

    /// Snapshot of the state carried into the next episode
    pub fn checkpoint(&self) -> SimulatorCheckpoint {
        SimulatorCheckpoint {
            run_id: self.run_id,
            next_episode: self.next_episode,
            classrooms: self.schedule.classrooms().to_vec(),
            ledger: self.ledger.clone(),
            config_hash: self.config_hash.clone(),
        }
    }

    // ========================================================================
    // Episode Execution
    // ========================================================================

    /// Simulate the next episode
    ///
    /// Cancellation safe: if the returned future is dropped before it
    /// completes, no state has changed.
    pub async fn next_episode(&mut self) -> Result<Episode, SimulationError> {
        let index = self.next_episode;
        let date = self.calendar.date_of(index);
        info!(episode = index, %date, "Episode started");

        let mut draft = EpisodeDraft {
            index,
            date,
            schedule: self.schedule.clone(),
            ledger: self.ledger.clone(),
            events: vec![Event::EpisodeStarted {
                episode: index,
                date,
                classrooms: self.schedule.len(),
            }],
            issues: Vec::new(),
            flagged: Vec::new(),
            resolved: Vec::new(),
            created: Vec::new(),
        };

        self.apply_due_commitments(&mut draft)?;
        let schedule_before = draft.schedule.clone();

        let outcome = self
            .coordinator
            .negotiate(&draft.schedule, &self.policies, index, date)
            .await;

        self.record_outcome(&mut draft, &outcome)?;
        let episode = self.conclude(draft, schedule_before, outcome)?;
        Ok(episode)
    }

    /// Force due commitments onto their debtors
    fn apply_due_commitments(&self, draft: &mut EpisodeDraft) -> Result<(), SimulationError> {
        let reputation = &self.scenario.reputation;
        let mut budget: HashMap<String, u32> = HashMap::new();

        for commitment in draft.ledger.due_this_episode(draft.date) {
            let debtor_id = commitment.debtor_id().to_string();
            let missing = [commitment.debtor_id(), commitment.creditor_id()]
                .into_iter()
                .find(|id| !draft.schedule.contains(id));
            if let Some(missing) = missing {
                warn!(
                    commitment = %commitment.id(),
                    classroom = missing,
                    "Due commitment references unknown classroom, skipping"
                );
                let issue = CoordinationIssue::LedgerInconsistency {
                    commitment_id: commitment.id(),
                    classroom_id: missing.to_string(),
                };
                draft.events.push(Event::CoordinationIssue {
                    episode: draft.index,
                    issue: issue.clone(),
                });
                draft.issues.push(issue);
                continue;
            }

            let Some(room) = draft.schedule.get(&debtor_id) else {
                continue;
            };
            let owed = commitment.owed_delta();
            let left = budget
                .get(&debtor_id)
                .copied()
                .unwrap_or_else(|| room.max_schedule_change());
            let applied = capped_delta(owed, left, room.headroom(owed));

            if applied != 0 {
                draft.schedule.apply_delta(&debtor_id, applied);
            }
            budget.insert(debtor_id.clone(), left - applied.unsigned_abs());

            let resolution = draft.ledger.resolve(commitment.id(), applied, draft.date)?;
            debug!(
                commitment = %commitment.id(),
                debtor = %debtor_id,
                owed,
                applied,
                "Applied due commitment"
            );

            if applied != 0 {
                draft.events.push(Event::CommitmentApplied {
                    episode: draft.index,
                    commitment_id: commitment.id(),
                    debtor_id: debtor_id.clone(),
                    creditor_id: commitment.creditor_id().to_string(),
                    applied_delta: applied,
                    fulfilled: resolution.carried_forward.is_none(),
                });
            }

            if let Some(room) = draft.schedule.get_mut(&debtor_id) {
                match &resolution.carried_forward {
                    None => room.record_fulfilment(reputation.fulfillment_bonus),
                    Some(carried) => {
                        draft.events.push(Event::CommitmentCarriedForward {
                            episode: draft.index,
                            commitment_id: commitment.id(),
                            debtor_id: debtor_id.clone(),
                            remaining_delta: carried.owed_delta(),
                            new_due: carried.due_episode(),
                        });

                        let violations = room.record_violation(reputation.violation_penalty);
                        if violations == reputation.violation_threshold {
                            warn!(classroom = %debtor_id, violations, "Classroom flagged");
                            draft.events.push(Event::ClassroomFlagged {
                                episode: draft.index,
                                classroom_id: debtor_id.clone(),
                                violation_count: violations,
                            });
                            draft.flagged.push(debtor_id.clone());
                        }
                    }
                }
            }

            draft.resolved.push(resolution);
        }

        Ok(())
    }

    /// Convert the negotiation trace to events and record new debts
    fn record_outcome(
        &self,
        draft: &mut EpisodeDraft,
        outcome: &NegotiationOutcome,
    ) -> Result<(), SimulationError> {
        let episode = draft.index;
        draft
            .events
            .push(risk_event(episode, "initial", &outcome.initial_assessment));

        for round in &outcome.rounds {
            draft.events.push(Event::RoundStarted {
                episode,
                round: round.round,
                risk: round.risk_before,
                at_risk: round.at_risk.clone(),
            });
            for issue in &round.issues {
                draft.events.push(Event::CoordinationIssue {
                    episode,
                    issue: issue.clone(),
                });
            }
            for offer in &round.accepted {
                draft.events.push(Event::OfferAccepted {
                    episode,
                    round: round.round,
                    classroom_id: offer.classroom_id().to_string(),
                    delta: offer.delta(),
                    direction: offer.direction(),
                });
            }
            for offer in &round.rejected {
                draft.events.push(Event::OfferRejected {
                    episode,
                    round: round.round,
                    classroom_id: offer.classroom_id().to_string(),
                    delta: offer.delta(),
                });
            }
            for counter in &round.counter_offers {
                draft.events.push(Event::CounterOfferDecided {
                    episode,
                    round: round.round,
                    classroom_id: counter.offer.classroom_id().to_string(),
                    delta: counter.offer.delta(),
                    accepted: counter.accepted,
                });
            }
        }
        draft.issues.extend(outcome.issues().cloned());

        let due = self.calendar.next_after(draft.date);
        for pending in &outcome.pending_commitments {
            let Some(debtor) = outcome.final_schedule.get(&pending.debtor_id) else {
                return Err(SimulationError::UnknownClassroom(pending.debtor_id.clone()));
            };
            let commitment = draft
                .ledger
                .record(pending, draft.date, due, debtor.max_schedule_change())?
                .clone();
            info!(
                commitment = %commitment.id(),
                debtor = commitment.debtor_id(),
                creditor = commitment.creditor_id(),
                owed = commitment.owed_delta(),
                %due,
                "Commitment recorded"
            );
            draft.events.push(Event::CommitmentRecorded {
                episode,
                commitment_id: commitment.id(),
                debtor_id: commitment.debtor_id().to_string(),
                creditor_id: commitment.creditor_id().to_string(),
                owed_delta: commitment.owed_delta(),
                due,
            });
            draft.created.push(commitment);
        }

        draft
            .events
            .push(risk_event(episode, "final", &outcome.final_assessment));
        draft.events.push(Event::EpisodeConcluded {
            episode,
            initial_risk: outcome.initial_risk(),
            final_risk: outcome.final_risk(),
            rounds: outcome.rounds_used(),
            success: outcome.success,
            conclusion: outcome.conclusion,
        });
        Ok(())
    }

    /// Persist, then commit the draft as the simulator's new state
    fn conclude(
        &mut self,
        draft: EpisodeDraft,
        schedule_before: Schedule,
        outcome: NegotiationOutcome,
    ) -> Result<Episode, SimulationError> {
        if let Some(store) = &self.store {
            store.save(&SimulatorCheckpoint {
                run_id: self.run_id,
                next_episode: draft.index + 1,
                classrooms: outcome.final_schedule.classrooms().to_vec(),
                ledger: draft.ledger.clone(),
                config_hash: self.config_hash.clone(),
            })?;
        }

        let reduction = (outcome.initial_risk() - outcome.final_risk()).max(0.0);
        let performance = PerformanceLevel::classify(reduction, &self.scenario.performance);
        info!(
            episode = draft.index,
            initial_risk = outcome.initial_risk(),
            final_risk = outcome.final_risk(),
            rounds = outcome.rounds_used(),
            conclusion = ?outcome.conclusion,
            success = outcome.success,
            "Episode concluded"
        );

        self.schedule = outcome.final_schedule.clone();
        self.ledger = draft.ledger;
        self.event_log.extend(draft.events);
        self.next_episode = draft.index + 1;

        Ok(Episode {
            index: draft.index,
            date: draft.date,
            schedule_before,
            schedule_after: outcome.final_schedule,
            initial_assessment: outcome.initial_assessment,
            final_assessment: outcome.final_assessment,
            accepted_offers: outcome.accepted_offers,
            rounds: outcome.rounds,
            conclusion: outcome.conclusion,
            success: outcome.success,
            commitments_created: draft.created,
            commitments_resolved: draft.resolved,
            flagged_classrooms: draft.flagged,
            issues: draft.issues,
            performance,
        })
    }

    // ========================================================================
    // Sequencing
    // ========================================================================

    /// Simulate `count` episodes
    pub async fn run(&mut self, count: usize) -> Result<Vec<Episode>, SimulationError> {
        let mut episodes = Vec::with_capacity(count);
        for _ in 0..count {
            episodes.push(self.next_episode().await?);
        }
        Ok(episodes)
    }

    /// Simulate the episodes remaining in the scenario's `episode_count`
    pub async fn run_to_end(&mut self) -> Result<Vec<Episode>, SimulationError> {
        self.run(self.remaining_episodes()).await
    }

    /// Lazy stream of the next `count` episodes
    ///
    /// Ends early after yielding the first error.
    pub fn into_stream(
        self,
        count: usize,
    ) -> impl Stream<Item = Result<Episode, SimulationError>> {
        stream::unfold(
            (self, 0usize, false),
            move |(mut simulator, produced, failed)| async move {
                if failed || produced >= count {
                    return None;
                }
                match simulator.next_episode().await {
                    Ok(episode) => Some((Ok(episode), (simulator, produced + 1, false))),
                    Err(e) => Some((Err(e), (simulator, produced, true))),
                }
            },
        )
    }
}

/// Run `episode_count` episodes spaced `interval_days` apart
pub async fn run_scenario(
    mut scenario: Scenario,
    episode_count: usize,
    interval_days: u32,
) -> Result<Vec<Episode>, SimulationError> {
    scenario.episodes.episode_count = episode_count;
    scenario.episodes.interval_days = interval_days;
    EpisodeSimulator::new(scenario)?.run_to_end().await
}

fn risk_event(episode: usize, stage: &str, assessment: &RiskAssessment) -> Event {
    Event::RiskAssessed {
        episode,
        stage: stage.to_string(),
        risk: assessment.risk(),
        peak_load: assessment.peak_load(),
        level: assessment.level(),
    }
}
