//! Episode Simulator Tests
//!
//! End-to-end runs of scenarios across several dated episodes.
//!
//! Critical invariants tested:
//! - Due commitments are forced before negotiation, capped per debtor
//! - Remainders carry forward and count as violations
//! - Dangling ledger references become issues, never errors
//! - A dropped `next_episode` future leaves the simulator untouched

use chrono::{NaiveDate, NaiveTime};
use dismissal_coordinator_core::models::PendingCommitment;
use dismissal_coordinator_core::orchestrator::{
    ablation_variations, run_scenario, run_sweep, threshold_variations, ClassroomConfig,
    SimulatorCheckpoint,
};
use dismissal_coordinator_core::policy::{NoChangePolicy, ScriptedPolicy};
use dismissal_coordinator_core::{
    AgentPolicy, CommitmentLedger, CoordinationIssue, Episode, EpisodeSimulator, Event,
    NegotiationConclusion, PerformanceLevel, PolicyConfig, RiskLevel, Scenario, SimulationError,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn date(month: u32, day: u32) -> NaiveDate {
    let year = if month == 12 { 2024 } else { 2025 };
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn classroom(id: &str, students: u32, dismissal: NaiveTime, policy: PolicyConfig) -> ClassroomConfig {
    ClassroomConfig {
        id: id.to_string(),
        students,
        flexibility: 0.5,
        max_schedule_change: 15,
        dismissal,
        policy,
    }
}

fn scripted(proposals: &[i32]) -> PolicyConfig {
    PolicyConfig::Scripted {
        proposals: proposals.iter().map(|d| Some(*d)).collect(),
        accept_counter_offers: false,
        delay_ms: 0,
    }
}

fn delayed(proposal: Option<i32>, delay_ms: u64) -> PolicyConfig {
    PolicyConfig::Scripted {
        proposals: vec![proposal],
        accept_counter_offers: false,
        delay_ms,
    }
}

/// A moves early alone; B and C owe it the reciprocal shift
fn unreciprocated_scenario() -> Scenario {
    Scenario::new(
        "unreciprocated",
        100.0,
        vec![
            classroom("A", 60, at(12, 30), scripted(&[-6])),
            classroom("B", 20, at(12, 30), PolicyConfig::NoChange),
            classroom("C", 40, at(12, 30), PolicyConfig::NoChange),
        ],
    )
}

/// Two classrooms an hour apart with a roomy hallway
fn quiet_scenario() -> Scenario {
    let mut scenario = Scenario::new(
        "quiet",
        200.0,
        vec![
            classroom("A", 50, at(12, 0), PolicyConfig::NoChange),
            classroom("B", 50, at(13, 0), PolicyConfig::NoChange),
        ],
    );
    scenario.reputation.violation_threshold = 1;
    scenario
}

fn owes(debtor: &str, creditor: &str, owed_delta: i32) -> PendingCommitment {
    PendingCommitment {
        debtor_id: debtor.to_string(),
        creditor_id: creditor.to_string(),
        owed_delta,
    }
}

/// Checkpoint at episode 0 whose ledger holds `debts`, recorded the week before
fn with_debts(scenario: &Scenario, debts: &[PendingCommitment]) -> SimulatorCheckpoint {
    let mut checkpoint = EpisodeSimulator::new(scenario.clone()).unwrap().checkpoint();
    let mut ledger = CommitmentLedger::new(scenario.episodes.interval_days);
    for debt in debts {
        ledger.record(debt, date(12, 30), date(1, 6), 15).unwrap();
    }
    checkpoint.ledger = ledger;
    checkpoint
}

fn event_types(events: &[Event], episode: usize) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.episode() == episode)
        .map(|e| e.event_type())
        .collect()
}

fn moves(episode: &Episode) -> Vec<(&str, i32)> {
    episode
        .accepted_offers
        .iter()
        .map(|o| (o.classroom_id(), o.delta()))
        .collect()
}

// ============================================================================
// Reference Scenarios
// ============================================================================

#[tokio::test]
async fn test_demo_first_episode() {
    let mut simulator = EpisodeSimulator::new(Scenario::preset("demo").unwrap()).unwrap();
    let episode = simulator.next_episode().await.unwrap();

    assert_eq!(episode.date, date(1, 6));
    assert!((episode.initial_risk() - 235.0 / 150.0).abs() < 1e-9);
    assert_eq!(episode.initial_assessment.level(), RiskLevel::Critical);
    assert_eq!(episode.final_risk(), 0.0);
    assert!(episode.success);
    assert_eq!(episode.performance, PerformanceLevel::Excellent);
    assert_eq!(episode.conclusion, NegotiationConclusion::ThresholdReached);
    assert_eq!(moves(&episode), vec![("C101", -6), ("C103", 6)]);
    assert_eq!(episode.agents_participated(), 2);
    assert!(episode.commitments_created.is_empty());

    // The negotiated schedule is what the next episode starts from
    assert_eq!(simulator.schedule(), &episode.schedule_after);
    assert_eq!(
        simulator.schedule().get("C103").unwrap().scheduled_dismissal(),
        at(12, 36)
    );

    let report = serde_json::to_value(episode.report()).unwrap();
    assert_eq!(report["accepted_offers"][0]["before"], "12:30");
    assert_eq!(report["accepted_offers"][0]["after"], "12:24");
    assert_eq!(report["performance"], "excellent");
}

#[tokio::test]
async fn test_demo_event_sequence() {
    let mut simulator = EpisodeSimulator::new(Scenario::preset("demo").unwrap()).unwrap();
    simulator.next_episode().await.unwrap();

    assert_eq!(
        event_types(simulator.event_log().events(), 0),
        vec![
            "EpisodeStarted",
            "RiskAssessed",
            "RoundStarted",
            "OfferAccepted",
            "OfferAccepted",
            "RiskAssessed",
            "EpisodeConcluded",
        ]
    );
}

#[tokio::test]
async fn test_documented_example_moves() {
    let mut scenario = Scenario::preset("demo").unwrap();
    scenario.classrooms[0].policy = scripted(&[-10]);
    scenario.classrooms[1].policy = scripted(&[5]);
    scenario.classrooms[2].policy = scripted(&[10]);
    let mut simulator = EpisodeSimulator::new(scenario).unwrap();

    let episode = simulator.next_episode().await.unwrap();
    assert_eq!(moves(&episode), vec![("C101", -10), ("C102", 5), ("C103", 10)]);
    assert!((episode.final_risk() - 155.0 / 150.0).abs() < 1e-9);
    assert!(episode.final_risk() <= 1.10);
    assert!(episode.success);
    // Round 2 finds no further proposals
    assert_eq!(episode.conclusion, NegotiationConclusion::Stalled);
    assert_eq!(episode.rounds.len(), 2);
}

#[tokio::test]
async fn test_unreciprocated_move_is_repaid_next_week() {
    let mut simulator = EpisodeSimulator::new(unreciprocated_scenario()).unwrap();

    let first = simulator.next_episode().await.unwrap();
    let created: Vec<(&str, &str, i32, NaiveDate)> = first
        .commitments_created
        .iter()
        .map(|c| (c.debtor_id(), c.creditor_id(), c.owed_delta(), c.due_episode()))
        .collect();
    assert_eq!(
        created,
        vec![("B", "A", 2, date(1, 13)), ("C", "A", 4, date(1, 13))]
    );
    assert_eq!(simulator.ledger().pending_count(), 2);

    let second = simulator.next_episode().await.unwrap();
    assert_eq!(second.date, date(1, 13));
    assert_eq!(second.commitments_fulfilled().count(), 2);
    assert_eq!(
        second.schedule_before.get("B").unwrap().scheduled_dismissal(),
        at(12, 32)
    );
    assert_eq!(
        second.schedule_before.get("C").unwrap().scheduled_dismissal(),
        at(12, 34)
    );
    assert_eq!(second.conclusion, NegotiationConclusion::NotNeeded);
    let report = second.report();
    assert!(report
        .commitments_fulfilled
        .iter()
        .any(|c| c.debtor_id == "B" && c.applied_delta == Some(2) && c.fulfilled));
    assert_eq!(simulator.ledger().pending_count(), 0);
    assert_eq!(simulator.ledger().net_owed("C", "A"), 0);

    let applied: Vec<i32> = simulator
        .event_log()
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::CommitmentApplied {
                applied_delta,
                fulfilled: true,
                ..
            } => Some(*applied_delta),
            _ => None,
        })
        .collect();
    assert_eq!(applied, vec![2, 4]);
}

// ============================================================================
// Commitment Enforcement
// ============================================================================

#[tokio::test]
async fn test_over_budget_debt_carries_forward_and_flags() {
    let scenario = quiet_scenario();
    let checkpoint = with_debts(&scenario, &[owes("A", "B", 10), owes("A", "B", 8)]);
    let mut simulator = EpisodeSimulator::restore(scenario, checkpoint).unwrap();

    let first = simulator.next_episode().await.unwrap();
    let applied: Vec<i32> = first
        .commitments_resolved
        .iter()
        .map(|r| r.applied_delta)
        .collect();
    assert_eq!(applied, vec![10, 5]);
    let carried = first.commitments_resolved[1]
        .carried_forward
        .clone()
        .expect("remainder carried");
    assert_eq!(carried.owed_delta(), 3);
    assert_eq!(carried.due_episode(), date(1, 13));
    assert_eq!(first.flagged_classrooms, vec!["A".to_string()]);
    // A partial repayment still fulfils the original commitment
    assert_eq!(first.report().commitments_fulfilled.len(), 2);

    let room = simulator.schedule().get("A").unwrap();
    assert_eq!(room.scheduled_dismissal(), at(12, 15));
    assert_eq!(room.violation_count(), 1);
    assert!((room.reputation() - 0.8).abs() < 1e-9);

    // Fully displaced: nothing more fits, the remainder moves again
    let second = simulator.next_episode().await.unwrap();
    assert_eq!(second.commitments_resolved.len(), 1);
    assert_eq!(second.commitments_resolved[0].applied_delta, 0);
    let report = second.report();
    assert_eq!(report.commitments_resolved.len(), 1);
    assert!(!report.commitments_resolved[0].fulfilled);
    assert!(report.commitments_fulfilled.is_empty());
    assert!(second.flagged_classrooms.is_empty());
    assert_eq!(simulator.schedule().get("A").unwrap().violation_count(), 2);
    assert_eq!(
        event_types(simulator.event_log().events(), 1),
        vec![
            "EpisodeStarted",
            "CommitmentCarriedForward",
            "RiskAssessed",
            "RiskAssessed",
            "EpisodeConcluded",
        ]
    );
    assert_eq!(simulator.ledger().net_owed("A", "B"), 3);
    assert_eq!(simulator.ledger().due_this_episode(date(1, 20)).len(), 1);
}

#[tokio::test]
async fn test_unknown_debtor_is_reported_not_fatal() {
    let scenario = quiet_scenario();
    let checkpoint = with_debts(&scenario, &[owes("Z", "A", 4)]);
    let mut simulator = EpisodeSimulator::restore(scenario, checkpoint).unwrap();

    let episode = simulator.next_episode().await.unwrap();
    assert!(matches!(
        episode.issues.as_slice(),
        [CoordinationIssue::LedgerInconsistency { classroom_id, .. }] if classroom_id == "Z"
    ));
    assert!(episode.commitments_resolved.is_empty());
    assert_eq!(simulator.ledger().pending_count(), 1);

    // Still outstanding, so still reported
    let next = simulator.next_episode().await.unwrap();
    assert_eq!(next.issues.len(), 1);
}

// ============================================================================
// Deadlines and Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_policies_time_out() {
    let mut scenario = Scenario::preset("demo").unwrap();
    for room in &mut scenario.classrooms {
        room.policy = delayed(Some(-6), 200_000);
    }
    let mut simulator = EpisodeSimulator::new(scenario).unwrap();

    let episode = simulator.next_episode().await.unwrap();
    assert_eq!(episode.issues.len(), 3);
    assert!(episode
        .issues
        .iter()
        .all(|i| matches!(i, CoordinationIssue::PolicyTimeout { round: 1, .. })));
    assert_eq!(episode.conclusion, NegotiationConclusion::Stalled);
    assert_eq!(episode.final_risk(), episode.initial_risk());
    assert_eq!(episode.schedule_after, episode.schedule_before);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_episode_leaves_state_unchanged() {
    let mut scenario = Scenario::preset("demo").unwrap();
    scenario.classrooms[0].policy = delayed(Some(-6), 50_000);
    scenario.classrooms[1].policy = delayed(None, 50_000);
    scenario.classrooms[2].policy = delayed(Some(6), 50_000);
    let mut simulator = EpisodeSimulator::new(scenario).unwrap();
    let before = simulator.checkpoint();

    let cancelled = tokio::time::timeout(Duration::from_secs(1), simulator.next_episode()).await;
    assert!(cancelled.is_err());

    assert_eq!(simulator.next_episode_index(), 0);
    assert!(simulator.event_log().is_empty());
    assert_eq!(simulator.checkpoint(), before);

    // The same episode runs normally afterwards
    let episode = simulator.next_episode().await.unwrap();
    assert_eq!(episode.index, 0);
    assert_eq!(episode.final_risk(), 0.0);
    assert_eq!(moves(&episode), vec![("C101", -6), ("C103", 6)]);
    assert_eq!(simulator.next_episode_index(), 1);
}

// ============================================================================
// Sequencing
// ============================================================================

#[tokio::test]
async fn test_stream_yields_dated_episodes() {
    let simulator = EpisodeSimulator::new(Scenario::preset("demo").unwrap()).unwrap();
    let episodes: Vec<Episode> = simulator
        .into_stream(3)
        .map(|e| e.unwrap())
        .collect()
        .await;

    let dates: Vec<NaiveDate> = episodes.iter().map(|e| e.date).collect();
    assert_eq!(dates, vec![date(1, 6), date(1, 13), date(1, 20)]);

    // Once staggered, later episodes stay below capacity
    assert!(episodes[1..]
        .iter()
        .all(|e| e.conclusion == NegotiationConclusion::NotNeeded));
}

#[tokio::test]
async fn test_run_scenario_uses_requested_spacing() {
    let episodes = run_scenario(Scenario::preset("stress").unwrap(), 3, 1)
        .await
        .unwrap();

    assert_eq!(episodes.len(), 3);
    assert_eq!(episodes[2].date, date(1, 8));
    assert!(episodes
        .iter()
        .all(|e| e.final_risk() <= e.initial_risk()));
}

#[tokio::test]
async fn test_run_to_end_stops_at_episode_count() {
    let mut scenario = Scenario::preset("balanced").unwrap();
    scenario.episodes.episode_count = 2;
    let mut simulator = EpisodeSimulator::new(scenario).unwrap();

    assert_eq!(simulator.run_to_end().await.unwrap().len(), 2);
    assert_eq!(simulator.remaining_episodes(), 0);
    assert!(simulator.run_to_end().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_injected_policies_replace_configured_ones() {
    let idle: Arc<dyn AgentPolicy> = Arc::new(NoChangePolicy);
    let mut simulator = EpisodeSimulator::new(Scenario::preset("demo").unwrap())
        .unwrap()
        .with_policy("C101", idle.clone())
        .unwrap()
        .with_policy("C102", idle.clone())
        .unwrap()
        .with_policy("C103", idle)
        .unwrap();

    let episode = simulator.next_episode().await.unwrap();
    assert_eq!(episode.conclusion, NegotiationConclusion::Stalled);
    assert_eq!(episode.rounds.len(), 1);
    assert!(episode.accepted_offers.is_empty());
    assert!(!episode.success);
    assert_eq!(episode.performance, PerformanceLevel::Poor);
}

#[tokio::test]
async fn test_scripted_policy_instance_can_be_injected() {
    let policy: Arc<dyn AgentPolicy> = Arc::new(ScriptedPolicy::new(vec![Some(-6)]));
    let mut simulator = EpisodeSimulator::new(unreciprocated_scenario())
        .unwrap()
        .with_policy("B", policy)
        .unwrap();

    // A and B both leave; C alone stays at 12:30
    let episode = simulator.next_episode().await.unwrap();
    assert_eq!(episode.final_risk(), 0.0);
    assert!(episode.accepted_offers.iter().any(|o| o.classroom_id() == "B"));
}

// ============================================================================
// Sweeps
// ============================================================================

#[tokio::test]
async fn test_ablation_compares_against_no_change_baseline() {
    let demo = Scenario::preset("demo").unwrap();
    let rows = run_sweep(&demo, &ablation_variations(), 2).await.unwrap();

    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names[0], "baseline");
    assert_eq!(rows.len(), ablation_variations().len());

    let row = |name: &str| rows.iter().find(|r| r.name == name).unwrap();
    let idle = row("no_change");
    assert_eq!(idle.offers_accepted, 0);
    assert_eq!(idle.successes, 0);
    assert!((idle.final_risk - 235.0 / 150.0).abs() < 1e-9);

    let baseline = row("baseline");
    assert!((baseline.initial_risk - 235.0 / 150.0).abs() < 1e-9);
    assert_eq!(baseline.final_risk, 0.0);
    assert!(baseline.successes >= 1);
    assert!(baseline.agents_participated >= 2);
    assert!(baseline.mean_risk_reduction > idle.mean_risk_reduction);
}

#[tokio::test]
async fn test_threshold_above_risk_skips_negotiation() {
    let demo = Scenario::preset("demo").unwrap();
    let rows = run_sweep(&demo, &threshold_variations(&[0.5, 2.0]), 1)
        .await
        .unwrap();

    assert_eq!(rows[0].name, "threshold=0.5");
    assert_eq!(rows[0].final_risk, 0.0);
    assert_eq!(rows[1].name, "threshold=2");
    assert_eq!(rows[1].offers_accepted, 0);
    assert_eq!(rows[1].final_risk, rows[1].initial_risk);
}

#[tokio::test]
async fn test_invalid_variation_fails_the_sweep() {
    let demo = Scenario::preset("demo").unwrap();
    assert!(matches!(
        run_sweep(&demo, &threshold_variations(&[-1.0]), 1).await,
        Err(SimulationError::Config(_))
    ));
}
