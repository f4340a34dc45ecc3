//! Checkpoint Tests - Save/Resume Simulator State
//!
//! Runs are stopped after an episode and resumed from an attached store.
//!
//! Critical invariants tested:
//! - Determinism: a resumed run produces the same reports as an uninterrupted one
//! - Ledger conservation: outstanding commitments survive save/load
//! - Config matching: state from a different scenario is rejected
//! - Atomicity: a failed save leaves the simulator on the previous episode

use chrono::NaiveTime;
use dismissal_coordinator_core::orchestrator::{
    CheckpointError, ClassroomConfig, InMemoryStore, JsonFileStore, SimulatorCheckpoint,
    StateStore, StoreError,
};
use dismissal_coordinator_core::{
    EpisodeReport, EpisodeSimulator, PolicyConfig, Scenario, SimulationError,
};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn room(id: &str, students: u32, policy: PolicyConfig) -> ClassroomConfig {
    ClassroomConfig {
        id: id.to_string(),
        students,
        flexibility: 0.5,
        max_schedule_change: 15,
        dismissal: NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
        policy,
    }
}

/// Leaves two commitments outstanding after episode 0
fn indebted_scenario() -> Scenario {
    Scenario::new(
        "indebted",
        100.0,
        vec![
            room(
                "A",
                60,
                PolicyConfig::Scripted {
                    proposals: vec![Some(-6)],
                    accept_counter_offers: false,
                    delay_ms: 0,
                },
            ),
            room("B", 20, PolicyConfig::NoChange),
            room("C", 40, PolicyConfig::NoChange),
        ],
    )
}

/// Stays put in episode 0 and moves earlier in episode 1
fn late_mover_scenario() -> Scenario {
    Scenario::new(
        "late_mover",
        100.0,
        vec![
            room(
                "A",
                60,
                PolicyConfig::Scripted {
                    proposals: vec![None, Some(-6)],
                    accept_counter_offers: false,
                    delay_ms: 0,
                },
            ),
            room("B", 20, PolicyConfig::NoChange),
            room("C", 40, PolicyConfig::NoChange),
        ],
    )
}

async fn reports(simulator: &mut EpisodeSimulator, count: usize) -> Vec<EpisodeReport> {
    simulator
        .run(count)
        .await
        .unwrap()
        .iter()
        .map(|e| e.report())
        .collect()
}

struct FailingStore;

impl StateStore for FailingStore {
    fn load(&self) -> Result<Option<SimulatorCheckpoint>, StoreError> {
        Ok(None)
    }

    fn save(&self, _checkpoint: &SimulatorCheckpoint) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resumed_run_matches_uninterrupted_run() {
    let mut uninterrupted = EpisodeSimulator::new(indebted_scenario()).unwrap();
    let expected = reports(&mut uninterrupted, 3).await;

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let mut first = EpisodeSimulator::resume(indebted_scenario(), store.clone()).unwrap();
    let mut actual = reports(&mut first, 1).await;
    let run_id = first.run_id();
    drop(first);

    let mut second = EpisodeSimulator::resume(indebted_scenario(), store.clone()).unwrap();
    assert_eq!(second.run_id(), run_id);
    assert_eq!(second.next_episode_index(), 1);
    assert_eq!(second.ledger().pending_count(), 2);
    actual.extend(reports(&mut second, 2).await);

    assert_eq!(actual, expected);
    assert_eq!(store.load().unwrap().unwrap().next_episode, 3);
}

#[tokio::test]
async fn test_resume_continues_scripted_proposals() {
    let mut uninterrupted = EpisodeSimulator::new(late_mover_scenario()).unwrap();
    let expected = reports(&mut uninterrupted, 2).await;
    assert_eq!(expected[0].accepted_offers.len(), 0);
    assert_eq!(expected[1].accepted_offers.len(), 1);
    assert_eq!(expected[1].final_risk, 0.0);

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let mut first = EpisodeSimulator::resume(late_mover_scenario(), store.clone()).unwrap();
    let mut actual = reports(&mut first, 1).await;
    drop(first);

    let mut second = EpisodeSimulator::resume(late_mover_scenario(), store).unwrap();
    actual.extend(reports(&mut second, 1).await);

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_json_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");

    let store = Arc::new(JsonFileStore::new(&path));
    assert!(store.load().unwrap().is_none());

    let mut simulator = EpisodeSimulator::resume(indebted_scenario(), store.clone()).unwrap();
    assert_eq!(simulator.next_episode_index(), 0);
    simulator.next_episode().await.unwrap();
    assert!(path.exists());

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved, simulator.checkpoint());
    assert_eq!(saved.ledger.net_owed("C", "A"), 4);

    let resumed = EpisodeSimulator::resume(indebted_scenario(), store).unwrap();
    assert_eq!(resumed.next_episode_index(), 1);
    assert_eq!(resumed.schedule(), simulator.schedule());
}

#[test]
fn test_checkpoint_json_round_trip() {
    let simulator = EpisodeSimulator::new(Scenario::preset("stress").unwrap()).unwrap();
    let checkpoint = simulator.checkpoint();

    let json = checkpoint.to_json().unwrap();
    assert_eq!(SimulatorCheckpoint::from_json(&json).unwrap(), checkpoint);
    assert!(matches!(
        SimulatorCheckpoint::from_json("{\"run_id\": 7}"),
        Err(CheckpointError::Serialization(_))
    ));
}

// ============================================================================
// Rejection
// ============================================================================

#[tokio::test]
async fn test_checkpoint_from_other_scenario_is_rejected() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let mut simulator = EpisodeSimulator::resume(indebted_scenario(), store.clone()).unwrap();
    simulator.next_episode().await.unwrap();

    let mut changed = indebted_scenario();
    changed.bottleneck_capacity = 120.0;
    assert!(matches!(
        EpisodeSimulator::resume(changed, store),
        Err(SimulationError::Checkpoint(CheckpointError::ConfigMismatch { .. }))
    ));
}

#[test]
fn test_reordered_roster_is_rejected() {
    let scenario = indebted_scenario();
    let mut checkpoint = EpisodeSimulator::new(scenario.clone()).unwrap().checkpoint();
    checkpoint.classrooms.swap(0, 1);

    assert!(matches!(
        EpisodeSimulator::restore(scenario, checkpoint),
        Err(SimulationError::Checkpoint(CheckpointError::RosterMismatch(_)))
    ));
}

#[test]
fn test_over_displaced_classroom_is_rejected() {
    let scenario = indebted_scenario();
    let checkpoint = EpisodeSimulator::new(scenario.clone()).unwrap().checkpoint();

    let mut value = serde_json::to_value(&checkpoint).unwrap();
    value["classrooms"][0]["scheduled_dismissal"] = serde_json::json!("13:00");
    let tampered: SimulatorCheckpoint = serde_json::from_value(value).unwrap();

    assert!(matches!(
        EpisodeSimulator::restore(scenario.clone(), tampered.clone()),
        Err(SimulationError::Checkpoint(CheckpointError::InvalidState(_)))
    ));

    let mut lenient = scenario;
    lenient.negotiation.allow_override = true;
    let mut tampered = tampered;
    tampered.config_hash = EpisodeSimulator::new(lenient.clone())
        .unwrap()
        .checkpoint()
        .config_hash;
    assert!(EpisodeSimulator::restore(lenient, tampered).is_ok());
}

#[test]
fn test_malformed_checkpoint_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    std::fs::write(&path, "not json").unwrap();

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(path));
    assert!(matches!(
        EpisodeSimulator::resume(indebted_scenario(), store),
        Err(SimulationError::Store(StoreError::Json(_)))
    ));
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn test_failed_save_keeps_previous_state() {
    let mut simulator = EpisodeSimulator::new(indebted_scenario())
        .unwrap()
        .with_store(Arc::new(FailingStore));
    let before = simulator.checkpoint();

    assert!(matches!(
        simulator.next_episode().await,
        Err(SimulationError::Store(StoreError::Poisoned))
    ));
    assert_eq!(simulator.checkpoint(), before);
    assert!(simulator.event_log().is_empty());
}
