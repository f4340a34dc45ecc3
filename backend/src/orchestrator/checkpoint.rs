//! Checkpoint - Save/Load Simulator State
//!
//! Captures everything that carries over between episodes (classroom
//! schedules and reputations, the commitment ledger, the next episode index)
//! so a run can be stopped after any episode and resumed later.
//!
//! # Critical Invariants
//!
//! - **Config Matching**: State can only be loaded with the scenario it was saved from
//! - **Roster Integrity**: The checkpoint names exactly the scenario's classrooms
//! - **Ledger Integrity**: Persisted ledger passes its consistency check

use crate::ledger::{CommitmentLedger, LedgerError};
use crate::models::classroom::Classroom;
use crate::orchestrator::config::Scenario;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while saving or restoring a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("config mismatch: checkpoint was saved with {found}, scenario hashes to {expected}")]
    ConfigMismatch { expected: String, found: String },

    #[error("classroom roster mismatch: {0}")]
    RosterMismatch(String),

    #[error("invalid classroom state: {0}")]
    InvalidState(String),

    #[error("ledger inconsistent: {0}")]
    Ledger(#[from] LedgerError),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

// ============================================================================
// Snapshot Structure
// ============================================================================

/// State carried between episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorCheckpoint {
    /// Identifies the run across save/resume cycles
    pub run_id: Uuid,

    /// Index of the next episode to simulate
    pub next_episode: usize,

    /// Classroom state in schedule order
    pub classrooms: Vec<Classroom>,

    pub ledger: CommitmentLedger,

    /// SHA256 of the canonical scenario JSON
    pub config_hash: String,
}

impl SimulatorCheckpoint {
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(json).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute a deterministic hash of a configuration
///
/// Object keys are sorted before hashing so field order never matters.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, CheckpointError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)
        .map_err(|e| CheckpointError::Serialization(format!("config: {}", e)))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| CheckpointError::Serialization(format!("config: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a checkpoint against the scenario it is about to resume
///
/// Checks:
/// - config hash matches
/// - classroom roster equals the scenario's, in order
/// - no classroom sits beyond its displacement cap (unless overrides are allowed)
/// - ledger structure is consistent
pub fn validate_checkpoint(
    checkpoint: &SimulatorCheckpoint,
    scenario: &Scenario,
) -> Result<(), CheckpointError> {
    let expected = compute_config_hash(scenario)?;
    if checkpoint.config_hash != expected {
        return Err(CheckpointError::ConfigMismatch {
            expected,
            found: checkpoint.config_hash.clone(),
        });
    }

    let saved: Vec<&str> = checkpoint.classrooms.iter().map(|c| c.id()).collect();
    let configured: Vec<&str> = scenario.classrooms.iter().map(|c| c.id.as_str()).collect();
    if saved != configured {
        return Err(CheckpointError::RosterMismatch(format!(
            "expected {:?}, found {:?}",
            configured, saved
        )));
    }

    let mut seen = HashSet::new();
    for room in &checkpoint.classrooms {
        if !seen.insert(room.id()) {
            return Err(CheckpointError::RosterMismatch(format!(
                "duplicate classroom {}",
                room.id()
            )));
        }
        if !scenario.negotiation.allow_override
            && room.displacement().unsigned_abs() > room.max_schedule_change()
        {
            return Err(CheckpointError::InvalidState(format!(
                "{} displaced {} minutes, cap is {}",
                room.id(),
                room.displacement(),
                room.max_schedule_change()
            )));
        }
        if !(0.0..=1.0).contains(&room.reputation()) {
            return Err(CheckpointError::InvalidState(format!(
                "{} reputation {} outside [0, 1]",
                room.id(),
                room.reputation()
            )));
        }
    }

    checkpoint.ledger.check_consistency()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint_for(scenario: &Scenario) -> SimulatorCheckpoint {
        SimulatorCheckpoint {
            run_id: Uuid::new_v4(),
            next_episode: 1,
            classrooms: scenario.build_schedule().classrooms().to_vec(),
            ledger: CommitmentLedger::new(scenario.episodes.interval_days),
            config_hash: compute_config_hash(scenario).unwrap(),
        }
    }

    #[test]
    fn test_config_hash_deterministic() {
        let scenario = Scenario::preset("demo").unwrap();
        let h1 = compute_config_hash(&scenario).unwrap();
        let h2 = compute_config_hash(&scenario.clone()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_config_hash_changes_with_config() {
        let scenario = Scenario::preset("demo").unwrap();
        let mut changed = scenario.clone();
        changed.bottleneck_capacity = 151.0;
        assert_ne!(
            compute_config_hash(&scenario).unwrap(),
            compute_config_hash(&changed).unwrap()
        );
    }

    #[test]
    fn test_valid_checkpoint_passes() {
        let scenario = Scenario::preset("demo").unwrap();
        validate_checkpoint(&checkpoint_for(&scenario), &scenario).unwrap();
    }

    #[test]
    fn test_wrong_scenario_is_rejected() {
        let scenario = Scenario::preset("demo").unwrap();
        let other = Scenario::preset("stress").unwrap();
        let err = validate_checkpoint(&checkpoint_for(&scenario), &other).unwrap_err();
        assert!(matches!(err, CheckpointError::ConfigMismatch { .. }));
    }

    #[test]
    fn test_roster_mismatch_is_rejected() {
        let scenario = Scenario::preset("demo").unwrap();
        let mut checkpoint = checkpoint_for(&scenario);
        checkpoint.classrooms.pop();
        let err = validate_checkpoint(&checkpoint, &scenario).unwrap_err();
        assert!(matches!(err, CheckpointError::RosterMismatch(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let scenario = Scenario::preset("demo").unwrap();
        let checkpoint = checkpoint_for(&scenario);
        let restored = SimulatorCheckpoint::from_json(&checkpoint.to_json().unwrap()).unwrap();
        assert_eq!(restored, checkpoint);
    }
}
