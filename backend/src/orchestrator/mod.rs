//! Orchestrator - multi-episode simulation
//!
//! Ties the scenario configuration, the negotiation coordinator and the
//! commitment ledger together into a sequence of dated episodes.
//!
//! See `engine.rs` for the episode loop and `sweep.rs` for side-by-side runs.

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod store;
pub mod sweep;

// Re-export main types for convenience
pub use checkpoint::{compute_config_hash, validate_checkpoint, CheckpointError, SimulatorCheckpoint};
pub use config::{
    ClassroomConfig, ConfigError, EpisodeParams, ReputationParams, Scenario, PRESET_NAMES,
};
pub use engine::{run_scenario, EpisodeSimulator, SimulationError};
pub use store::{InMemoryStore, JsonFileStore, StateStore, StoreError};
pub use sweep::{ablation_variations, run_sweep, threshold_variations, SweepRow, Variation};
