//! Dismissal Coordinator Core - Rust Engine
//!
//! Multi-agent coordination of classroom dismissal times around a shared
//! hallway bottleneck, with reciprocal commitments carried across episodes.
//!
//! # Architecture
//!
//! - **core**: Episode calendar and minute arithmetic
//! - **models**: Domain types (Classroom, Schedule, Offer, Commitment, Episode, Event)
//! - **risk**: Bucketed congestion risk model
//! - **policy**: Classroom agent policies (async capability interface)
//! - **negotiation**: Multi-round negotiation and asymmetric-cost detection
//! - **ledger**: Commitment ledger keyed by due episode
//! - **orchestrator**: Scenario config, episode loop, checkpoints
//!
//! # Critical Invariants
//!
//! 1. A negotiation never leaves risk higher than it started
//! 2. No classroom is displaced beyond its `max_schedule_change` (unless overridden)
//! 3. Commitments are conserved: every incurred minute is repaid or still outstanding
//! 4. Simulator state only changes when an episode completes

// Module declarations
pub mod core;
pub mod ledger;
pub mod models;
pub mod negotiation;
pub mod orchestrator;
pub mod policy;
pub mod risk;

// Re-exports for convenience
pub use core::time::EpisodeCalendar;
pub use ledger::{CommitmentLedger, LedgerError};
pub use models::{
    classroom::Classroom,
    commitment::{Commitment, CommitmentId, PendingCommitment},
    episode::{CoordinationIssue, Episode, EpisodeReport, PerformanceLevel},
    event::{Event, EventLog},
    offer::{Decision, Offer, OfferDirection},
    schedule::Schedule,
};
pub use negotiation::{NegotiationConclusion, NegotiationCoordinator, NegotiationParams};
pub use orchestrator::{EpisodeSimulator, Scenario, SimulationError};
pub use policy::{AgentPolicy, PolicyConfig, PolicyError, RiskContext};
pub use risk::{RiskAssessment, RiskLevel, RiskModel, RiskThresholds};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn dismissal_coordinator_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::simulator::PySimulator>()?;
    Ok(())
}
