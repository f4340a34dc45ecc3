//! Domain models for the dismissal coordinator

pub mod classroom;
pub mod commitment;
pub mod episode;
pub mod event;
pub mod offer;
pub mod schedule;

// Re-exports
pub use classroom::Classroom;
pub use commitment::{Commitment, CommitmentId, PendingCommitment};
pub use episode::{
    AcceptedOfferReport, CommitmentReport, CommitmentResolution, CoordinationIssue, Episode,
    EpisodeReport, PerformanceLevel, PerformanceThresholds,
};
pub use event::{Event, EventLog};
pub use offer::{Decision, Offer, OfferDirection};
pub use schedule::Schedule;
