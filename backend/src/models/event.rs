//! Event log for episode replay and auditing.
//!
//! Every observable state change of a run is captured as an `Event` tagged
//! with the episode index it belongs to. The simulator is the only writer;
//! the negotiation trace is converted into events once an episode completes,
//! so a cancelled episode never leaves partial entries behind.
//!
//! # Event Types
//!
//! Events are grouped by episode phase:
//! - **Ledger**: due commitments applied or carried forward
//! - **Negotiation**: rounds, accepted/rejected offers, counter-offers
//! - **Reciprocity**: commitments recorded, classrooms flagged
//! - **Outcome**: risk assessments and the episode conclusion
//!
//! # Example
//!
//! ```rust
//! use dismissal_coordinator_core::models::Event;
//!
//! let event = Event::RoundStarted {
//!     episode: 2,
//!     round: 1,
//!     risk: 1.57,
//!     at_risk: vec!["C101".to_string(), "C102".to_string()],
//! };
//!
//! assert_eq!(event.episode(), 2);
//! assert_eq!(event.event_type(), "RoundStarted");
//! ```

use crate::models::commitment::CommitmentId;
use crate::models::episode::CoordinationIssue;
use crate::models::offer::OfferDirection;
use crate::negotiation::NegotiationConclusion;
use crate::risk::RiskLevel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Coordination event capturing a state change.
///
/// Events are logged in the order they occur within an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Episode began on `date` with `classrooms` participants
    EpisodeStarted {
        episode: usize,
        date: NaiveDate,
        classrooms: usize,
    },

    /// A due commitment was forced onto its debtor
    CommitmentApplied {
        episode: usize,
        commitment_id: CommitmentId,
        debtor_id: String,
        creditor_id: String,
        applied_delta: i32,
        fulfilled: bool,
    },

    /// Part (or all) of a due commitment could not be applied and moved to a later episode
    CommitmentCarriedForward {
        episode: usize,
        commitment_id: CommitmentId,
        debtor_id: String,
        remaining_delta: i32,
        new_due: NaiveDate,
    },

    /// Risk was evaluated (`stage` is "initial" or "final")
    RiskAssessed {
        episode: usize,
        stage: String,
        risk: f64,
        peak_load: f64,
        level: RiskLevel,
    },

    /// A negotiation round opened for the at-risk classrooms
    RoundStarted {
        episode: usize,
        round: usize,
        risk: f64,
        at_risk: Vec<String>,
    },

    /// An offer was accepted and applied to the schedule
    OfferAccepted {
        episode: usize,
        round: usize,
        classroom_id: String,
        delta: i32,
        direction: OfferDirection,
    },

    /// A valid offer was not applied because it did not lower risk
    OfferRejected {
        episode: usize,
        round: usize,
        classroom_id: String,
        delta: i32,
    },

    /// A classroom answered a coordinator counter-offer
    CounterOfferDecided {
        episode: usize,
        round: usize,
        classroom_id: String,
        delta: i32,
        accepted: bool,
    },

    /// A recovered coordination failure
    CoordinationIssue {
        episode: usize,
        issue: CoordinationIssue,
    },

    /// A reciprocal obligation was written to the ledger
    CommitmentRecorded {
        episode: usize,
        commitment_id: CommitmentId,
        debtor_id: String,
        creditor_id: String,
        owed_delta: i32,
        due: NaiveDate,
    },

    /// A classroom reached the violation limit
    ClassroomFlagged {
        episode: usize,
        classroom_id: String,
        violation_count: u32,
    },

    /// Episode finished
    EpisodeConcluded {
        episode: usize,
        initial_risk: f64,
        final_risk: f64,
        rounds: usize,
        success: bool,
        conclusion: NegotiationConclusion,
    },
}

impl Event {
    /// Get the episode index this event belongs to
    pub fn episode(&self) -> usize {
        match self {
            Event::EpisodeStarted { episode, .. }
            | Event::CommitmentApplied { episode, .. }
            | Event::CommitmentCarriedForward { episode, .. }
            | Event::RiskAssessed { episode, .. }
            | Event::RoundStarted { episode, .. }
            | Event::OfferAccepted { episode, .. }
            | Event::OfferRejected { episode, .. }
            | Event::CounterOfferDecided { episode, .. }
            | Event::CoordinationIssue { episode, .. }
            | Event::CommitmentRecorded { episode, .. }
            | Event::ClassroomFlagged { episode, .. }
            | Event::EpisodeConcluded { episode, .. } => *episode,
        }
    }

    /// Get a short description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::EpisodeStarted { .. } => "EpisodeStarted",
            Event::CommitmentApplied { .. } => "CommitmentApplied",
            Event::CommitmentCarriedForward { .. } => "CommitmentCarriedForward",
            Event::RiskAssessed { .. } => "RiskAssessed",
            Event::RoundStarted { .. } => "RoundStarted",
            Event::OfferAccepted { .. } => "OfferAccepted",
            Event::OfferRejected { .. } => "OfferRejected",
            Event::CounterOfferDecided { .. } => "CounterOfferDecided",
            Event::CoordinationIssue { .. } => "CoordinationIssue",
            Event::CommitmentRecorded { .. } => "CommitmentRecorded",
            Event::ClassroomFlagged { .. } => "ClassroomFlagged",
            Event::EpisodeConcluded { .. } => "EpisodeConcluded",
        }
    }

    /// Get classroom ID if the event concerns one classroom
    ///
    /// Ledger events report the debtor.
    pub fn classroom_id(&self) -> Option<&str> {
        match self {
            Event::CommitmentApplied { debtor_id, .. }
            | Event::CommitmentCarriedForward { debtor_id, .. }
            | Event::CommitmentRecorded { debtor_id, .. } => Some(debtor_id),
            Event::OfferAccepted { classroom_id, .. }
            | Event::OfferRejected { classroom_id, .. }
            | Event::CounterOfferDecided { classroom_id, .. }
            | Event::ClassroomFlagged { classroom_id, .. } => Some(classroom_id),
            Event::CoordinationIssue { issue, .. } => issue.classroom_id(),
            _ => None,
        }
    }

    /// Get commitment ID if the event concerns one commitment
    pub fn commitment_id(&self) -> Option<CommitmentId> {
        match self {
            Event::CommitmentApplied { commitment_id, .. }
            | Event::CommitmentCarriedForward { commitment_id, .. }
            | Event::CommitmentRecorded { commitment_id, .. } => Some(*commitment_id),
            Event::CoordinationIssue {
                issue: CoordinationIssue::LedgerInconsistency { commitment_id, .. },
                ..
            } => Some(*commitment_id),
            _ => None,
        }
    }
}

/// Event log for storing and querying coordination events.
///
/// This is a simple wrapper around Vec<Event> with convenience methods.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append a batch of events in order
    pub fn extend<I: IntoIterator<Item = Event>>(&mut self, events: I) {
        self.events.extend(events);
    }

    /// Get the number of events logged
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get all events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Get events for a specific episode
    pub fn events_in_episode(&self, episode: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.episode() == episode).collect()
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events for a specific classroom
    pub fn events_for_classroom(&self, classroom_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.classroom_id() == Some(classroom_id))
            .collect()
    }

    /// Get events for a specific commitment
    pub fn events_for_commitment(&self, commitment_id: CommitmentId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.commitment_id() == Some(commitment_id))
            .collect()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
