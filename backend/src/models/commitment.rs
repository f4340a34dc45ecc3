//! Commitment model
//!
//! A commitment is a recorded obligation for one classroom (the debtor) to
//! shift its dismissal in a later episode in favour of another classroom (the
//! creditor). Commitments are created when an accepted offer imposes
//! asymmetric cost and are destroyed (marked fulfilled) when the simulator
//! applies them.
//!
//! # Critical Invariants
//!
//! 1. `due_episode > origin_episode`
//! 2. `owed_delta != 0`
//! 3. A fulfilled commitment is never applied again

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, ledger-assigned commitment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitmentId(pub u64);

impl fmt::Display for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmt_{:06}", self.0)
    }
}

/// An owed schedule shift produced by negotiation, not yet in the ledger
///
/// The coordinator emits these; the simulator dates them and records them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommitment {
    pub debtor_id: String,
    pub creditor_id: String,
    /// Signed minutes the debtor owes
    pub owed_delta: i32,
}

/// A reciprocal obligation between two classrooms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    id: CommitmentId,
    debtor_id: String,
    creditor_id: String,
    /// Signed minutes the debtor must shift
    owed_delta: i32,
    origin_episode: NaiveDate,
    due_episode: NaiveDate,
    fulfilled: bool,
    /// Commitment this one carries the remainder of, if any
    carried_from: Option<CommitmentId>,
}

impl Commitment {
    pub(crate) fn new(
        id: CommitmentId,
        debtor_id: String,
        creditor_id: String,
        owed_delta: i32,
        origin_episode: NaiveDate,
        due_episode: NaiveDate,
        carried_from: Option<CommitmentId>,
    ) -> Self {
        Self {
            id,
            debtor_id,
            creditor_id,
            owed_delta,
            origin_episode,
            due_episode,
            fulfilled: false,
            carried_from,
        }
    }

    pub fn id(&self) -> CommitmentId {
        self.id
    }

    pub fn debtor_id(&self) -> &str {
        &self.debtor_id
    }

    pub fn creditor_id(&self) -> &str {
        &self.creditor_id
    }

    pub fn owed_delta(&self) -> i32 {
        self.owed_delta
    }

    pub fn origin_episode(&self) -> NaiveDate {
        self.origin_episode
    }

    pub fn due_episode(&self) -> NaiveDate {
        self.due_episode
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled
    }

    pub fn carried_from(&self) -> Option<CommitmentId> {
        self.carried_from
    }

    /// Whether the commitment links `a` and `b` in either direction
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.debtor_id == a && self.creditor_id == b)
            || (self.debtor_id == b && self.creditor_id == a)
    }

    pub(crate) fn mark_fulfilled(&mut self) {
        self.fulfilled = true;
    }

    /// Reduce the owed amount to what was actually applied (capped fulfilment)
    pub(crate) fn shrink_to(&mut self, applied: i32) {
        self.owed_delta = applied;
    }

    pub(crate) fn reschedule(&mut self, due_episode: NaiveDate) {
        self.due_episode = due_episode;
    }
}
