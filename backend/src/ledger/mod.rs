//! Commitment ledger
//!
//! Records reciprocal obligations between classrooms and resolves them when
//! they fall due.
//!
//! # Storage
//!
//! Commitments are keyed by due date, then by debtor id, and kept in
//! insertion order within a debtor. Both levels are `BTreeMap`s so every
//! traversal is deterministic.
//!
//! # Journal
//!
//! Alongside the commitments the ledger keeps a double-entry journal: recording
//! a commitment posts `Incurred(+owed)`, each repayment posts
//! `Repaid(-applied)`. The net owed between a debtor and a creditor is the
//! journal sum, which returns to exactly zero once every commitment between
//! them has been fulfilled.
//!
//! # Critical Invariants
//!
//! 1. `due_episode > origin_episode` for every commitment
//! 2. A commitment is never fulfilled twice
//! 3. Capping never loses debt: the remainder is re-recorded, carried forward
//!    one interval later

use crate::models::commitment::{Commitment, CommitmentId, PendingCommitment};
use crate::models::episode::CommitmentResolution;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors raised by ledger operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Due episode {due} is not after origin episode {origin}")]
    DueNotAfterOrigin { origin: NaiveDate, due: NaiveDate },

    #[error("Commitment from {debtor_id} to {creditor_id} owes no change")]
    ZeroDelta {
        debtor_id: String,
        creditor_id: String,
    },

    #[error("Owed delta {owed_delta} exceeds the debtor's cap of {cap} minutes")]
    ExceedsCap { owed_delta: i32, cap: u32 },

    #[error("Debtor and creditor are the same classroom: {0}")]
    SelfCommitment(String),

    #[error("Unknown commitment {0}")]
    UnknownCommitment(CommitmentId),

    #[error("Commitment {0} is already fulfilled")]
    AlreadyFulfilled(CommitmentId),

    #[error("Cannot apply {applied} minutes against {owed_delta} owed on commitment {id}")]
    InvalidApplication {
        id: CommitmentId,
        owed_delta: i32,
        applied: i32,
    },

    #[error("Ledger is inconsistent: {0}")]
    Inconsistent(String),
}

/// Kind of journal posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Incurred,
    Repaid,
}

/// One journal posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub commitment_id: CommitmentId,
    pub debtor_id: String,
    pub creditor_id: String,
    pub kind: EntryKind,
    /// Signed minutes: `+owed` when incurred, `-applied` when repaid
    pub amount: i32,
    pub date: NaiveDate,
}

/// Ledger of reciprocal schedule obligations
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use dismissal_coordinator_core::ledger::CommitmentLedger;
/// use dismissal_coordinator_core::models::PendingCommitment;
///
/// let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
/// let next_monday = NaiveDate::from_ymd_opt(2025, 1, 13).unwrap();
///
/// let mut ledger = CommitmentLedger::new(7);
/// let pending = PendingCommitment {
///     debtor_id: "C102".to_string(),
///     creditor_id: "C101".to_string(),
///     owed_delta: 2,
/// };
/// let id = ledger.record(&pending, monday, next_monday, 15).unwrap().id();
///
/// assert!(ledger.due_this_episode(monday).is_empty());
/// assert_eq!(ledger.due_this_episode(next_monday).len(), 1);
///
/// ledger.mark_fulfilled(id, next_monday).unwrap();
/// assert_eq!(ledger.net_owed("C102", "C101"), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentLedger {
    /// Days a carried-forward remainder is pushed back
    interval_days: u32,
    /// due date → debtor → commitments in insertion order
    entries: BTreeMap<NaiveDate, BTreeMap<String, Vec<Commitment>>>,
    journal: Vec<LedgerEntry>,
    next_id: u64,
}

impl CommitmentLedger {
    /// Create an empty ledger carrying remainders forward by `interval_days`
    pub fn new(interval_days: u32) -> Self {
        Self {
            interval_days,
            entries: BTreeMap::new(),
            journal: Vec::new(),
            next_id: 1,
        }
    }

    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record a new commitment
    ///
    /// `max_schedule_change` is the debtor's hard cap; an owed delta above it
    /// could never be applied in one episode and is rejected.
    pub fn record(
        &mut self,
        pending: &PendingCommitment,
        origin: NaiveDate,
        due: NaiveDate,
        max_schedule_change: u32,
    ) -> Result<&Commitment, LedgerError> {
        if due <= origin {
            return Err(LedgerError::DueNotAfterOrigin { origin, due });
        }
        if pending.owed_delta == 0 {
            return Err(LedgerError::ZeroDelta {
                debtor_id: pending.debtor_id.clone(),
                creditor_id: pending.creditor_id.clone(),
            });
        }
        if pending.owed_delta.unsigned_abs() > max_schedule_change {
            return Err(LedgerError::ExceedsCap {
                owed_delta: pending.owed_delta,
                cap: max_schedule_change,
            });
        }
        if pending.debtor_id == pending.creditor_id {
            return Err(LedgerError::SelfCommitment(pending.debtor_id.clone()));
        }

        let commitment = Commitment::new(
            self.allocate_id(),
            pending.debtor_id.clone(),
            pending.creditor_id.clone(),
            pending.owed_delta,
            origin,
            due,
            None,
        );
        self.post(&commitment, EntryKind::Incurred, commitment.owed_delta(), origin);
        Ok(self.insert(commitment))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Unfulfilled commitments due on or before `episode`
    ///
    /// Overdue commitments stay here until resolved. Ordered oldest origin
    /// first, then by recording order.
    pub fn due_this_episode(&self, episode: NaiveDate) -> Vec<Commitment> {
        let mut due: Vec<Commitment> = self
            .entries
            .range(..=episode)
            .flat_map(|(_, by_debtor)| by_debtor.values().flatten())
            .filter(|c| !c.is_fulfilled())
            .cloned()
            .collect();
        due.sort_by_key(|c| (c.origin_episode(), c.id()));
        due
    }

    /// Look up a commitment by id
    pub fn get(&self, id: CommitmentId) -> Option<&Commitment> {
        self.commitments().find(|c| c.id() == id)
    }

    /// All commitments, by due date then debtor then insertion
    pub fn commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.entries
            .values()
            .flat_map(|by_debtor| by_debtor.values().flatten())
    }

    /// Unfulfilled commitments owed by `debtor_id`
    pub fn outstanding_for(&self, debtor_id: &str) -> Vec<&Commitment> {
        self.entries
            .values()
            .filter_map(|by_debtor| by_debtor.get(debtor_id))
            .flatten()
            .filter(|c| !c.is_fulfilled())
            .collect()
    }

    /// Number of unfulfilled commitments
    pub fn pending_count(&self) -> usize {
        self.commitments().filter(|c| !c.is_fulfilled()).count()
    }

    pub fn len(&self) -> usize {
        self.commitments().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn journal(&self) -> &[LedgerEntry] {
        &self.journal
    }

    /// Signed minutes `debtor_id` still owes `creditor_id`
    pub fn net_owed(&self, debtor_id: &str, creditor_id: &str) -> i32 {
        self.journal
            .iter()
            .filter(|e| e.debtor_id == debtor_id && e.creditor_id == creditor_id)
            .map(|e| e.amount)
            .sum()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Mark a commitment fully repaid
    pub fn mark_fulfilled(
        &mut self,
        id: CommitmentId,
        on: NaiveDate,
    ) -> Result<CommitmentResolution, LedgerError> {
        let owed = self.require_unfulfilled(id)?.owed_delta();
        self.resolve(id, owed, on)
    }

    /// Resolve a due commitment with `applied` minutes actually forced
    ///
    /// - `applied == owed`: fulfilled.
    /// - `0 < |applied| < |owed|`: the commitment shrinks to `applied` and is
    ///   fulfilled; the remainder is recorded as a new commitment with the same
    ///   parties and origin, due one interval after `on`.
    /// - `applied == 0`: nothing was repaid; the commitment itself is moved to
    ///   one interval after `on`.
    pub fn resolve(
        &mut self,
        id: CommitmentId,
        applied: i32,
        on: NaiveDate,
    ) -> Result<CommitmentResolution, LedgerError> {
        let owed = self.require_unfulfilled(id)?.owed_delta();
        let same_direction = applied == 0 || applied.signum() == owed.signum();
        if !same_direction || applied.unsigned_abs() > owed.unsigned_abs() {
            return Err(LedgerError::InvalidApplication {
                id,
                owed_delta: owed,
                applied,
            });
        }

        let next_due = self.carry_date(on);

        if applied == 0 {
            let mut commitment = self.take(id)?;
            commitment.reschedule(next_due);
            let moved = self.insert(commitment).clone();
            return Ok(CommitmentResolution {
                commitment: moved.clone(),
                applied_delta: 0,
                carried_forward: Some(moved),
            });
        }

        let remainder = owed - applied;
        let settled = {
            let commitment = self.find_mut(id)?;
            commitment.shrink_to(applied);
            commitment.mark_fulfilled();
            commitment.clone()
        };
        self.post(&settled, EntryKind::Repaid, -applied, on);

        let carried_forward = if remainder != 0 {
            let carried = Commitment::new(
                self.allocate_id(),
                settled.debtor_id().to_string(),
                settled.creditor_id().to_string(),
                remainder,
                settled.origin_episode(),
                next_due,
                Some(settled.id()),
            );
            Some(self.insert(carried).clone())
        } else {
            None
        };

        Ok(CommitmentResolution {
            commitment: settled,
            applied_delta: applied,
            carried_forward,
        })
    }

    /// Check the ledger's structural invariants
    ///
    /// Used when restoring persisted state.
    pub fn check_consistency(&self) -> Result<(), LedgerError> {
        let mut seen = HashSet::new();
        for (due, by_debtor) in &self.entries {
            for (debtor, commitments) in by_debtor {
                for c in commitments {
                    if c.due_episode() != *due || c.debtor_id() != debtor {
                        return Err(LedgerError::Inconsistent(format!(
                            "{} is filed under the wrong key",
                            c.id()
                        )));
                    }
                    if c.due_episode() <= c.origin_episode() {
                        return Err(LedgerError::DueNotAfterOrigin {
                            origin: c.origin_episode(),
                            due: c.due_episode(),
                        });
                    }
                    if c.id().0 >= self.next_id || !seen.insert(c.id()) {
                        return Err(LedgerError::Inconsistent(format!(
                            "{} has a duplicate or unallocated id",
                            c.id()
                        )));
                    }
                }
            }
        }

        // Journal balance per pair must equal what is still outstanding
        let mut outstanding: BTreeMap<(&str, &str), i32> = BTreeMap::new();
        for c in self.commitments().filter(|c| !c.is_fulfilled()) {
            *outstanding
                .entry((c.debtor_id(), c.creditor_id()))
                .or_insert(0) += c.owed_delta();
        }
        let mut balances: BTreeMap<(&str, &str), i32> = BTreeMap::new();
        for e in &self.journal {
            *balances
                .entry((e.debtor_id.as_str(), e.creditor_id.as_str()))
                .or_insert(0) += e.amount;
        }
        balances.retain(|_, v| *v != 0);
        outstanding.retain(|_, v| *v != 0);
        if balances != outstanding {
            return Err(LedgerError::Inconsistent(
                "journal balance does not match outstanding commitments".to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn allocate_id(&mut self) -> CommitmentId {
        let id = CommitmentId(self.next_id);
        self.next_id += 1;
        id
    }

    fn carry_date(&self, on: NaiveDate) -> NaiveDate {
        on.checked_add_days(Days::new(u64::from(self.interval_days.max(1))))
            .unwrap_or(NaiveDate::MAX)
    }

    fn insert(&mut self, commitment: Commitment) -> &Commitment {
        let bucket = self
            .entries
            .entry(commitment.due_episode())
            .or_default()
            .entry(commitment.debtor_id().to_string())
            .or_default();
        bucket.push(commitment);
        &bucket[bucket.len() - 1]
    }

    fn post(&mut self, commitment: &Commitment, kind: EntryKind, amount: i32, date: NaiveDate) {
        self.journal.push(LedgerEntry {
            commitment_id: commitment.id(),
            debtor_id: commitment.debtor_id().to_string(),
            creditor_id: commitment.creditor_id().to_string(),
            kind,
            amount,
            date,
        });
    }

    fn find_mut(&mut self, id: CommitmentId) -> Result<&mut Commitment, LedgerError> {
        self.entries
            .values_mut()
            .flat_map(|by_debtor| by_debtor.values_mut().flatten())
            .find(|c| c.id() == id)
            .ok_or(LedgerError::UnknownCommitment(id))
    }

    fn require_unfulfilled(&self, id: CommitmentId) -> Result<&Commitment, LedgerError> {
        let commitment = self.get(id).ok_or(LedgerError::UnknownCommitment(id))?;
        if commitment.is_fulfilled() {
            return Err(LedgerError::AlreadyFulfilled(id));
        }
        Ok(commitment)
    }

    /// Remove a commitment from its slot, pruning empty keys
    fn take(&mut self, id: CommitmentId) -> Result<Commitment, LedgerError> {
        let (due, debtor) = self
            .get(id)
            .map(|c| (c.due_episode(), c.debtor_id().to_string()))
            .ok_or(LedgerError::UnknownCommitment(id))?;

        let by_debtor = self
            .entries
            .get_mut(&due)
            .ok_or(LedgerError::UnknownCommitment(id))?;
        let list = by_debtor
            .get_mut(&debtor)
            .ok_or(LedgerError::UnknownCommitment(id))?;
        let position = list
            .iter()
            .position(|c| c.id() == id)
            .ok_or(LedgerError::UnknownCommitment(id))?;
        let commitment = list.remove(position);

        if list.is_empty() {
            by_debtor.remove(&debtor);
        }
        if by_debtor.is_empty() {
            self.entries.remove(&due);
        }
        Ok(commitment)
    }
}

/// Largest forced shift that can be applied toward `owed_delta` this episode
///
/// Bounded by the owed amount, the debtor's remaining per-episode budget and
/// its displacement headroom in that direction. Keeps the sign of the debt.
pub fn capped_delta(owed_delta: i32, budget_left: u32, headroom: u32) -> i32 {
    let magnitude = owed_delta.unsigned_abs().min(budget_left).min(headroom) as i32;
    magnitude * owed_delta.signum()
}
