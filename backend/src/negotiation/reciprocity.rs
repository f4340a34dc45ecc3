//! Asymmetric-cost detection
//!
//! A classroom that moves earlier gives up teaching time so the rest of the
//! congested bucket can leave in comfort. If nobody in the same round moves
//! later by a comparable amount, the classrooms that stayed put in that bucket
//! owe the mover a later shift in a future episode, split by student share.

use crate::models::commitment::PendingCommitment;
use crate::models::offer::Offer;
use crate::models::schedule::Schedule;

/// Derive the debts created by one round's accepted offers
///
/// * `pre_round` - schedule the round started from
/// * `peak_members` - classrooms of the pre-round peak bucket(s)
/// * `accepted` - offers applied this round
/// * `ratio` - fraction of an earlier move a later move must reach to reciprocate it
///
/// Each unmatched earlier move of `d` minutes is split across the peak
/// classrooms that did not move this round, proportional to students, using
/// largest remainders so the shares add up to `d`. A share larger than the
/// debtor's `max_schedule_change` becomes several commitments of at most that
/// cap, so no minutes are dropped; the ledger repays them over later episodes.
///
/// # Example
/// ```
/// use chrono::NaiveTime;
/// use dismissal_coordinator_core::negotiation::asymmetric_cost;
/// use dismissal_coordinator_core::{Classroom, Offer, OfferDirection, Schedule};
///
/// let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
/// let schedule = Schedule::new(vec![
///     Classroom::new("A".to_string(), 60, 0.5, 12, t),
///     Classroom::new("B".to_string(), 20, 0.5, 12, t),
///     Classroom::new("C".to_string(), 40, 0.5, 12, t),
/// ]);
/// let moved = Offer::new(schedule.get("A").unwrap(), -6, 1, OfferDirection::SelfInitiated);
///
/// let debts = asymmetric_cost(&schedule, &schedule.ids(), &[moved], 0.5);
/// let owed: Vec<(&str, i32)> = debts.iter().map(|d| (d.debtor_id.as_str(), d.owed_delta)).collect();
/// assert_eq!(owed, vec![("B", 2), ("C", 4)]);
/// ```
pub fn asymmetric_cost(
    pre_round: &Schedule,
    peak_members: &[String],
    accepted: &[Offer],
    ratio: f64,
) -> Vec<PendingCommitment> {
    let mut matched_later = vec![false; accepted.len()];
    let mut debts = Vec::new();

    for earlier in accepted.iter().filter(|o| o.is_earlier()) {
        let d = earlier.delta().unsigned_abs();
        let needed = (f64::from(d) * ratio).ceil().max(1.0) as i32;

        let reciprocal = accepted
            .iter()
            .enumerate()
            .position(|(i, o)| !matched_later[i] && o.delta() >= needed);
        if let Some(i) = reciprocal {
            matched_later[i] = true;
            continue;
        }

        let debtors: Vec<(&str, u32, u32)> = peak_members
            .iter()
            .filter(|id| id.as_str() != earlier.classroom_id())
            .filter(|id| !accepted.iter().any(|o| o.classroom_id() == id.as_str()))
            .filter_map(|id| pre_round.get(id))
            .map(|c| (c.id(), c.students(), c.max_schedule_change()))
            .collect();

        let weights: Vec<u32> = debtors.iter().map(|(_, students, _)| *students).collect();
        for ((debtor_id, _, cap), share) in debtors.iter().zip(split_by_share(d, &weights)) {
            if *cap == 0 {
                continue;
            }
            let mut left = share;
            while left > 0 {
                let owed = left.min(*cap);
                debts.push(PendingCommitment {
                    debtor_id: debtor_id.to_string(),
                    creditor_id: earlier.classroom_id().to_string(),
                    owed_delta: owed as i32,
                });
                left -= owed;
            }
        }
    }

    debts
}

/// Split `total` proportionally to `weights` with the largest-remainder method
///
/// The parts always sum to `total` (when any weight is positive). Ties in the
/// remainder go to the earlier entry.
pub fn split_by_share(total: u32, weights: &[u32]) -> Vec<u32> {
    let sum: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if sum == 0 {
        return vec![0; weights.len()];
    }

    let mut parts = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (i, w) in weights.iter().enumerate() {
        let exact = u64::from(total) * u64::from(*w);
        parts.push((exact / sum) as u32);
        remainders.push((exact % sum, i));
    }

    let assigned: u32 = parts.iter().sum();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders.into_iter().take((total - assigned) as usize) {
        parts[i] += 1;
    }
    parts
}
