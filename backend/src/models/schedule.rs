//! Schedule - the set of classrooms sharing one bottleneck
//!
//! A schedule keeps classrooms in insertion order so every pass over it
//! (bucketing, at-risk selection, ledger application) is deterministic.

use crate::models::classroom::Classroom;
use crate::models::offer::Offer;
use serde::{Deserialize, Serialize};

/// Ordered collection of classrooms and their current dismissal times
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    classrooms: Vec<Classroom>,
}

impl Schedule {
    /// Create a schedule from classrooms (order preserved)
    pub fn new(classrooms: Vec<Classroom>) -> Self {
        Self { classrooms }
    }

    pub fn classrooms(&self) -> &[Classroom] {
        &self.classrooms
    }

    pub fn len(&self) -> usize {
        self.classrooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classrooms.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Classroom> {
        self.classrooms.iter().find(|c| c.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Classroom> {
        self.classrooms.iter_mut().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Classroom IDs in schedule order
    pub fn ids(&self) -> Vec<String> {
        self.classrooms.iter().map(|c| c.id().to_string()).collect()
    }

    /// Total students across all classrooms
    pub fn total_students(&self) -> u32 {
        self.classrooms.iter().map(|c| c.students()).sum()
    }

    /// Move one classroom's dismissal by `delta` minutes
    ///
    /// Returns false if the classroom is not part of this schedule.
    pub fn apply_delta(&mut self, id: &str, delta: i32) -> bool {
        match self.get_mut(id) {
            Some(classroom) => {
                classroom.apply_delta(delta);
                true
            }
            None => false,
        }
    }

    /// Copy of this schedule with every offer applied simultaneously
    ///
    /// Offers for classrooms not in the schedule are ignored.
    pub fn with_offers<'a, I>(&self, offers: I) -> Schedule
    where
        I: IntoIterator<Item = &'a Offer>,
    {
        let mut candidate = self.clone();
        for offer in offers {
            candidate.apply_delta(offer.classroom_id(), offer.delta());
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::offer::OfferDirection;
    use chrono::NaiveTime;

    fn schedule() -> Schedule {
        let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        Schedule::new(vec![
            Classroom::new("A".to_string(), 10, 1.0, 10, t),
            Classroom::new("B".to_string(), 20, 1.0, 10, t),
        ])
    }

    #[test]
    fn test_with_offers_leaves_original_untouched() {
        let base = schedule();
        let offer = Offer::new(base.get("A").unwrap(), -5, 1, OfferDirection::SelfInitiated);
        let candidate = base.with_offers([&offer]);

        assert_eq!(base.get("A").unwrap().displacement(), 0);
        assert_eq!(candidate.get("A").unwrap().displacement(), -5);
        assert_eq!(candidate.get("B").unwrap().displacement(), 0);
    }

    #[test]
    fn test_apply_delta_unknown_classroom() {
        let mut base = schedule();
        assert!(!base.apply_delta("Z", 3));
        assert_eq!(base.total_students(), 30);
    }
}
