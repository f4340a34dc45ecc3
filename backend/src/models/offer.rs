//! Offers exchanged during negotiation
//!
//! An offer names one classroom, a signed change to its dismissal time, and
//! the round it belongs to. Offers are immutable once created; the
//! coordinator consumes them with an accept/reject decision.

use crate::core::time::{hhmm, shift_minutes};
use crate::models::classroom::Classroom;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Who originated an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferDirection {
    /// Proposed by the classroom's own policy
    SelfInitiated,
    /// Built by the coordinator after a rejection and put to the classroom
    CounterOffer,
}

/// Accept/reject answer to an incoming offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn is_accept(self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// A proposed change to one classroom's dismissal time
///
/// # Example
/// ```
/// use chrono::NaiveTime;
/// use dismissal_coordinator_core::{Classroom, Offer, OfferDirection};
///
/// let t = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
/// let room = Classroom::new("C101".to_string(), 80, 0.7, 15, t);
/// let offer = Offer::new(&room, -10, 1, OfferDirection::SelfInitiated);
///
/// assert_eq!(offer.delta(), -10);
/// assert_eq!(offer.previous_time(), t);
/// assert_eq!(offer.proposed_time(), NaiveTime::from_hms_opt(12, 20, 0).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    classroom_id: String,
    #[serde(with = "hhmm")]
    previous_time: NaiveTime,
    #[serde(with = "hhmm")]
    proposed_time: NaiveTime,
    delta: i32,
    round: usize,
    direction: OfferDirection,
}

impl Offer {
    /// Create an offer moving `classroom` by `delta` minutes from its current time
    pub fn new(classroom: &Classroom, delta: i32, round: usize, direction: OfferDirection) -> Self {
        let previous_time = classroom.scheduled_dismissal();
        Self {
            classroom_id: classroom.id().to_string(),
            previous_time,
            proposed_time: shift_minutes(previous_time, delta),
            delta,
            round,
            direction,
        }
    }

    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    /// Dismissal time the offer was computed from
    pub fn previous_time(&self) -> NaiveTime {
        self.previous_time
    }

    pub fn proposed_time(&self) -> NaiveTime {
        self.proposed_time
    }

    pub fn delta(&self) -> i32 {
        self.delta
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn direction(&self) -> OfferDirection {
        self.direction
    }

    /// True if the offer moves the classroom earlier
    pub fn is_earlier(&self) -> bool {
        self.delta < 0
    }

    /// Whether the offer still describes `classroom` as it currently stands
    pub(crate) fn matches(&self, classroom: &Classroom) -> bool {
        self.classroom_id == classroom.id()
            && self.previous_time == classroom.scheduled_dismissal()
            && self.proposed_time == shift_minutes(self.previous_time, self.delta)
    }
}
