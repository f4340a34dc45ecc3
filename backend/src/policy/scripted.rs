//! Baseline and scripted policies
//!
//! `NoChangePolicy` never moves: the reference point every other policy is
//! measured against. `ScriptedPolicy` replays a fixed list of proposals, one
//! per episode, which makes negotiation outcomes reproducible in tests and
//! lets a recorded run be replayed without its original decision backend.

use super::{AgentPolicy, PolicyError, RiskContext};
use crate::models::classroom::Classroom;
use crate::models::offer::{Decision, Offer, OfferDirection};
use async_trait::async_trait;
use std::time::Duration;

/// Never proposes, rejects every counter-offer
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChangePolicy;

#[async_trait]
impl AgentPolicy for NoChangePolicy {
    async fn propose(
        &self,
        _classroom: &Classroom,
        _context: &RiskContext,
    ) -> Result<Option<Offer>, PolicyError> {
        Ok(None)
    }

    async fn decide(&self, _offer: &Offer, _classroom: &Classroom) -> Result<Decision, PolicyError> {
        Ok(Decision::Reject)
    }

    fn name(&self) -> &str {
        "no_change"
    }
}

/// Replays a fixed sequence of proposals
///
/// Entry `k` is proposed in the first round of episode `k`. Later rounds,
/// `None` entries and episodes past the end of the script all mean
/// "no change". The answer depends only on the context, so a policy rebuilt
/// after a restore continues the script where the saved run left off.
///
/// # Example
///
/// ```
/// use dismissal_coordinator_core::policy::ScriptedPolicy;
///
/// let policy = ScriptedPolicy::new(vec![Some(-10), None]);
/// assert_eq!(policy.proposal_for(0, 1), Some(-10));
/// assert_eq!(policy.proposal_for(0, 2), None);
/// assert_eq!(policy.proposal_for(1, 1), None);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedPolicy {
    proposals: Vec<Option<i32>>,
    accept_counter_offers: bool,
    delay: Duration,
}

impl ScriptedPolicy {
    pub fn new(proposals: Vec<Option<i32>>) -> Self {
        Self {
            proposals,
            accept_counter_offers: false,
            delay: Duration::ZERO,
        }
    }

    /// Answer counter-offers with `Accept` instead of `Reject`
    pub fn accept_counter_offers(mut self, accept: bool) -> Self {
        self.accept_counter_offers = accept;
        self
    }

    /// Sleep this long before answering any call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delta scripted for `round` (1-indexed) of `episode`
    pub fn proposal_for(&self, episode: usize, round: usize) -> Option<i32> {
        if round != 1 {
            return None;
        }
        self.proposals.get(episode).copied().flatten()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl AgentPolicy for ScriptedPolicy {
    async fn propose(
        &self,
        classroom: &Classroom,
        context: &RiskContext,
    ) -> Result<Option<Offer>, PolicyError> {
        self.pause().await;

        let delta = self.proposal_for(context.episode, context.round);
        Ok(delta
            .filter(|d| *d != 0)
            .map(|d| Offer::new(classroom, d, context.round, OfferDirection::SelfInitiated)))
    }

    async fn decide(&self, _offer: &Offer, _classroom: &Classroom) -> Result<Decision, PolicyError> {
        self.pause().await;

        if self.accept_counter_offers {
            Ok(Decision::Accept)
        } else {
            Ok(Decision::Reject)
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
