//! Classroom Agent Policy Module
//!
//! This module defines the capability interface the negotiation coordinator
//! consumes to obtain decisions from classroom agents.
//!
//! # Overview
//!
//! Each classroom is represented by an agent that must decide **how far** to
//! move its dismissal when the hallway is congested, and whether to accept a
//! counter-offer built by the coordinator. How the decision is produced (a
//! rule, a script, a language model, a human) is invisible to the core: it
//! only relies on the call returning within the round deadline. A call that
//! errors or times out is treated as "no change".
//!
//! # Policy Interface
//!
//! All policies implement the async `AgentPolicy` trait:
//! ```rust
//! use async_trait::async_trait;
//! use dismissal_coordinator_core::policy::{AgentPolicy, PolicyError, RiskContext};
//! use dismissal_coordinator_core::{Classroom, Decision, Offer, OfferDirection};
//!
//! struct AlwaysEarlier;
//!
//! #[async_trait]
//! impl AgentPolicy for AlwaysEarlier {
//!     async fn propose(
//!         &self,
//!         classroom: &Classroom,
//!         context: &RiskContext,
//!     ) -> Result<Option<Offer>, PolicyError> {
//!         let delta = -(classroom.max_offer_delta() as i32);
//!         Ok(Some(Offer::new(classroom, delta, context.round, OfferDirection::SelfInitiated)))
//!     }
//!
//!     async fn decide(&self, _offer: &Offer, _classroom: &Classroom) -> Result<Decision, PolicyError> {
//!         Ok(Decision::Reject)
//!     }
//! }
//! ```
//!
//! # Built-in Policies
//!
//! Selected per classroom through `PolicyConfig`:
//! 1. **NoChange**: never proposes, rejects every counter-offer (baseline)
//! 2. **RuleBased**: stagger heuristic for proposals, feasibility score for decisions
//! 3. **Scripted**: replays one fixed delta per episode (tests and replays)

use crate::models::classroom::Classroom;
use crate::models::offer::{Decision, Offer};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod rule_based;
pub mod scripted;

pub use rule_based::RuleBasedPolicy;
pub use scripted::{NoChangePolicy, ScriptedPolicy};

/// Errors a policy implementation may report
///
/// The coordinator never propagates these; they become
/// `CoordinationIssue::PolicyFailure` entries in the episode report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("decision backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed decision: {0}")]
    Malformed(String),
}

/// One member of the at-risk set, as seen by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtRiskClassroom {
    pub id: String,
    pub students: u32,
    /// Signed minutes from its timetabled dismissal
    pub displacement: i32,
    pub reputation: f64,
}

/// Congestion situation handed to a policy when it is asked to propose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContext {
    /// 0-indexed episode
    pub episode: usize,
    pub date: NaiveDate,
    /// 1-indexed negotiation round
    pub round: usize,
    /// Risk of the pre-round schedule
    pub risk: f64,
    pub peak_load: f64,
    /// Risk below which negotiation stops
    pub risk_threshold: f64,
    pub bottleneck_capacity: f64,
    pub coordination_window: u32,
    /// Classrooms in the highest-load bucket(s), in schedule order
    pub at_risk: Vec<AtRiskClassroom>,
}

impl RiskContext {
    /// Position of `id` in the at-risk set ordered by student count (largest first)
    ///
    /// Ties keep schedule order. Returns `None` if the classroom is not at risk.
    pub fn rank_by_students(&self, id: &str) -> Option<usize> {
        let mut ranked: Vec<&AtRiskClassroom> = self.at_risk.iter().collect();
        ranked.sort_by(|a, b| b.students.cmp(&a.students));
        ranked.iter().position(|c| c.id == id)
    }

    pub fn is_at_risk(&self, id: &str) -> bool {
        self.at_risk.iter().any(|c| c.id == id)
    }
}

/// Decision-making capability of one classroom agent
#[async_trait]
pub trait AgentPolicy: Send + Sync {
    /// Propose a change to the classroom's dismissal, or `None` for no change
    ///
    /// The offer must be built from `classroom` as passed in; the coordinator
    /// discards offers that exceed the classroom's flexibility bound.
    async fn propose(
        &self,
        classroom: &Classroom,
        context: &RiskContext,
    ) -> Result<Option<Offer>, PolicyError>;

    /// Accept or reject a counter-offer built by the coordinator
    async fn decide(&self, offer: &Offer, classroom: &Classroom) -> Result<Decision, PolicyError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "custom"
    }
}

/// Policy selection for a classroom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Never moves (baseline)
    NoChange,

    /// Stagger heuristic with a feasibility-scored counter-offer decision
    RuleBased {
        /// Feasibility score a counter-offer must exceed to be accepted
        #[serde(default = "default_acceptance_threshold")]
        acceptance_threshold: f64,
    },

    /// Fixed proposals, one per episode in its first round (`null` = no change)
    Scripted {
        proposals: Vec<Option<i32>>,
        #[serde(default)]
        accept_counter_offers: bool,
        /// Artificial latency per call, in milliseconds
        #[serde(default)]
        delay_ms: u64,
    },
}

fn default_acceptance_threshold() -> f64 {
    rule_based::DEFAULT_ACCEPTANCE_THRESHOLD
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::RuleBased {
            acceptance_threshold: default_acceptance_threshold(),
        }
    }
}

/// Instantiate the policy a configuration names
pub fn create_policy(config: &PolicyConfig) -> Arc<dyn AgentPolicy> {
    match config {
        PolicyConfig::NoChange => Arc::new(NoChangePolicy),
        PolicyConfig::RuleBased {
            acceptance_threshold,
        } => Arc::new(RuleBasedPolicy::new(*acceptance_threshold)),
        PolicyConfig::Scripted {
            proposals,
            accept_counter_offers,
            delay_ms,
        } => Arc::new(
            ScriptedPolicy::new(proposals.clone())
                .accept_counter_offers(*accept_counter_offers)
                .with_delay(std::time::Duration::from_millis(*delay_ms)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RiskContext {
        let member = |id: &str, students| AtRiskClassroom {
            id: id.to_string(),
            students,
            displacement: 0,
            reputation: 1.0,
        };
        RiskContext {
            episode: 0,
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            round: 1,
            risk: 1.57,
            peak_load: 1.57,
            risk_threshold: 1.0,
            bottleneck_capacity: 150.0,
            coordination_window: 10,
            at_risk: vec![member("C101", 80), member("C102", 95), member("C103", 80)],
        }
    }

    #[test]
    fn test_rank_by_students_keeps_schedule_order_on_ties() {
        let ctx = context();
        assert_eq!(ctx.rank_by_students("C102"), Some(0));
        assert_eq!(ctx.rank_by_students("C101"), Some(1));
        assert_eq!(ctx.rank_by_students("C103"), Some(2));
        assert_eq!(ctx.rank_by_students("C999"), None);
    }

    #[test]
    fn test_policy_config_deserializes_tagged() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"type": "scripted", "proposals": [-10, null]}"#).unwrap();
        assert_eq!(
            config,
            PolicyConfig::Scripted {
                proposals: vec![Some(-10), None],
                accept_counter_offers: false,
                delay_ms: 0,
            }
        );

        let config: PolicyConfig = serde_json::from_str(r#"{"type": "rule_based"}"#).unwrap();
        assert_eq!(config, PolicyConfig::default());
    }
}
