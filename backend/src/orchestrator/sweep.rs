//! Configuration sweeps
//!
//! Runs one base scenario under several variations side by side: an ablation
//! over policies and negotiation switches, or a sensitivity sweep over the
//! risk threshold. Every variation gets a fresh simulator, so runs share no
//! state and can be driven concurrently.

use crate::orchestrator::config::Scenario;
use crate::orchestrator::engine::{EpisodeSimulator, SimulationError};
use crate::policy::PolicyConfig;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// One named change to a base scenario
///
/// Unset fields keep the base scenario's value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Variation {
    pub name: String,
    #[serde(default)]
    pub risk_threshold: Option<f64>,
    #[serde(default)]
    pub max_rounds: Option<usize>,
    #[serde(default)]
    pub counter_offers: Option<bool>,
    /// Replaces every classroom's policy
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

impl Variation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Copy of `base` with this variation's overrides applied
    pub fn apply(&self, base: &Scenario) -> Scenario {
        let mut scenario = base.clone();
        scenario.name = format!("{} [{}]", base.name, self.name);
        if let Some(threshold) = self.risk_threshold {
            scenario.negotiation.risk_threshold = threshold;
        }
        if let Some(rounds) = self.max_rounds {
            scenario.negotiation.max_rounds = rounds;
        }
        if let Some(enabled) = self.counter_offers {
            scenario.negotiation.counter_offers = enabled;
        }
        if let Some(policy) = &self.policy {
            for room in &mut scenario.classrooms {
                room.policy = policy.clone();
            }
        }
        scenario
    }
}

/// Policy and negotiation ablation
///
/// `baseline` keeps the scenario as configured; the others switch off one
/// mechanism each or move the risk threshold.
pub fn ablation_variations() -> Vec<Variation> {
    vec![
        Variation::named("baseline"),
        Variation {
            policy: Some(PolicyConfig::NoChange),
            ..Variation::named("no_change")
        },
        Variation {
            policy: Some(PolicyConfig::default()),
            ..Variation::named("rule_based")
        },
        Variation {
            counter_offers: Some(false),
            ..Variation::named("no_counter_offers")
        },
        Variation {
            max_rounds: Some(1),
            ..Variation::named("single_round")
        },
        Variation {
            risk_threshold: Some(0.5),
            ..Variation::named("low_threshold")
        },
        Variation {
            risk_threshold: Some(1.0),
            ..Variation::named("high_threshold")
        },
    ]
}

/// One variation per risk threshold, named `threshold=<value>`
pub fn threshold_variations(thresholds: &[f64]) -> Vec<Variation> {
    thresholds
        .iter()
        .map(|t| Variation {
            risk_threshold: Some(*t),
            ..Variation::named(format!("threshold={}", t))
        })
        .collect()
}

/// Aggregate outcome of one variation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub name: String,
    pub episodes: usize,
    /// Risk before negotiation in the first episode
    pub initial_risk: f64,
    /// Risk after negotiation in the last episode
    pub final_risk: f64,
    pub mean_risk_reduction: f64,
    pub successes: usize,
    /// Distinct classrooms with at least one accepted offer
    pub agents_participated: usize,
    pub offers_accepted: usize,
    pub commitments_created: usize,
    /// Unfulfilled commitments left in the ledger after the last episode
    pub commitments_outstanding: usize,
}

async fn run_variation(
    base: &Scenario,
    variation: &Variation,
    episodes: usize,
) -> Result<SweepRow, SimulationError> {
    let mut simulator = EpisodeSimulator::new(variation.apply(base))?;
    let run = simulator.run(episodes).await?;

    let participants: BTreeSet<&str> = run
        .iter()
        .flat_map(|e| e.accepted_offers.iter().map(|o| o.classroom_id()))
        .collect();
    let reduction: f64 = run.iter().map(|e| e.risk_reduction()).sum();

    let row = SweepRow {
        name: variation.name.clone(),
        episodes: run.len(),
        initial_risk: run.first().map_or(0.0, |e| e.initial_risk()),
        final_risk: run.last().map_or(0.0, |e| e.final_risk()),
        mean_risk_reduction: if run.is_empty() {
            0.0
        } else {
            reduction / run.len() as f64
        },
        successes: run.iter().filter(|e| e.success).count(),
        agents_participated: participants.len(),
        offers_accepted: run.iter().map(|e| e.accepted_offers.len()).sum(),
        commitments_created: run.iter().map(|e| e.commitments_created.len()).sum(),
        commitments_outstanding: simulator.ledger().pending_count(),
    };
    info!(
        variation = %row.name,
        final_risk = row.final_risk,
        successes = row.successes,
        "Variation complete"
    );
    Ok(row)
}

/// Run `episodes` episodes of `base` under each variation
///
/// Rows come back in variation order. The first failing variation's error is
/// returned.
pub async fn run_sweep(
    base: &Scenario,
    variations: &[Variation],
    episodes: usize,
) -> Result<Vec<SweepRow>, SimulationError> {
    let runs = variations
        .iter()
        .map(|variation| run_variation(base, variation, episodes));
    join_all(runs).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides_only_set_fields() {
        let base = Scenario::preset("balanced").unwrap();
        let varied = Variation {
            risk_threshold: Some(0.5),
            policy: Some(PolicyConfig::NoChange),
            ..Variation::named("quiet")
        }
        .apply(&base);

        assert_eq!(varied.name, "Balanced Load Scenario [quiet]");
        assert_eq!(varied.negotiation.risk_threshold, 0.5);
        assert_eq!(varied.negotiation.max_rounds, base.negotiation.max_rounds);
        assert!(varied.classrooms.iter().all(|c| c.policy == PolicyConfig::NoChange));
        assert_eq!(varied.bottleneck_capacity, base.bottleneck_capacity);
    }

    #[test]
    fn test_threshold_variation_names() {
        let names: Vec<String> = threshold_variations(&[0.5, 1.1])
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["threshold=0.5", "threshold=1.1"]);
    }
}
