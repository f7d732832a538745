//! Fusion of retained scenarios into ordered-finish distributions, and bet
//! selection over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::scenario::ScenarioSet;
use super::{BetRecommendation, BetSelection, BetShape, SelectionStrategy};
use crate::config::engine::BetTierConfig;
use crate::scoring::confidence::probability_tier;

/// Ordered finish (lanes) → probability.
pub type Distribution = BTreeMap<Vec<u8>, f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedDistributions {
    pub exacta: Distribution,
    pub trifecta: Distribution,
}

impl FusedDistributions {
    pub fn get(&self, shape: BetShape) -> &Distribution {
        match shape {
            BetShape::Exacta => &self.exacta,
            BetShape::Trifecta => &self.trifecta,
        }
    }
}

fn normalise(dist: &mut Distribution) {
    let total: f64 = dist.values().sum();
    if total > 0.0 {
        for p in dist.values_mut() {
            *p /= total;
        }
    }
}

/// Sum every retained scenario's contribution to each finishing order. An
/// order reached through several scenarios accumulates all of them. Both
/// distributions are normalised over the retained mass.
pub fn fuse(set: &ScenarioSet) -> FusedDistributions {
    let mut fused = FusedDistributions::default();
    for scenario in &set.scenarios {
        for pattern in &scenario.patterns {
            let mass = scenario.probability * pattern.probability;
            if pattern.order.len() >= 2 {
                *fused.exacta.entry(pattern.order[..2].to_vec()).or_insert(0.0) += mass;
            }
            if pattern.order.len() >= 3 {
                *fused.trifecta.entry(pattern.order[..3].to_vec()).or_insert(0.0) += mass;
            }
        }
    }
    normalise(&mut fused.exacta);
    normalise(&mut fused.trifecta);
    fused
}

/// Rank `distribution` and pick the bet set.
///
/// Outcomes are taken by probability (descending, then finishing order). The
/// first `min_bets` are always taken; after that the strategy decides whether
/// to continue, never past `max_bets`.
pub fn select_bets(
    distribution: &Distribution,
    shape: BetShape,
    selection: &BetSelection,
    tiers: &BetTierConfig,
) -> Vec<BetRecommendation> {
    let mut candidates: Vec<(&Vec<u8>, f64)> = distribution
        .iter()
        .filter(|(order, p)| order.len() == shape.places() && p.is_finite())
        .map(|(order, p)| (order, *p))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let max_bets = selection.max_bets.max(selection.min_bets);
    let mut selected: Vec<(&Vec<u8>, f64)> = Vec::new();
    let mut covered = 0.0;
    for (order, p) in candidates {
        if selected.len() >= max_bets {
            break;
        }
        if selected.len() >= selection.min_bets {
            let keep_going = match selection.strategy {
                SelectionStrategy::Probability { floor } => p > floor,
                SelectionStrategy::Coverage { target } => covered < target,
            };
            if !keep_going {
                break;
            }
        }
        covered += p;
        selected.push((order, p));
    }

    let mut rank = 0;
    let mut previous: Option<f64> = None;
    selected
        .into_iter()
        .map(|(order, p)| {
            if previous != Some(p) {
                rank += 1;
                previous = Some(p);
            }
            BetRecommendation {
                shape,
                order: order.clone(),
                probability: p,
                confidence: probability_tier(p, tiers),
                rank,
                odds: None,
                expected_value: None,
                stake_fraction: None,
            }
        })
        .collect()
}
