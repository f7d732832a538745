//! Wager side: technique posteriors → finish scenarios → fused distributions →
//! ranked bets.

pub mod integrator;
pub mod scenario;
pub mod stake;
pub mod technique;

pub use integrator::{fuse, select_bets, FusedDistributions};
pub use scenario::{FinishPattern, Scenario, ScenarioSet};
pub use technique::TechniqueDistribution;

use serde::{Deserialize, Serialize};

use crate::scoring::ConfidenceTier;

/// Ordered-finish wager shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetShape {
    /// First and second in order
    Exacta,
    /// First, second and third in order
    Trifecta,
}

impl BetShape {
    pub fn places(&self) -> usize {
        match self {
            BetShape::Exacta => 2,
            BetShape::Trifecta => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Past the minimum, add outcomes while each one's probability exceeds `floor`
    Probability { floor: f64 },
    /// Past the minimum, add outcomes while the selected mass is below `target`
    Coverage { target: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetSelection {
    pub min_bets: usize,
    pub max_bets: usize,
    pub strategy: SelectionStrategy,
}

impl Default for BetSelection {
    fn default() -> Self {
        BetSelection {
            min_bets: 2,
            max_bets: 6,
            strategy: SelectionStrategy::Probability { floor: 0.02 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub shape: BetShape,
    /// Lanes in finishing order
    pub order: Vec<u8>,
    pub probability: f64,
    pub confidence: ConfidenceTier,
    /// Dense rank by probability; equal probabilities share a rank
    pub rank: u32,
    /// Decimal odds, when supplied
    pub odds: Option<f64>,
    pub expected_value: Option<f64>,
    pub stake_fraction: Option<f64>,
}

/// Render a finishing order the way tickets print it, e.g. `1-3-2`.
pub fn order_key(order: &[u8]) -> String {
    order
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("-")
}
