//! Stake sizing against decimal (totalisator) odds.
//!
//! The Kelly formula sizes a bet to maximise the expected logarithm of
//! bankroll:
//!   f* = (b·p − q) / b
//! where
//!   b  = net odds received on the bet (profit per unit staked, i.e. odds − 1)
//!   p  = estimated probability the finishing order comes in
//!   q  = 1 − p
//!
//! A fractional multiplier (0 < multiplier ≤ 1) trades growth for variance.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use super::{order_key, BetRecommendation};

/// Decimal odds keyed by race id, then by finishing order (`"1-2-3"`).
pub type OddsBook = HashMap<String, HashMap<String, f64>>;

pub fn load_odds(path: &Path) -> Result<OddsBook> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read odds {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse odds {}", path.display()))
}

/// Calculate the Kelly stake fraction.
///
/// # Arguments
/// * `probability`    – Estimated probability that the bet wins (0.0–1.0).
/// * `decimal_odds`   – Payout per unit staked, stake included (> 1.0).
/// * `kelly_fraction` – Fractional Kelly multiplier (0.0–1.0).
///
/// # Returns
/// The fraction of bankroll to stake (0.0–1.0). Returns `0.0` when expected
/// value is non-positive (i.e. no edge).
pub fn kelly_stake(probability: f64, decimal_odds: f64, kelly_fraction: f64) -> f64 {
    if !(0.0..=1.0).contains(&probability) || !decimal_odds.is_finite() || decimal_odds <= 1.0 {
        return 0.0;
    }

    let b = decimal_odds - 1.0;
    let p = probability;
    let q = 1.0 - p;

    let f = (b * p - q) / b;

    if f <= 0.0 {
        return 0.0; // no edge
    }

    (f * kelly_fraction.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Expected return per unit staked: `p · odds − 1`.
///
/// Positive means the pool is paying more than the estimated probability
/// warrants.
pub fn expected_value(probability: f64, decimal_odds: f64) -> f64 {
    if !decimal_odds.is_finite() || decimal_odds <= 0.0 {
        return 0.0;
    }
    probability * decimal_odds - 1.0
}

/// Fill odds, expected value and stake on every recommendation that has a
/// quoted price. Recommendations without a quote are left untouched.
pub fn annotate_with_odds(
    bets: &mut [BetRecommendation],
    odds: &HashMap<String, f64>,
    kelly_fraction: f64,
) {
    for bet in bets {
        let Some(&price) = odds.get(&order_key(&bet.order)) else {
            continue;
        };
        bet.odds = Some(price);
        bet.expected_value = Some(expected_value(bet.probability, price));
        bet.stake_fraction = Some(kelly_stake(bet.probability, price, kelly_fraction));
    }
}
