//! Stage 1: discovered pattern rules applied in probability space.
//!
//! Scores become a win distribution by temperature-scaled softmax. Each
//! entrant's matched rules combine into one multiplier, damped, applied to the
//! distribution and renormalised. The probability shift is then converted back
//! to score points and capped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::conditions::RuleCondition;
use super::{AdjustmentSource, AdjustmentStage, StageError, StageInput, StageOutcome};
use crate::config::engine::RuleShiftConfig;

/// A condition → multiplier rule produced by offline pattern discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub id: String,
    pub condition: RuleCondition,
    /// Multiplier on the matched entrant's win probability
    pub multiplier: f64,
    /// Confidence in the rule, 0.0–1.0; scales the multiplier's effect
    pub reliability: f64,
}

impl PatternRule {
    pub fn check(&self) -> Result<(), StageError> {
        let malformed = |reason: String| StageError::MalformedRule {
            id: self.id.clone(),
            reason,
        };
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(malformed(format!("multiplier {} must be > 0", self.multiplier)));
        }
        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(malformed(format!(
                "reliability {} outside 0..=1",
                self.reliability
            )));
        }
        if let Some(problem) = self.condition.problem() {
            return Err(malformed(problem));
        }
        Ok(())
    }

    /// Multiplier with its effect scaled by reliability.
    fn effective_multiplier(&self) -> f64 {
        1.0 + (self.multiplier - 1.0) * self.reliability
    }
}

pub fn load_rules(path: &Path) -> Result<Vec<PatternRule>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pattern rules {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse pattern rules {}", path.display()))
}

fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    let t = temperature.max(1e-6);
    let peak = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| ((s - peak) / t).exp()).collect();
    let total: f64 = exps.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let even = 1.0 / scores.len() as f64;
        return vec![even; scores.len()];
    }
    exps.into_iter().map(|e| e / total).collect()
}

/// Convert per-entrant multipliers into score deltas.
///
/// `scores` and `multipliers` are index-aligned. Every returned delta satisfies
/// `|delta| <= cfg.cap`.
pub fn rule_score_deltas(scores: &[f64], multipliers: &[f64], cfg: &RuleShiftConfig) -> Vec<f64> {
    let n = scores.len().min(multipliers.len());
    if n == 0 {
        return Vec::new();
    }
    let cap = cfg.cap.max(0.0);
    let probs = softmax(&scores[..n], cfg.temperature);

    let shifted: Vec<f64> = probs
        .iter()
        .zip(&multipliers[..n])
        .map(|(p, m)| {
            let m = if m.is_finite() && *m > 0.0 { *m } else { 1.0 };
            let damped = (1.0 + (m - 1.0) * cfg.damping).max(0.0);
            p * damped
        })
        .collect();
    let total: f64 = shifted.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return vec![0.0; n];
    }

    probs
        .iter()
        .zip(shifted)
        .map(|(before, after)| {
            let delta = (after / total - before) * cfg.points_per_probability;
            if delta.is_finite() {
                delta.clamp(-cap, cap)
            } else {
                0.0
            }
        })
        .collect()
}

pub struct RuleShiftStage<'a> {
    cfg: &'a RuleShiftConfig,
    rules: &'a [PatternRule],
}

impl<'a> RuleShiftStage<'a> {
    pub fn new(cfg: &'a RuleShiftConfig, rules: &'a [PatternRule]) -> Self {
        RuleShiftStage { cfg, rules }
    }
}

impl AdjustmentStage for RuleShiftStage<'_> {
    fn source(&self) -> AdjustmentSource {
        AdjustmentSource::RuleShift
    }

    fn cap(&self) -> f64 {
        self.cfg.cap
    }

    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
        if self.rules.is_empty() {
            return Ok(input
                .entrants
                .iter()
                .map(|_| StageOutcome::skipped("no pattern rules loaded"))
                .collect());
        }
        for rule in self.rules {
            rule.check()?;
        }

        let mut multipliers = Vec::with_capacity(input.entrants.len());
        let mut matched: Vec<Vec<&str>> = Vec::with_capacity(input.entrants.len());
        for entrant in input.entrants {
            let mut m = 1.0;
            let mut ids = Vec::new();
            for rule in self.rules {
                if rule.condition.matches(input.race, entrant, &input.view) {
                    m *= rule.effective_multiplier();
                    ids.push(rule.id.as_str());
                }
            }
            multipliers.push(m);
            matched.push(ids);
        }

        if matched.iter().all(|ids| ids.is_empty()) {
            return Ok(input
                .entrants
                .iter()
                .map(|_| StageOutcome::skipped("no pattern rule matched"))
                .collect());
        }

        let deltas = rule_score_deltas(input.scores, &multipliers, self.cfg);
        Ok(deltas
            .into_iter()
            .zip(multipliers)
            .zip(matched)
            .map(|((delta, m), ids)| {
                let reason = if ids.is_empty() {
                    "field renormalised after other entrants' rules".to_string()
                } else {
                    format!("rules [{}] x{:.3}", ids.join(", "), m)
                };
                StageOutcome::applied(delta, reason)
            })
            .collect())
    }
}
