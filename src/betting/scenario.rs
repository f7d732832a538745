//! Finish scenarios anchored on (winner, technique).
//!
//! Enumeration is a bounded search: at most `second_top_k` runners-up per
//! scenario and `third_top_k` third places per runner-up.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::technique::TechniqueDistribution;
use crate::config::engine::ScenarioConfig;
use crate::db::models::Technique;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishPattern {
    /// Lanes in finishing order: two places, or three when the field allows
    pub order: Vec<u8>,
    /// Probability within the scenario
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub winner: u8,
    pub technique: Technique,
    /// Normalised over every candidate scenario of the race
    pub probability: f64,
    pub patterns: Vec<FinishPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSet {
    /// Retained scenarios, most probable first
    pub scenarios: Vec<Scenario>,
    /// Probability mass of the retained scenarios
    pub retained_mass: f64,
    pub candidate_count: usize,
}

/// How much more likely the boat starting from `course` is to follow the
/// winner's course home given how the race was won. 1.0 is neutral.
fn proximity(technique: Technique, winner: u8, course: u8, bonus: f64) -> f64 {
    let d = i16::from(course) - i16::from(winner);
    let adjacent = if d.abs() == 1 { 1.0 + bonus * 0.5 } else { 1.0 };
    let by_technique = match technique {
        // The boats just outside the leader chase it through the turn
        Technique::Lead if (1..=2).contains(&d) => 1.0 + bonus,
        // The boat slipped past on the inside usually holds on
        Technique::SlipThrough if d == -1 => 1.0 + bonus,
        // Sweep drags the next boat out with it and swamps the inside
        Technique::Overtake if d == 1 => 1.0 + bonus,
        Technique::Overtake if d < 0 => (1.0 - bonus * 0.5).max(0.1),
        Technique::OvertakeSlip if d.abs() == 1 => 1.0 + bonus * 0.5,
        _ => 1.0,
    };
    adjacent * by_technique
}

fn by_weight_then_lane(a: &(u8, f64), b: &(u8, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Top-k candidates by weight, normalised to sum to 1. Empty when nothing
/// carries weight.
fn top_k(mut weighted: Vec<(u8, f64)>, k: usize) -> Vec<(u8, f64)> {
    weighted.retain(|(_, w)| w.is_finite() && *w > 0.0);
    weighted.sort_by(by_weight_then_lane);
    weighted.truncate(k);
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    weighted.into_iter().map(|(l, w)| (l, w / total)).collect()
}

fn patterns_for(
    winner: &TechniqueDistribution,
    technique: Technique,
    field: &[TechniqueDistribution],
    cfg: &ScenarioConfig,
) -> Vec<FinishPattern> {
    // Proximity is measured between starting courses; finish orders stay in
    // pit lanes.
    let course_of = |lane: u8| {
        field
            .iter()
            .find(|d| d.lane == lane)
            .map(|d| d.resolved_lane)
            .unwrap_or(lane)
    };
    let seconds = top_k(
        field
            .iter()
            .filter(|d| d.lane != winner.lane)
            .map(|d| {
                let w = d.win_probability
                    * proximity(technique, winner.resolved_lane, d.resolved_lane, cfg.adjacency_bonus);
                (d.lane, w)
            })
            .collect(),
        cfg.second_top_k,
    );

    let mut patterns = Vec::new();
    for (second, p2) in seconds {
        let thirds = top_k(
            field
                .iter()
                .filter(|d| d.lane != winner.lane && d.lane != second)
                .map(|d| {
                    let w = d.win_probability
                        * proximity(technique, winner.resolved_lane, d.resolved_lane, cfg.adjacency_bonus)
                        * proximity(
                            Technique::LatePass,
                            course_of(second),
                            d.resolved_lane,
                            cfg.adjacency_bonus,
                        );
                    (d.lane, w)
                })
                .collect(),
            cfg.third_top_k,
        );
        if thirds.is_empty() {
            patterns.push(FinishPattern {
                order: vec![winner.lane, second],
                probability: p2,
            });
            continue;
        }
        for (third, p3) in thirds {
            patterns.push(FinishPattern {
                order: vec![winner.lane, second, third],
                probability: p2 * p3,
            });
        }
    }

    let total: f64 = patterns.iter().map(|p| p.probability).sum();
    if total > 0.0 {
        for p in &mut patterns {
            p.probability /= total;
        }
    }
    patterns
}

/// Build, normalise and truncate the scenario set for one race.
pub fn build(field: &[TechniqueDistribution], cfg: &ScenarioConfig) -> ScenarioSet {
    let causal = |d: &TechniqueDistribution| {
        Technique::ALL
            .into_iter()
            .filter(|t| t.is_causal())
            .map(|t| (d.lane, t, d.joint(t)))
            .collect::<Vec<_>>()
    };
    let all: Vec<(u8, Technique, f64)> = field.iter().flat_map(causal).collect();
    let mut candidates: Vec<(u8, Technique, f64)> = all
        .iter()
        .copied()
        .filter(|(_, _, p)| *p > cfg.min_joint_probability)
        .collect();
    if candidates.is_empty() {
        // Nothing clears the floor; fall back to every causal pair with mass
        candidates = all.into_iter().filter(|(_, _, p)| *p > 0.0).collect();
    }
    let total: f64 = candidates.iter().map(|c| c.2).sum();
    if candidates.is_empty() || total <= 0.0 {
        return ScenarioSet {
            scenarios: Vec::new(),
            retained_mass: 0.0,
            candidate_count: 0,
        };
    }

    candidates.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });
    let candidate_count = candidates.len();

    let mut scenarios = Vec::new();
    let mut retained_mass = 0.0;
    for (lane, technique, joint) in candidates {
        if retained_mass >= cfg.retained_mass {
            break;
        }
        let Some(winner) = field.iter().find(|d| d.lane == lane) else {
            continue;
        };
        let probability = joint / total;
        retained_mass += probability;
        scenarios.push(Scenario {
            winner: lane,
            technique,
            probability,
            patterns: patterns_for(winner, technique, field, cfg),
        });
    }

    ScenarioSet {
        scenarios,
        retained_mass,
        candidate_count,
    }
}
