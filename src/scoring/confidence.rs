use serde::{Deserialize, Serialize};

use crate::cache::DayView;
use crate::config::engine::{BetTierConfig, ConfidenceConfig};
use crate::db::models::{Entrant, RaceContext};

/// Ordered confidence label; derives `Ord` so `min` caps a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Moderate,
    High,
    VeryHigh,
}

/// Historical sample counts behind one entrant's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub overall: u32,
    pub lane: u32,
    pub venue: u32,
    pub equipment: u32,
}

impl SampleCounts {
    pub fn from_view(view: &DayView<'_>, race: &RaceContext, entrant: &Entrant) -> Self {
        SampleCounts {
            overall: view
                .racer(entrant.racer_id)
                .map(|r| r.record.starts)
                .unwrap_or(0),
            lane: view
                .lane_record(entrant.racer_id, entrant.lane)
                .map(|r| r.starts)
                .unwrap_or(0),
            venue: view
                .venue_record(entrant.racer_id, race.venue_id)
                .map(|r| r.starts)
                .unwrap_or(0),
            equipment: view
                .motor(race.venue_id, entrant.motor_id)
                .map(|m| m.record.starts)
                .unwrap_or(0),
        }
    }
}

pub fn score_tier(score: f64, cfg: &ConfidenceConfig) -> ConfidenceTier {
    if score >= cfg.very_high_score {
        ConfidenceTier::VeryHigh
    } else if score >= cfg.high_score {
        ConfidenceTier::High
    } else if score >= cfg.moderate_score {
        ConfidenceTier::Moderate
    } else {
        ConfidenceTier::Low
    }
}

fn saturation(n: u32, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 1.0;
    }
    1.0 - (-(n as f64) / scale).exp()
}

/// Weighted blend of the four saturation curves, in [0, 1].
pub fn data_sufficiency(samples: &SampleCounts, cfg: &ConfidenceConfig) -> f64 {
    let curves = [
        saturation(samples.overall, cfg.overall_scale),
        saturation(samples.lane, cfg.lane_scale),
        saturation(samples.venue, cfg.venue_scale),
        saturation(samples.equipment, cfg.equipment_scale),
    ];
    let weight_total: f64 = cfg.curve_weights.iter().sum();
    if weight_total <= 0.0 {
        return 0.0;
    }
    curves
        .iter()
        .zip(cfg.curve_weights.iter())
        .map(|(c, w)| c * w)
        .sum::<f64>()
        / weight_total
}

pub fn data_ceiling(samples: &SampleCounts, cfg: &ConfidenceConfig) -> ConfidenceTier {
    let sufficiency = data_sufficiency(samples, cfg);
    if sufficiency >= cfg.very_high_ceiling {
        ConfidenceTier::VeryHigh
    } else if sufficiency >= cfg.high_ceiling {
        ConfidenceTier::High
    } else if sufficiency >= cfg.moderate_ceiling {
        ConfidenceTier::Moderate
    } else {
        ConfidenceTier::Low
    }
}

/// Score tier capped downward by the data-sufficiency ceiling.
pub fn classify(score: f64, samples: &SampleCounts, cfg: &ConfidenceConfig) -> ConfidenceTier {
    score_tier(score, cfg).min(data_ceiling(samples, cfg))
}

/// Tier for a fused outcome probability.
pub fn probability_tier(probability: f64, cfg: &BetTierConfig) -> ConfidenceTier {
    if probability >= cfg.very_high {
        ConfidenceTier::VeryHigh
    } else if probability >= cfg.high {
        ConfidenceTier::High
    } else if probability >= cfg.moderate {
        ConfidenceTier::Moderate
    } else {
        ConfidenceTier::Low
    }
}
