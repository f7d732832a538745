//! Per-entrant component scores.
//!
//! Each factor reduces the cached history to a strength in [0, 1] and is then
//! scaled by the factor's resolved weight, which doubles as its maximum. A
//! factor whose history is below its minimum sample count scores
//! [`NEUTRAL_STRENGTH`] instead of failing.

use serde::{Deserialize, Serialize};

use super::weights::WeightSet;
use super::FactorKind;
use crate::cache::DayView;
use crate::config::engine::FeatureConfig;
use crate::config::EngineConfig;
use crate::db::models::{Entrant, RaceContext, RaceRecord, Technique};

pub const NEUTRAL_STRENGTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub kind: FactorKind,
    pub value: f64,
    pub max: f64,
}

impl FactorScore {
    fn from_strength(kind: FactorKind, strength: f64, max: f64) -> Self {
        let max = max.max(0.0);
        let strength = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            NEUTRAL_STRENGTH
        };
        FactorScore {
            kind,
            value: (strength * max).clamp(0.0, max),
            max,
        }
    }
}

/// Mean per-entrant sample saturation across the field, in [0, 1].
pub fn race_sufficiency(view: &DayView<'_>, entrants: &[Entrant], cfg: &FeatureConfig) -> f64 {
    if entrants.is_empty() || cfg.sufficiency_saturation <= 0.0 {
        return 0.0;
    }
    let total: f64 = entrants
        .iter()
        .map(|e| {
            let starts = view.racer(e.racer_id).map(|r| r.record.starts).unwrap_or(0);
            (starts as f64 / cfg.sufficiency_saturation).min(1.0)
        })
        .sum();
    total / entrants.len() as f64
}

/// One score per factor, in `FactorKind` order.
///
/// `course` is the course the boat actually starts from. It drives the venue
/// lane advantage and the technique fit; the racer's own lane record stays
/// keyed by pit lane, which is how history is stored.
pub fn aggregate(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    course: u8,
    weights: &WeightSet,
    config: &EngineConfig,
) -> Vec<FactorScore> {
    FactorKind::ALL
        .iter()
        .map(|kind| {
            let strength = match kind {
                FactorKind::Course => course_strength(view, race, entrant, course, config),
                FactorKind::Competitor => competitor_strength(view, race, entrant, &config.features),
                FactorKind::Equipment => equipment_strength(view, race, entrant, &config.features),
                FactorKind::TechniqueAffinity => {
                    technique_affinity(view, race, entrant, course, config)
                }
                FactorKind::ClassAffinity => class_affinity(view, race, entrant, &config.features),
                FactorKind::Form => form_strength(view, entrant, &config.features),
            };
            FactorScore::from_strength(*kind, strength, weights.get(*kind))
        })
        .collect()
}

/// Share of finishes converted into a comparable strength.
fn placing_strength(record: &RaceRecord) -> f64 {
    let base = 0.6 * record.top2_rate() + 0.4 * record.top3_rate();
    ((base - 0.15) / 0.6).clamp(0.0, 1.0)
}

fn course_strength(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    course: u8,
    config: &EngineConfig,
) -> f64 {
    let lane_advantage = match config.venue(race.venue_id) {
        Some(venue) if venue.best_lane_rate() > 0.0 => {
            venue.lane_rate(course) / venue.best_lane_rate()
        }
        _ => {
            let best = config
                .national_lane_win_rates
                .iter()
                .copied()
                .fold(0.0, f64::max);
            if best > 0.0 {
                config.national_lane_rate(course) / best
            } else {
                NEUTRAL_STRENGTH
            }
        }
    };
    let lane_skill = view
        .lane_record(entrant.racer_id, entrant.lane)
        .filter(|r| r.starts >= config.features.min_lane_starts)
        .map(|r| r.top3_rate())
        .unwrap_or(NEUTRAL_STRENGTH);
    0.6 * lane_advantage + 0.4 * lane_skill
}

fn competitor_strength(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    cfg: &FeatureConfig,
) -> f64 {
    let racer = view.racer(entrant.racer_id);
    let overall = racer
        .filter(|r| r.record.starts >= cfg.min_overall_starts)
        .map(|r| placing_strength(&r.record));
    let local = view
        .venue_record(entrant.racer_id, race.venue_id)
        .filter(|r| r.starts >= cfg.min_venue_starts)
        .map(placing_strength);
    let skill = match (overall, local) {
        (Some(o), Some(l)) => 0.75 * o + 0.25 * l,
        (Some(o), None) => o,
        (None, Some(l)) => l,
        (None, None) => NEUTRAL_STRENGTH,
    };
    let start = racer
        .filter(|r| r.record.starts >= cfg.min_overall_starts)
        .and_then(|r| r.avg_start_timing)
        .map(|st| start_quality(st, cfg))
        .unwrap_or(NEUTRAL_STRENGTH);
    0.8 * skill + 0.2 * start
}

fn start_quality(start_timing: f64, cfg: &FeatureConfig) -> f64 {
    let span = cfg.start_timing_worst - cfg.start_timing_best;
    if span <= 0.0 || !start_timing.is_finite() {
        return NEUTRAL_STRENGTH;
    }
    ((cfg.start_timing_worst - start_timing) / span).clamp(0.0, 1.0)
}

fn equipment_strength(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    cfg: &FeatureConfig,
) -> f64 {
    let scale = |rate: f64| {
        let span = cfg.equipment_top2_ceiling - cfg.equipment_top2_floor;
        if span <= 0.0 {
            NEUTRAL_STRENGTH
        } else {
            ((rate - cfg.equipment_top2_floor) / span).clamp(0.0, 1.0)
        }
    };
    let motor = view
        .motor(race.venue_id, entrant.motor_id)
        .filter(|m| m.record.starts >= cfg.min_equipment_starts)
        .map(|m| scale(m.record.top2_rate()))
        .unwrap_or(NEUTRAL_STRENGTH);
    let hull = view
        .hull(race.venue_id, entrant.hull_id)
        .filter(|h| h.record.starts >= cfg.min_equipment_starts)
        .map(|h| scale(h.record.top2_rate()))
        .unwrap_or(NEUTRAL_STRENGTH);
    0.7 * motor + 0.3 * hull
}

/// How well the racer's winning techniques at this venue fit what this lane
/// usually wins by.
fn technique_affinity(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    course: u8,
    config: &EngineConfig,
) -> f64 {
    let Some(mix) = view
        .technique_mix(entrant.racer_id, race.venue_id)
        .filter(|m| m.total() >= config.features.min_technique_wins)
    else {
        return NEUTRAL_STRENGTH;
    };
    let Some(prior) = course
        .checked_sub(1)
        .and_then(|i| config.technique.lane_priors.get(i as usize))
    else {
        return NEUTRAL_STRENGTH;
    };
    let peak = prior.iter().copied().fold(0.0, f64::max);
    if peak <= 0.0 {
        return NEUTRAL_STRENGTH;
    }
    Technique::ALL
        .iter()
        .map(|t| mix.share(*t) * prior[t.index()] / peak)
        .sum()
}

fn class_affinity(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    cfg: &FeatureConfig,
) -> f64 {
    view.grade_record(entrant.racer_id, race.grade)
        .filter(|r| r.starts >= cfg.min_grade_starts)
        .map(|r| ((r.top3_rate() - 0.2) / 0.6).clamp(0.0, 1.0))
        .unwrap_or(NEUTRAL_STRENGTH)
}

fn form_strength(view: &DayView<'_>, entrant: &Entrant, cfg: &FeatureConfig) -> f64 {
    view.recent_form(entrant.racer_id)
        .filter(|f| f.starts >= cfg.min_form_starts && f.avg_finish.is_finite())
        .map(|f| ((6.0 - f.avg_finish) / 5.0).clamp(0.0, 1.0))
        .unwrap_or(NEUTRAL_STRENGTH)
}
