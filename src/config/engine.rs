//! Immutable scoring tables.
//!
//! Built once (from defaults or a JSON override) and passed by reference into
//! every component. Nothing here is process-global, so tests can run side by
//! side with different tables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::venues::{default_venues, VenueProfile, NATIONAL_LANE_WIN_RATES};
use crate::db::models::GradeTier;
use crate::error::EngineError;
use crate::scoring::FactorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base factor weights; also each factor's maximum score
    pub base_weights: BTreeMap<FactorKind, f64>,
    pub weight_policy: WeightPolicyConfig,
    pub venues: Vec<VenueProfile>,
    pub national_lane_win_rates: [f64; 6],
    pub features: FeatureConfig,
    pub adjustments: AdjustmentConfig,
    pub confidence: ConfidenceConfig,
    pub technique: TechniqueConfig,
    pub scenario: ScenarioConfig,
    pub bet_tiers: BetTierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_weights: BTreeMap::from([
                (FactorKind::Course, 32.0),
                (FactorKind::Competitor, 24.0),
                (FactorKind::Equipment, 18.0),
                (FactorKind::TechniqueAffinity, 10.0),
                (FactorKind::ClassAffinity, 8.0),
                (FactorKind::Form, 8.0),
            ]),
            weight_policy: WeightPolicyConfig::default(),
            venues: default_venues(),
            national_lane_win_rates: NATIONAL_LANE_WIN_RATES,
            features: FeatureConfig::default(),
            adjustments: AdjustmentConfig::default(),
            confidence: ConfidenceConfig::default(),
            technique: TechniqueConfig::default(),
            scenario: ScenarioConfig::default(),
            bet_tiers: BetTierConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse engine config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn venue(&self, venue_id: u8) -> Option<&VenueProfile> {
        self.venues.iter().find(|v| v.id == venue_id)
    }

    pub fn national_lane_rate(&self, lane: u8) -> f64 {
        lane.checked_sub(1)
            .and_then(|i| self.national_lane_win_rates.get(i as usize))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.base_weights.len() != FactorKind::ALL.len() {
            return Err(EngineError::Config(format!(
                "base_weights must name all {} factors",
                FactorKind::ALL.len()
            )));
        }
        let total: f64 = self.base_weights.values().sum();
        if self.base_weights.values().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
            return Err(EngineError::Config(
                "base weights must be finite, non-negative and not all zero".into(),
            ));
        }
        let caps = [
            ("aggregate", self.adjustments.aggregate_cap),
            ("rule_shift", self.adjustments.rule_shift.cap),
            ("weather", self.adjustments.weather.cap),
            ("tide", self.adjustments.tide.cap),
            ("telemetry", self.adjustments.telemetry.cap),
            ("compound", self.adjustments.compound.cap),
        ];
        for (name, cap) in caps {
            if !cap.is_finite() || cap < 0.0 {
                return Err(EngineError::Config(format!("{} cap must be >= 0", name)));
            }
        }
        if self.adjustments.rule_shift.temperature <= 0.0 {
            return Err(EngineError::Config("rule_shift temperature must be > 0".into()));
        }
        for venue in &self.venues {
            if venue.lane_win_rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
                return Err(EngineError::Config(format!(
                    "venue {} has invalid lane win rates",
                    venue.id
                )));
            }
        }
        for row in &self.technique.lane_priors {
            if row.iter().any(|p| !p.is_finite() || *p < 0.0) || row.iter().sum::<f64>() <= 0.0 {
                return Err(EngineError::Config(
                    "technique lane priors must be non-negative with a positive total per lane"
                        .into(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.scenario.retained_mass) {
            return Err(EngineError::Config("retained_mass must be within 0..=1".into()));
        }
        if self.scenario.second_top_k == 0 || self.scenario.third_top_k == 0 {
            return Err(EngineError::Config("scenario top-k must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Weight policy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightPolicyConfig {
    pub lane_dominant: BTreeMap<FactorKind, f64>,
    pub equipment_dominant: BTreeMap<FactorKind, f64>,
    pub grade: BTreeMap<GradeTier, BTreeMap<FactorKind, f64>>,
    /// Aggregate sufficiency below this moves weight onto the course factor
    pub low_sufficiency_threshold: f64,
    /// Points moved at zero sufficiency (scaled linearly up to the threshold)
    pub low_sufficiency_shift: f64,
    /// Factors the low-sufficiency shift is taken from
    pub low_sufficiency_donors: Vec<FactorKind>,
    pub min_weight: f64,
}

impl Default for WeightPolicyConfig {
    fn default() -> Self {
        use FactorKind::*;
        WeightPolicyConfig {
            lane_dominant: BTreeMap::from([(Course, 5.0), (Equipment, -5.0)]),
            equipment_dominant: BTreeMap::from([(Course, -6.0), (Equipment, 6.0)]),
            grade: BTreeMap::from([
                (
                    GradeTier::Premier,
                    BTreeMap::from([(Competitor, 4.0), (ClassAffinity, 2.0), (TechniqueAffinity, -6.0)]),
                ),
                (
                    GradeTier::Major,
                    BTreeMap::from([(Competitor, 2.0), (ClassAffinity, 1.0), (TechniqueAffinity, -3.0)]),
                ),
            ]),
            low_sufficiency_threshold: 0.35,
            low_sufficiency_shift: 6.0,
            low_sufficiency_donors: vec![TechniqueAffinity, ClassAffinity, Form],
            min_weight: 1.0,
        }
    }
}

// ── Features ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub min_overall_starts: u32,
    pub min_lane_starts: u32,
    pub min_venue_starts: u32,
    pub min_grade_starts: u32,
    pub min_equipment_starts: u32,
    pub min_technique_wins: u32,
    pub min_form_starts: u32,
    /// Recent starts considered by the form factor
    pub form_window: u32,
    /// Overall starts at which a racer counts as fully sampled
    pub sufficiency_saturation: f64,
    /// Start timing (s) treated as best / worst when scoring start quality
    pub start_timing_best: f64,
    pub start_timing_worst: f64,
    /// Top-2 rate of a weak and a strong motor
    pub equipment_top2_floor: f64,
    pub equipment_top2_ceiling: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            min_overall_starts: 20,
            min_lane_starts: 4,
            min_venue_starts: 6,
            min_grade_starts: 6,
            min_equipment_starts: 10,
            min_technique_wins: 3,
            min_form_starts: 3,
            form_window: 10,
            sufficiency_saturation: 60.0,
            start_timing_best: 0.11,
            start_timing_worst: 0.22,
            equipment_top2_floor: 0.15,
            equipment_top2_ceiling: 0.60,
        }
    }
}

// ── Adjustments ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentConfig {
    /// Bound on the summed correction of all stages for one entrant
    pub aggregate_cap: f64,
    pub rule_shift: RuleShiftConfig,
    pub weather: WeatherConfig,
    pub tide: TideStageConfig,
    pub telemetry: TelemetryConfig,
    pub compound: CompoundConfig,
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        AdjustmentConfig {
            aggregate_cap: 20.0,
            rule_shift: RuleShiftConfig::default(),
            weather: WeatherConfig::default(),
            tide: TideStageConfig::default(),
            telemetry: TelemetryConfig::default(),
            compound: CompoundConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleShiftConfig {
    pub cap: f64,
    /// Softmax temperature in score points
    pub temperature: f64,
    /// Fraction of each rule multiplier's effect that is applied
    pub damping: f64,
    /// Score points per unit of probability shift
    pub points_per_probability: f64,
}

impl Default for RuleShiftConfig {
    fn default() -> Self {
        RuleShiftConfig {
            cap: 10.0,
            temperature: 10.0,
            damping: 0.5,
            points_per_probability: 100.0,
        }
    }
}

/// Percent-of-score adjustments per lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub cap: f64,
    /// Wind components below this (m/s) are ignored
    pub calm_wind: f64,
    pub headwind_pct_per_ms: [f64; 6],
    pub tailwind_pct_per_ms: [f64; 6],
    pub crosswind_pct_per_ms: [f64; 6],
    /// Wave height (cm) from which water counts as choppy / rough
    pub choppy_wave: f64,
    pub rough_wave: f64,
    pub choppy_pct: [f64; 6],
    pub rough_pct: [f64; 6],
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            cap: 5.0,
            calm_wind: 2.0,
            headwind_pct_per_ms: [-0.8, -0.3, 0.2, 0.5, 0.6, 0.5],
            tailwind_pct_per_ms: [-0.4, 0.5, 0.1, -0.1, -0.2, -0.3],
            crosswind_pct_per_ms: [-0.2, 0.0, 0.0, 0.0, 0.05, 0.1],
            choppy_wave: 3.0,
            rough_wave: 8.0,
            choppy_pct: [1.0, 0.5, 0.0, -0.5, -1.0, -1.5],
            rough_pct: [3.0, 1.0, -0.5, -1.5, -2.5, -3.5],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TideStageConfig {
    pub cap: f64,
}

impl Default for TideStageConfig {
    fn default() -> Self {
        TideStageConfig { cap: 4.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub cap: f64,
    /// Points per 0.1 s of exhibition time better than the field mean
    pub points_per_tenth: f64,
    /// Points per 0.01 s of exhibition start better than the field mean
    pub start_points_per_hundredth: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            cap: 4.0,
            points_per_tenth: 2.5,
            start_points_per_hundredth: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundConfig {
    pub cap: f64,
}

impl Default for CompoundConfig {
    fn default() -> Self {
        CompoundConfig { cap: 3.0 }
    }
}

// ── Confidence ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub very_high_score: f64,
    pub high_score: f64,
    pub moderate_score: f64,
    /// Sample count scale `k` of each `1 - exp(-n / k)` saturation curve
    pub overall_scale: f64,
    pub lane_scale: f64,
    pub venue_scale: f64,
    pub equipment_scale: f64,
    /// Blend of the four curves (overall, lane, venue, equipment)
    pub curve_weights: [f64; 4],
    pub very_high_ceiling: f64,
    pub high_ceiling: f64,
    pub moderate_ceiling: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        ConfidenceConfig {
            very_high_score: 75.0,
            high_score: 60.0,
            moderate_score: 45.0,
            overall_scale: 40.0,
            lane_scale: 8.0,
            venue_scale: 10.0,
            equipment_scale: 12.0,
            curve_weights: [0.4, 0.2, 0.2, 0.2],
            very_high_ceiling: 0.75,
            high_ceiling: 0.5,
            moderate_ceiling: 0.25,
        }
    }
}

// ── Technique model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechniqueConfig {
    /// P(lane wins via technique); rows are lanes 1–6, columns follow `Technique::ALL`
    pub lane_priors: [[f64; 6]; 6],
    /// Pseudo-count pulling a racer's technique mix toward the lane prior
    pub mix_pseudo_count: f64,
    pub mix_min_wins: u32,
    pub mix_factor_min: f64,
    pub mix_factor_max: f64,
    /// Average start timing at or under which starts count as sharp
    pub start_sharp: f64,
    /// Average start timing at or over which starts count as slow
    pub start_slow: f64,
    pub start_sharp_factor: f64,
    pub start_slow_factor: f64,
    pub wind_calm: f64,
    /// Relative effect per m/s of wind component on affected techniques
    pub wind_per_ms: f64,
    /// Relative effect of a fully one-sided motor output profile
    pub profile_strength: f64,
    pub profile_min_wins: u32,
    pub skill_min_starts: u32,
    pub skill_baseline_win_rate: f64,
    pub skill_factor_min: f64,
    pub skill_factor_max: f64,
}

impl Default for TechniqueConfig {
    fn default() -> Self {
        TechniqueConfig {
            lane_priors: [
                // lead, slip, overtake, overtake-slip, late pass, fortunate
                [0.486, 0.0, 0.0, 0.0, 0.040, 0.010],
                [0.0, 0.085, 0.035, 0.0, 0.015, 0.005],
                [0.0, 0.020, 0.050, 0.040, 0.010, 0.004],
                [0.0, 0.030, 0.045, 0.015, 0.010, 0.004],
                [0.0, 0.010, 0.015, 0.025, 0.008, 0.002],
                [0.0, 0.005, 0.010, 0.012, 0.007, 0.002],
            ],
            mix_pseudo_count: 4.0,
            mix_min_wins: 3,
            mix_factor_min: 0.5,
            mix_factor_max: 2.0,
            start_sharp: 0.14,
            start_slow: 0.19,
            start_sharp_factor: 1.25,
            start_slow_factor: 0.8,
            wind_calm: 2.0,
            wind_per_ms: 0.04,
            profile_strength: 0.15,
            profile_min_wins: 3,
            skill_min_starts: 20,
            skill_baseline_win_rate: 1.0 / 6.0,
            skill_factor_min: 0.4,
            skill_factor_max: 2.5,
        }
    }
}

// ── Scenarios and bets ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Joint (winner, technique) probability below which no scenario is built
    pub min_joint_probability: f64,
    pub second_top_k: usize,
    pub third_top_k: usize,
    pub retained_mass: f64,
    /// Extra weight for a candidate in the lane next to the reference boat
    pub adjacency_bonus: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            min_joint_probability: 0.005,
            second_top_k: 3,
            third_top_k: 3,
            retained_mass: 0.95,
            adjacency_bonus: 0.4,
        }
    }
}

/// Probability thresholds for recommendation confidence tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BetTierConfig {
    pub very_high: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for BetTierConfig {
    fn default() -> Self {
        BetTierConfig {
            very_high: 0.15,
            high: 0.08,
            moderate: 0.04,
        }
    }
}
