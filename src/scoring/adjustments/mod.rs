//! Ordered, capped corrections on top of the base weighted score.
//!
//! Stages run in a fixed order: rule shift, weather, tide, same-day telemetry,
//! compound buffs. Each stage sees the running score left by the previous one.
//! Per entrant, a stage's delta is clamped to the stage cap, the cumulative
//! correction to the aggregate cap, and the running score to [0, 100].
//!
//! A stage that lacks its input reports a skipped outcome; a stage that fails
//! (malformed rule, malformed snapshot) is logged and treated as a no-op for
//! that stage only.

pub mod compound;
pub mod conditions;
pub mod environment;
pub mod rules;
pub mod telemetry;

pub use compound::{CompoundBuff, CompoundBuffStage};
pub use conditions::RuleCondition;
pub use environment::{TideStage, WeatherStage};
pub use rules::{rule_score_deltas, PatternRule, RuleShiftStage};
pub use telemetry::TelemetryStage;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::DayView;
use crate::config::EngineConfig;
use crate::db::models::{Entrant, RaceContext};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentSource {
    RuleShift,
    Weather,
    Tide,
    Telemetry,
    CompoundBuff,
}

/// What one stage did to one entrant's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub source: AdjustmentSource,
    /// Delta actually applied after all clamping
    pub delta: f64,
    pub cap: f64,
    pub reason: String,
    pub applied: bool,
}

/// A stage's proposal for one entrant, before clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub delta: f64,
    pub applied: bool,
    pub reason: String,
}

impl StageOutcome {
    pub fn applied(delta: f64, reason: impl Into<String>) -> Self {
        StageOutcome {
            delta,
            applied: true,
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome {
            delta: 0.0,
            applied: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("malformed pattern rule {id}: {reason}")]
    MalformedRule { id: String, reason: String },

    #[error("malformed compound buff {id}: {reason}")]
    MalformedBuff { id: String, reason: String },

    #[error("malformed weather snapshot: {0}")]
    MalformedWeather(String),

    #[error("malformed tide snapshot: {0}")]
    MalformedTide(String),

    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),
}

/// Everything a stage may read. `scores` is the running score per entrant,
/// index-aligned with `entrants`.
pub struct StageInput<'a> {
    pub race: &'a RaceContext,
    pub entrants: &'a [Entrant],
    /// Course each entrant starts from (exhibition course when declared)
    pub courses: &'a [u8],
    pub scores: &'a [f64],
    pub view: DayView<'a>,
    pub config: &'a EngineConfig,
}

pub trait AdjustmentStage {
    fn source(&self) -> AdjustmentSource;

    /// Largest absolute delta this stage may apply to one entrant.
    fn cap(&self) -> f64;

    /// One outcome per entrant, in input order.
    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError>;
}

/// Final score and per-stage records for one entrant.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedScore {
    pub score: f64,
    pub records: Vec<AdjustmentRecord>,
}

pub struct AdjustmentPipeline<'a> {
    stages: Vec<Box<dyn AdjustmentStage + 'a>>,
    aggregate_cap: f64,
}

impl<'a> AdjustmentPipeline<'a> {
    /// The fixed production stage order.
    pub fn standard(
        config: &'a EngineConfig,
        rules: &'a [PatternRule],
        buffs: &'a [CompoundBuff],
    ) -> Self {
        let adj = &config.adjustments;
        AdjustmentPipeline {
            stages: vec![
                Box::new(RuleShiftStage::new(&adj.rule_shift, rules)),
                Box::new(WeatherStage::new(&adj.weather)),
                Box::new(TideStage::new(&adj.tide)),
                Box::new(TelemetryStage::new(&adj.telemetry)),
                Box::new(CompoundBuffStage::new(&adj.compound, buffs)),
            ],
            aggregate_cap: adj.aggregate_cap,
        }
    }

    pub fn with_stages(stages: Vec<Box<dyn AdjustmentStage + 'a>>, aggregate_cap: f64) -> Self {
        AdjustmentPipeline {
            stages,
            aggregate_cap,
        }
    }

    pub fn run(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
        base_scores: &[f64],
        view: DayView<'_>,
        config: &EngineConfig,
    ) -> Vec<AdjustedScore> {
        let n = entrants.len().min(base_scores.len());
        let entrants = &entrants[..n];
        let base: Vec<f64> = base_scores[..n].iter().map(|s| clamp_score(*s)).collect();
        let mut scores = base.clone();
        let mut records: Vec<Vec<AdjustmentRecord>> = vec![Vec::with_capacity(self.stages.len()); n];
        let aggregate_cap = self.aggregate_cap.max(0.0);
        let courses = super::resolve_courses(&view, race, entrants);

        for stage in &self.stages {
            let source = stage.source();
            let cap = stage.cap().max(0.0);
            let input = StageInput {
                race,
                entrants,
                courses: &courses,
                scores: &scores,
                view,
                config,
            };
            let outcomes = match stage.evaluate(&input) {
                Ok(outcomes) if outcomes.len() == n => outcomes,
                Ok(outcomes) => {
                    warn!(
                        "race {}: {:?} stage returned {} outcomes for {} entrants; skipped",
                        race.race_id,
                        source,
                        outcomes.len(),
                        n
                    );
                    vec![StageOutcome::skipped("stage fault: outcome count mismatch"); n]
                }
                Err(e) => {
                    warn!("race {}: {:?} stage skipped: {}", race.race_id, source, e);
                    vec![StageOutcome::skipped(format!("stage fault: {}", e)); n]
                }
            };

            for (i, outcome) in outcomes.into_iter().enumerate() {
                let proposed = if outcome.applied && outcome.delta.is_finite() {
                    outcome.delta.clamp(-cap, cap)
                } else {
                    0.0
                };
                let cumulative = scores[i] - base[i];
                let room_up = (aggregate_cap - cumulative).max(0.0);
                let room_down = (aggregate_cap + cumulative).max(0.0);
                let bounded = proposed.clamp(-room_down, room_up);

                let before = scores[i];
                scores[i] = clamp_score(before + bounded);
                let delta = scores[i] - before;
                if delta != 0.0 {
                    debug!(
                        "race {} lane {}: {:?} {:+.3} ({})",
                        race.race_id, entrants[i].lane, source, delta, outcome.reason
                    );
                }
                records[i].push(AdjustmentRecord {
                    source,
                    delta,
                    cap,
                    reason: outcome.reason,
                    applied: outcome.applied,
                });
            }
        }

        scores
            .into_iter()
            .zip(records)
            .map(|(score, records)| AdjustedScore { score, records })
            .collect()
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(SCORE_MIN, SCORE_MAX)
    } else {
        SCORE_MIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DayCache, RetryPolicy};
    use crate::db::models::Weather;
    use crate::testutil::{day, race_on, standard_entrants, FixtureStore};
    use approx::assert_relative_eq;

    /// Stage that proposes a fixed delta for everyone.
    struct Fixed {
        source: AdjustmentSource,
        cap: f64,
        delta: f64,
    }

    impl AdjustmentStage for Fixed {
        fn source(&self) -> AdjustmentSource {
            self.source
        }
        fn cap(&self) -> f64 {
            self.cap
        }
        fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
            Ok(input
                .entrants
                .iter()
                .map(|_| StageOutcome::applied(self.delta, "fixed"))
                .collect())
        }
    }

    struct Broken;

    impl AdjustmentStage for Broken {
        fn source(&self) -> AdjustmentSource {
            AdjustmentSource::Weather
        }
        fn cap(&self) -> f64 {
            5.0
        }
        fn evaluate(&self, _input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
            Err(StageError::MalformedWeather("wind speed is NaN".into()))
        }
    }

    fn loaded() -> DayCache {
        let store = FixtureStore::with_standard_day(day(1));
        let mut cache = DayCache::new(10);
        cache.load(&store, day(1), &RetryPolicy::default()).unwrap();
        cache
    }

    #[test]
    fn stage_deltas_are_capped_and_score_clamped() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 12);
        let entrants = standard_entrants();
        let pipeline = AdjustmentPipeline::with_stages(
            vec![Box::new(Fixed {
                source: AdjustmentSource::RuleShift,
                cap: 10.0,
                delta: 50.0,
            })],
            100.0,
        );
        let base = [95.0, 50.0, 50.0, 50.0, 50.0, 50.0];
        let out = pipeline.run(&race, &entrants, &base, view, &config);
        assert_relative_eq!(out[0].score, 100.0);
        assert_relative_eq!(out[0].records[0].delta, 5.0);
        assert_relative_eq!(out[1].score, 60.0);
        for adjusted in &out {
            for record in &adjusted.records {
                assert!(record.delta.abs() <= record.cap + 1e-12);
            }
        }
    }

    #[test]
    fn failing_stage_is_a_noop_and_later_stages_still_run() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 12);
        let entrants = standard_entrants();
        let pipeline = AdjustmentPipeline::with_stages(
            vec![
                Box::new(Broken),
                Box::new(Fixed {
                    source: AdjustmentSource::CompoundBuff,
                    cap: 3.0,
                    delta: 2.0,
                }),
            ],
            20.0,
        );
        let out = pipeline.run(&race, &entrants, &[40.0; 6], view, &config);
        for adjusted in &out {
            assert_eq!(adjusted.records.len(), 2);
            assert!(!adjusted.records[0].applied);
            assert_eq!(adjusted.records[0].delta, 0.0);
            assert!(adjusted.records[0].reason.contains("stage fault"));
            assert_relative_eq!(adjusted.score, 42.0);
        }
    }

    #[test]
    fn aggregate_cap_limits_compounding() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 12);
        let entrants = standard_entrants();
        let stages: Vec<Box<dyn AdjustmentStage>> = (0..4)
            .map(|_| {
                Box::new(Fixed {
                    source: AdjustmentSource::Telemetry,
                    cap: 8.0,
                    delta: -8.0,
                }) as Box<dyn AdjustmentStage>
            })
            .collect();
        let pipeline = AdjustmentPipeline::with_stages(stages, 20.0);
        let out = pipeline.run(&race, &entrants, &[60.0; 6], view, &config);
        for adjusted in &out {
            assert_relative_eq!(adjusted.score, 40.0, epsilon = 1e-9);
            let deltas: Vec<f64> = adjusted.records.iter().map(|r| r.delta).collect();
            assert_relative_eq!(deltas[2], -4.0, epsilon = 1e-9);
            assert_relative_eq!(deltas[3], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn standard_pipeline_without_snapshots_leaves_weather_and_tide_at_zero() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 18);
        let entrants = standard_entrants();
        let pipeline = AdjustmentPipeline::standard(&config, &[], &[]);
        let out = pipeline.run(&race, &entrants, &[70.0, 55.0, 50.0, 45.0, 40.0, 35.0], view, &config);
        for adjusted in &out {
            let sources: Vec<AdjustmentSource> = adjusted.records.iter().map(|r| r.source).collect();
            assert_eq!(
                sources,
                vec![
                    AdjustmentSource::RuleShift,
                    AdjustmentSource::Weather,
                    AdjustmentSource::Tide,
                    AdjustmentSource::Telemetry,
                    AdjustmentSource::CompoundBuff,
                ]
            );
            for record in &adjusted.records {
                if matches!(record.source, AdjustmentSource::Weather | AdjustmentSource::Tide) {
                    assert_eq!(record.delta, 0.0);
                    assert!(!record.applied);
                }
            }
        }
    }

    #[test]
    fn malformed_weather_does_not_abort_pipeline() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let mut race = race_on(day(1), 12);
        race.weather = Some(Weather {
            wind_speed: f64::NAN,
            wind_direction: 90.0,
            wave_height: 2.0,
        });
        let entrants = standard_entrants();
        let pipeline = AdjustmentPipeline::standard(&config, &[], &[]);
        let out = pipeline.run(&race, &entrants, &[50.0; 6], view, &config);
        assert_eq!(out.len(), 6);
        for adjusted in &out {
            let weather = &adjusted.records[1];
            assert_eq!(weather.source, AdjustmentSource::Weather);
            assert!(!weather.applied);
            assert!((0.0..=100.0).contains(&adjusted.score));
        }
    }

    fn lane_rule(id: &str, lane: u8, reliability: f64) -> PatternRule {
        PatternRule {
            id: id.to_string(),
            condition: RuleCondition {
                lanes: Some(vec![lane]),
                ..RuleCondition::default()
            },
            multiplier: 3.0,
            reliability,
        }
    }

    #[test]
    fn matched_rule_lifts_its_entrant_and_renormalises_the_field() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 18);
        let entrants = standard_entrants();
        let rules = vec![lane_rule("outside-lane", 6, 1.0)];
        let pipeline = AdjustmentPipeline::standard(&config, &rules, &[]);
        let base = [70.0, 55.0, 50.0, 45.0, 40.0, 35.0];
        let out = pipeline.run(&race, &entrants, &base, view, &config);

        let cap = config.adjustments.rule_shift.cap;
        let lifted = &out[5].records[0];
        assert_eq!(lifted.source, AdjustmentSource::RuleShift);
        assert!(lifted.applied);
        assert!(lifted.delta > 0.0 && lifted.delta <= cap);
        assert!(lifted.reason.contains("outside-lane"));
        for adjusted in &out[..5] {
            let record = &adjusted.records[0];
            assert_eq!(record.source, AdjustmentSource::RuleShift);
            assert!(record.delta < 0.0);
            assert!(record.delta.abs() <= cap);
            assert!(record.reason.starts_with("field renormalised"));
        }
        for (adjusted, base) in out.iter().zip(base) {
            let total: f64 = adjusted.records.iter().map(|r| r.delta).sum();
            assert_relative_eq!(adjusted.score, base + total, epsilon = 1e-9);
        }
    }

    #[test]
    fn malformed_rule_skips_only_the_rule_stage() {
        let config = EngineConfig::default();
        let cache = loaded();
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 18);
        let entrants = standard_entrants();
        let rules = vec![lane_rule("outside-lane", 6, 1.0), lane_rule("overconfident", 1, 2.0)];
        let pipeline = AdjustmentPipeline::standard(&config, &rules, &[]);
        let out = pipeline.run(&race, &entrants, &[50.0; 6], view, &config);
        assert_eq!(out.len(), 6);
        for adjusted in &out {
            assert_eq!(adjusted.records.len(), 5);
            let rule = &adjusted.records[0];
            assert_eq!(rule.source, AdjustmentSource::RuleShift);
            assert_eq!(rule.delta, 0.0);
            assert!(!rule.applied);
            assert!(rule.reason.contains("stage fault"));
            assert!(rule.reason.contains("overconfident"));
            assert_eq!(adjusted.records[4].source, AdjustmentSource::CompoundBuff);
        }
    }
}
