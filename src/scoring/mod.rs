//! Prediction side: weights → factor scores → adjustments → confidence → rank.

pub mod adjustments;
pub mod confidence;
pub mod features;
pub mod weights;

pub use confidence::{ConfidenceTier, SampleCounts};
pub use features::FactorScore;
pub use weights::WeightSet;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::cache::DayView;
use crate::config::EngineConfig;
use crate::db::models::{Entrant, RaceContext};
use crate::error::EngineError;
use adjustments::{AdjustmentPipeline, AdjustmentRecord, CompoundBuff, PatternRule};

pub const MIN_ENTRANTS: usize = 2;
pub const MAX_ENTRANTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    /// Lane advantage at the venue plus the racer's record from this lane
    Course,
    /// Overall and local record plus start timing
    Competitor,
    /// Motor and hull records at the venue
    Equipment,
    /// Fit between the racer's winning techniques and the lane
    TechniqueAffinity,
    /// Record in races of this grade
    ClassAffinity,
    /// Recent finishing positions
    Form,
}

impl FactorKind {
    pub const ALL: [FactorKind; 6] = [
        FactorKind::Course,
        FactorKind::Competitor,
        FactorKind::Equipment,
        FactorKind::TechniqueAffinity,
        FactorKind::ClassAffinity,
        FactorKind::Form,
    ];
}

/// Scored entrant, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantPrediction {
    pub lane: u8,
    pub racer_id: u32,
    pub factors: Vec<FactorScore>,
    /// Sum of factor values before adjustments
    pub base_score: f64,
    /// Final score in [0, 100]
    pub total_score: f64,
    pub adjustments: Vec<AdjustmentRecord>,
    pub confidence: ConfidenceTier,
    /// 1-based; ties resolved by lane
    pub rank: u32,
}

/// Reject a field the engine cannot score. Thin history is never a reason.
pub fn validate_race(race: &RaceContext, entrants: &[Entrant]) -> Result<(), EngineError> {
    if !(MIN_ENTRANTS..=MAX_ENTRANTS).contains(&entrants.len()) {
        return Err(EngineError::computation(
            &race.race_id,
            format!(
                "{} entrants, expected {}–{}",
                entrants.len(),
                MIN_ENTRANTS,
                MAX_ENTRANTS
            ),
        ));
    }
    let mut lanes = HashSet::new();
    let mut racers = HashSet::new();
    for entrant in entrants {
        if !(1..=6).contains(&entrant.lane) {
            return Err(EngineError::computation(
                &race.race_id,
                format!("lane {} outside 1–6", entrant.lane),
            ));
        }
        if !lanes.insert(entrant.lane) {
            return Err(EngineError::computation(
                &race.race_id,
                format!("lane {} entered twice", entrant.lane),
            ));
        }
        if !racers.insert(entrant.racer_id) {
            return Err(EngineError::computation(
                &race.race_id,
                format!("racer {} entered twice", entrant.racer_id),
            ));
        }
    }
    Ok(())
}

/// Course each entrant actually starts from, index-aligned with `entrants`.
///
/// Courses declared in the exhibition are placed first. Every other boat keeps
/// its pit lane when that course is free, otherwise it is pushed out to the
/// nearest free course outside it. Declarations that collide are ignored and
/// the whole field starts from its pit lanes. The result never repeats a
/// course.
pub fn resolve_courses(view: &DayView<'_>, race: &RaceContext, entrants: &[Entrant]) -> Vec<u8> {
    let pit_lanes: Vec<u8> = entrants.iter().map(|e| e.lane).collect();
    let declared: Vec<Option<u8>> = entrants
        .iter()
        .map(|e| {
            view.telemetry(race.venue_id, race.race_no, e.lane)
                .and_then(|t| t.exhibition_course)
                .filter(|c| (1..=6).contains(c))
        })
        .collect();
    if declared.iter().all(Option::is_none) {
        return pit_lanes;
    }

    let mut taken = [false; 6];
    for course in declared.iter().flatten() {
        let slot = &mut taken[usize::from(course - 1)];
        if *slot {
            warn!(
                "race {}: exhibition course {} declared twice; using pit lanes",
                race.race_id, course
            );
            return pit_lanes;
        }
        *slot = true;
    }

    let mut order: Vec<usize> = (0..entrants.len()).collect();
    order.sort_by_key(|&i| entrants[i].lane);
    let mut courses: Vec<u8> = declared.iter().map(|c| c.unwrap_or(0)).collect();
    for i in order {
        if courses[i] != 0 {
            continue;
        }
        let pit = usize::from(entrants[i].lane.clamp(1, 6) - 1);
        let free = (pit..6)
            .find(|&c| !taken[c])
            .or_else(|| (0..pit).rev().find(|&c| !taken[c]));
        let Some(c) = free else {
            return pit_lanes;
        };
        taken[c] = true;
        courses[i] = c as u8 + 1;
    }
    debug!("race {}: resolved courses {:?}", race.race_id, courses);
    courses
}

/// Check that `view` was loaded for the race's own date.
pub(crate) fn check_view_date(view: &DayView<'_>, race: &RaceContext) -> Result<(), EngineError> {
    if view.date() != race.date() {
        return Err(EngineError::CacheDateMismatch {
            loaded: view.date(),
            requested: race.date(),
        });
    }
    Ok(())
}

/// Highest score first; equal scores fall back to lane order.
fn by_rank(a: &EntrantPrediction, b: &EntrantPrediction) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| a.lane.cmp(&b.lane))
}

fn assign_ranks(predictions: &mut [EntrantPrediction]) {
    predictions.sort_by(by_rank);
    for (i, p) in predictions.iter_mut().enumerate() {
        p.rank = i as u32 + 1;
    }
}

pub struct RacePredictor<'a> {
    config: &'a EngineConfig,
    pipeline: AdjustmentPipeline<'a>,
}

impl<'a> RacePredictor<'a> {
    pub fn new(
        config: &'a EngineConfig,
        rules: &'a [PatternRule],
        buffs: &'a [CompoundBuff],
    ) -> Self {
        RacePredictor {
            config,
            pipeline: AdjustmentPipeline::standard(config, rules, buffs),
        }
    }

    /// Score every entrant of one race. All-or-nothing: a malformed field
    /// yields an error and no partial output.
    pub fn predict(
        &self,
        view: DayView<'_>,
        race: &RaceContext,
        entrants: &[Entrant],
    ) -> Result<Vec<EntrantPrediction>, EngineError> {
        validate_race(race, entrants)?;
        check_view_date(&view, race)?;
        let config = self.config;

        let sufficiency = features::race_sufficiency(&view, entrants, &config.features);
        let weights = weights::resolve(
            &config.base_weights,
            race.venue_class,
            race.grade,
            sufficiency,
            &config.weight_policy,
        );
        debug!(
            "race {}: sufficiency {:.2}, weights {:?}",
            race.race_id,
            sufficiency,
            weights.iter().collect::<Vec<_>>()
        );

        let courses = resolve_courses(&view, race, entrants);
        let factors: Vec<Vec<FactorScore>> = entrants
            .iter()
            .zip(&courses)
            .map(|(e, course)| features::aggregate(&view, race, e, *course, &weights, config))
            .collect();
        let base: Vec<f64> = factors
            .iter()
            .map(|f| adjustments::clamp_score(f.iter().map(|s| s.value).sum()))
            .collect();

        let adjusted = self.pipeline.run(race, entrants, &base, view, config);

        let mut predictions: Vec<EntrantPrediction> = entrants
            .iter()
            .zip(factors)
            .zip(base)
            .zip(adjusted)
            .map(|(((entrant, factors), base_score), adjusted)| {
                let samples = SampleCounts::from_view(&view, race, entrant);
                EntrantPrediction {
                    lane: entrant.lane,
                    racer_id: entrant.racer_id,
                    factors,
                    base_score,
                    total_score: adjusted.score,
                    adjustments: adjusted.records,
                    confidence: confidence::classify(adjusted.score, &samples, &config.confidence),
                    rank: 0,
                }
            })
            .collect();
        assign_ranks(&mut predictions);
        Ok(predictions)
    }
}
