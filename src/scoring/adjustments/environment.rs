//! Stages 2 and 3: weather and tide corrections.
//!
//! Both are percentage adjustments of the score the stage receives, looked up
//! per starting course.

use super::{AdjustmentSource, AdjustmentStage, StageError, StageInput, StageOutcome};
use crate::config::engine::{TideStageConfig, WeatherConfig};
use crate::db::models::Entrant;

fn lane_index(lane: u8) -> Option<usize> {
    lane.checked_sub(1).map(usize::from).filter(|i| *i < 6)
}

/// Tables are read by the course actually taken, not the pit lane.
fn course_of(input: &StageInput<'_>, i: usize, entrant: &Entrant) -> u8 {
    input.courses.get(i).copied().unwrap_or(entrant.lane)
}

pub struct WeatherStage<'a> {
    cfg: &'a WeatherConfig,
}

impl<'a> WeatherStage<'a> {
    pub fn new(cfg: &'a WeatherConfig) -> Self {
        WeatherStage { cfg }
    }

    /// Total percent adjustment for a lane index under the given conditions.
    fn percent(&self, idx: usize, tail: f64, cross: f64, wave: f64) -> f64 {
        let cfg = self.cfg;
        let mut pct = 0.0;
        if tail > cfg.calm_wind {
            pct += (tail - cfg.calm_wind) * cfg.tailwind_pct_per_ms[idx];
        } else if -tail > cfg.calm_wind {
            pct += (-tail - cfg.calm_wind) * cfg.headwind_pct_per_ms[idx];
        }
        if cross > cfg.calm_wind {
            pct += (cross - cfg.calm_wind) * cfg.crosswind_pct_per_ms[idx];
        }
        if wave >= cfg.rough_wave {
            pct += cfg.rough_pct[idx];
        } else if wave >= cfg.choppy_wave {
            pct += cfg.choppy_pct[idx];
        }
        pct
    }
}

impl AdjustmentStage for WeatherStage<'_> {
    fn source(&self) -> AdjustmentSource {
        AdjustmentSource::Weather
    }

    fn cap(&self) -> f64 {
        self.cfg.cap
    }

    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
        let Some(weather) = input.race.weather else {
            return Ok(input
                .entrants
                .iter()
                .map(|_| StageOutcome::skipped("no weather snapshot"))
                .collect());
        };
        if !weather.is_well_formed() {
            return Err(StageError::MalformedWeather(format!(
                "wind {} m/s at {} deg, wave {} cm",
                weather.wind_speed, weather.wind_direction, weather.wave_height
            )));
        }
        let (tail, cross) = weather.components();

        Ok(input
            .entrants
            .iter()
            .zip(input.scores)
            .enumerate()
            .map(|(i, (entrant, score))| match lane_index(course_of(input, i, entrant)) {
                Some(idx) => {
                    let pct = self.percent(idx, tail, cross, weather.wave_height);
                    StageOutcome::applied(
                        score * pct / 100.0,
                        format!(
                            "tail {:+.1} m/s, cross {:.1} m/s, wave {:.0} cm: {:+.2}%",
                            tail, cross, weather.wave_height, pct
                        ),
                    )
                }
                None => StageOutcome::skipped(format!("lane {} has no weather table", entrant.lane)),
            })
            .collect())
    }
}

pub struct TideStage<'a> {
    cfg: &'a TideStageConfig,
}

impl<'a> TideStage<'a> {
    pub fn new(cfg: &'a TideStageConfig) -> Self {
        TideStage { cfg }
    }
}

impl AdjustmentStage for TideStage<'_> {
    fn source(&self) -> AdjustmentSource {
        AdjustmentSource::Tide
    }

    fn cap(&self) -> f64 {
        self.cfg.cap
    }

    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
        let skip_all = |reason: &str| -> Vec<StageOutcome> {
            input
                .entrants
                .iter()
                .map(|_| StageOutcome::skipped(reason))
                .collect()
        };
        let Some(coefficients) = input
            .config
            .venue(input.race.venue_id)
            .and_then(|v| v.tide.as_ref())
        else {
            return Ok(skip_all("venue is not tide-affected"));
        };
        let Some(tide) = input.race.tide else {
            return Ok(skip_all("no tide snapshot"));
        };
        if !tide.level.is_finite() {
            return Err(StageError::MalformedTide(format!("level {}", tide.level)));
        }
        let table = coefficients.for_phase(tide.phase);
        if table.iter().any(|c| !c.is_finite()) {
            return Err(StageError::MalformedTide(format!(
                "non-finite coefficient for venue {} {}",
                input.race.venue_id,
                tide.phase.as_str()
            )));
        }

        Ok(input
            .entrants
            .iter()
            .zip(input.scores)
            .enumerate()
            .map(|(i, (entrant, score))| match lane_index(course_of(input, i, entrant)) {
                Some(idx) => StageOutcome::applied(
                    score * table[idx] / 100.0,
                    format!("{} tide: {:+.2}%", tide.phase.as_str(), table[idx]),
                ),
                None => StageOutcome::skipped(format!("lane {} has no tide table", entrant.lane)),
            })
            .collect())
    }
}
