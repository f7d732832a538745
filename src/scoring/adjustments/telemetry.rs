//! Stage 4: same-day exhibition telemetry relative to the field.

use super::{AdjustmentSource, AdjustmentStage, StageError, StageInput, StageOutcome};
use crate::config::engine::TelemetryConfig;

/// Exhibition laps outside this range are treated as corrupt input.
const PLAUSIBLE_EXHIBITION_TIME: std::ops::RangeInclusive<f64> = 5.0..=9.0;
const PLAUSIBLE_EXHIBITION_START: std::ops::RangeInclusive<f64> = -0.5..=1.0;

pub struct TelemetryStage<'a> {
    cfg: &'a TelemetryConfig,
}

impl<'a> TelemetryStage<'a> {
    pub fn new(cfg: &'a TelemetryConfig) -> Self {
        TelemetryStage { cfg }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<(f64, usize)> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| (sum / n as f64, n))
}

impl AdjustmentStage for TelemetryStage<'_> {
    fn source(&self) -> AdjustmentSource {
        AdjustmentSource::Telemetry
    }

    fn cap(&self) -> f64 {
        self.cfg.cap
    }

    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
        let race = input.race;
        let rows: Vec<_> = input
            .entrants
            .iter()
            .map(|e| input.view.telemetry(race.venue_id, race.race_no, e.lane))
            .collect();

        for (entrant, row) in input.entrants.iter().zip(&rows) {
            let Some(row) = row else { continue };
            if let Some(t) = row.exhibition_time {
                if !PLAUSIBLE_EXHIBITION_TIME.contains(&t) {
                    return Err(StageError::MalformedTelemetry(format!(
                        "lane {} exhibition time {}",
                        entrant.lane, t
                    )));
                }
            }
            if let Some(st) = row.exhibition_start {
                if !PLAUSIBLE_EXHIBITION_START.contains(&st) {
                    return Err(StageError::MalformedTelemetry(format!(
                        "lane {} exhibition start {}",
                        entrant.lane, st
                    )));
                }
            }
        }

        let time_mean = mean(rows.iter().flatten().filter_map(|r| r.exhibition_time))
            .filter(|(_, n)| *n >= 2)
            .map(|(m, _)| m);
        let start_mean = mean(rows.iter().flatten().filter_map(|r| r.exhibition_start))
            .filter(|(_, n)| *n >= 2)
            .map(|(m, _)| m);
        if time_mean.is_none() && start_mean.is_none() {
            return Ok(input
                .entrants
                .iter()
                .map(|_| StageOutcome::skipped("fewer than two boats with exhibition data"))
                .collect());
        }

        Ok(rows
            .iter()
            .map(|row| {
                let Some(row) = row else {
                    return StageOutcome::skipped("no exhibition data");
                };
                let time_part = match (time_mean, row.exhibition_time) {
                    (Some(m), Some(t)) => Some((m - t) / 0.1 * self.cfg.points_per_tenth),
                    _ => None,
                };
                let start_part = match (start_mean, row.exhibition_start) {
                    (Some(m), Some(st)) => {
                        Some((m - st) / 0.01 * self.cfg.start_points_per_hundredth)
                    }
                    _ => None,
                };
                match (time_part, start_part) {
                    (None, None) => StageOutcome::skipped("no exhibition data"),
                    (t, s) => StageOutcome::applied(
                        t.unwrap_or(0.0) + s.unwrap_or(0.0),
                        format!(
                            "exhibition time {:+.2} pts, start {:+.2} pts vs field",
                            t.unwrap_or(0.0),
                            s.unwrap_or(0.0)
                        ),
                    ),
                }
            })
            .collect())
    }
}
