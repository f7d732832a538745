use serde::{Deserialize, Serialize};

use crate::cache::DayView;
use crate::db::models::{Entrant, GradeTier, RaceContext, TidePhase, VenueClass};

/// Conjunction of optional predicates over (entrant, race). An unset field
/// matches everything; a set environment field never matches a race that lacks
/// the corresponding snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    pub venue_ids: Option<Vec<u8>>,
    pub venue_classes: Option<Vec<VenueClass>>,
    pub lanes: Option<Vec<u8>>,
    pub grades: Option<Vec<GradeTier>>,
    pub min_wind_speed: Option<f64>,
    pub max_wind_speed: Option<f64>,
    /// Require a headwind (true) or a tailwind (false) component
    pub headwind: Option<bool>,
    pub min_wave_height: Option<f64>,
    pub max_wave_height: Option<f64>,
    pub tide_phases: Option<Vec<TidePhase>>,
    pub min_motor_top2: Option<f64>,
    pub min_racer_win_rate: Option<f64>,
}

impl RuleCondition {
    /// Describe why the condition cannot be evaluated, if it can't.
    pub fn problem(&self) -> Option<String> {
        let bounds = [
            ("min_wind_speed", self.min_wind_speed),
            ("max_wind_speed", self.max_wind_speed),
            ("min_wave_height", self.min_wave_height),
            ("max_wave_height", self.max_wave_height),
            ("min_motor_top2", self.min_motor_top2),
            ("min_racer_win_rate", self.min_racer_win_rate),
        ];
        for (name, value) in bounds {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Some(format!("{} is not finite", name));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.min_wind_speed, self.max_wind_speed) {
            if lo > hi {
                return Some("min_wind_speed exceeds max_wind_speed".into());
            }
        }
        if let (Some(lo), Some(hi)) = (self.min_wave_height, self.max_wave_height) {
            if lo > hi {
                return Some("min_wave_height exceeds max_wave_height".into());
            }
        }
        if let Some(lanes) = &self.lanes {
            if lanes.iter().any(|l| !(1..=6).contains(l)) {
                return Some("lane outside 1..=6".into());
            }
        }
        None
    }

    pub fn matches(&self, race: &RaceContext, entrant: &Entrant, view: &DayView<'_>) -> bool {
        if !contains(&self.venue_ids, &race.venue_id)
            || !contains(&self.venue_classes, &race.venue_class)
            || !contains(&self.lanes, &entrant.lane)
            || !contains(&self.grades, &race.grade)
        {
            return false;
        }

        let needs_weather = self.min_wind_speed.is_some()
            || self.max_wind_speed.is_some()
            || self.headwind.is_some()
            || self.min_wave_height.is_some()
            || self.max_wave_height.is_some();
        if needs_weather {
            let Some(weather) = race.weather else {
                return false;
            };
            if self.min_wind_speed.is_some_and(|v| weather.wind_speed < v)
                || self.max_wind_speed.is_some_and(|v| weather.wind_speed > v)
                || self.min_wave_height.is_some_and(|v| weather.wave_height < v)
                || self.max_wave_height.is_some_and(|v| weather.wave_height > v)
            {
                return false;
            }
            if let Some(want_headwind) = self.headwind {
                let (tail, _) = weather.components();
                if want_headwind != (tail < 0.0) {
                    return false;
                }
            }
        }

        if let Some(phases) = &self.tide_phases {
            match race.tide {
                Some(tide) if phases.contains(&tide.phase) => {}
                _ => return false,
            }
        }

        if let Some(min) = self.min_motor_top2 {
            match view.motor(race.venue_id, entrant.motor_id) {
                Some(m) if m.record.starts > 0 && m.record.top2_rate() >= min => {}
                _ => return false,
            }
        }

        if let Some(min) = self.min_racer_win_rate {
            match view.racer(entrant.racer_id) {
                Some(r) if r.record.starts > 0 && r.record.win_rate() >= min => {}
                _ => return false,
            }
        }

        true
    }
}

fn contains<T: PartialEq>(allowed: &Option<Vec<T>>, value: &T) -> bool {
    allowed.as_ref().map_or(true, |set| set.contains(value))
}
