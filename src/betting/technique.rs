//! Per-entrant posterior over winning techniques.
//!
//! The prior is the joint table P(lane wins via technique) for the entrant's
//! resolved lane. Every likelihood term is a multiplier that is exactly 1.0
//! when its input is missing, so thin history never removes a technique from
//! the normalisation. The row total after the likelihood terms (times a
//! technique-neutral skill factor) is the entrant's unnormalised win strength;
//! dividing by the field total gives the win probability.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::DayView;
use crate::config::engine::TechniqueConfig;
use crate::config::EngineConfig;
use crate::db::models::{Entrant, RaceContext, Technique};
use crate::error::EngineError;
use crate::scoring::{check_view_date, resolve_courses, validate_race};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueDistribution {
    pub lane: u8,
    pub racer_id: u32,
    /// Course actually taken (exhibition start course when known)
    pub resolved_lane: u8,
    pub win_probability: f64,
    /// Sums to 1
    pub techniques: BTreeMap<Technique, f64>,
}

impl TechniqueDistribution {
    pub fn technique(&self, technique: Technique) -> f64 {
        self.techniques.get(&technique).copied().unwrap_or(0.0)
    }

    /// P(this entrant wins via `technique`)
    pub fn joint(&self, technique: Technique) -> f64 {
        self.win_probability * self.technique(technique)
    }
}

/// Techniques decided at the start line.
fn start_driven(t: Technique) -> bool {
    matches!(t, Technique::Lead | Technique::Overtake | Technique::OvertakeSlip)
}

/// Techniques that depend on where the boat sits, as opposed to what happens later.
fn positional(t: Technique) -> bool {
    !matches!(t, Technique::LatePass | Technique::Fortunate)
}

fn acceleration_driven(t: Technique) -> bool {
    matches!(t, Technique::Lead | Technique::Overtake)
}

fn speed_driven(t: Technique) -> bool {
    matches!(t, Technique::OvertakeSlip | Technique::LatePass)
}

fn mix_factors(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    prior: &[f64; 6],
    cfg: &TechniqueConfig,
) -> [f64; 6] {
    let mut factors = [1.0; 6];
    let Some(mix) = view
        .technique_mix(entrant.racer_id, race.venue_id)
        .filter(|m| m.total() >= cfg.mix_min_wins)
    else {
        return factors;
    };
    let prior_total: f64 = prior.iter().sum();
    if prior_total <= 0.0 {
        return factors;
    }
    let total = mix.total() as f64;
    for t in Technique::ALL {
        let prior_share = prior[t.index()] / prior_total;
        if prior_share <= 0.0 {
            continue;
        }
        let smoothed =
            (mix.get(t) as f64 + cfg.mix_pseudo_count * prior_share) / (total + cfg.mix_pseudo_count);
        factors[t.index()] = (smoothed / prior_share).clamp(cfg.mix_factor_min, cfg.mix_factor_max);
    }
    factors
}

fn start_factor(view: &DayView<'_>, entrant: &Entrant, t: Technique, cfg: &TechniqueConfig) -> f64 {
    if !start_driven(t) {
        return 1.0;
    }
    match view
        .racer(entrant.racer_id)
        .filter(|r| r.record.starts >= cfg.skill_min_starts)
        .and_then(|r| r.avg_start_timing)
    {
        Some(st) if st.is_finite() && st <= cfg.start_sharp => cfg.start_sharp_factor,
        Some(st) if st.is_finite() && st >= cfg.start_slow => cfg.start_slow_factor,
        _ => 1.0,
    }
}

fn venue_factor(config: &EngineConfig, race: &RaceContext, lane: u8, t: Technique) -> f64 {
    if !positional(t) {
        return 1.0;
    }
    let national = config.national_lane_rate(lane);
    match config.venue(race.venue_id) {
        Some(venue) if national > 0.0 && venue.lane_rate(lane) > 0.0 => {
            venue.lane_rate(lane) / national
        }
        _ => 1.0,
    }
}

fn wind_factor(race: &RaceContext, t: Technique, cfg: &TechniqueConfig) -> f64 {
    let Some(weather) = race.weather.filter(|w| w.is_well_formed()) else {
        return 1.0;
    };
    let (tail, cross) = weather.components();
    let mut factor = 1.0;
    let along = tail.abs() - cfg.wind_calm;
    if along > 0.0 {
        let effect = along * cfg.wind_per_ms;
        // Tailwind carries the inside boats through the turn; headwind holds
        // them up for the outside sweep.
        let inside = matches!(t, Technique::Lead | Technique::SlipThrough);
        let outside = matches!(t, Technique::Overtake | Technique::OvertakeSlip);
        if tail > 0.0 {
            if inside {
                factor *= 1.0 + effect;
            } else if outside {
                factor *= 1.0 - effect;
            }
        } else if inside {
            factor *= 1.0 - effect;
        } else if outside {
            factor *= 1.0 + effect;
        }
    }
    let across = cross - cfg.wind_calm;
    if across > 0.0 && !positional(t) {
        factor *= 1.0 + across * cfg.wind_per_ms;
    }
    factor.max(0.1)
}

fn profile_factor(
    view: &DayView<'_>,
    race: &RaceContext,
    entrant: &Entrant,
    t: Technique,
    cfg: &TechniqueConfig,
) -> f64 {
    let Some(motor) = view.motor(race.venue_id, entrant.motor_id) else {
        return 1.0;
    };
    let decided = motor.acceleration_wins + motor.speed_wins;
    if decided < cfg.profile_min_wins || decided == 0 {
        return 1.0;
    }
    // +1 = pure acceleration, -1 = pure top speed
    let bias = (motor.acceleration_wins as f64 - motor.speed_wins as f64) / decided as f64;
    if acceleration_driven(t) {
        1.0 + cfg.profile_strength * bias
    } else if speed_driven(t) {
        1.0 - cfg.profile_strength * bias
    } else {
        1.0
    }
}

fn skill_factor(view: &DayView<'_>, entrant: &Entrant, cfg: &TechniqueConfig) -> f64 {
    if cfg.skill_baseline_win_rate <= 0.0 {
        return 1.0;
    }
    view.racer(entrant.racer_id)
        .filter(|r| r.record.starts >= cfg.skill_min_starts)
        .map(|r| (r.record.win_rate() / cfg.skill_baseline_win_rate).clamp(cfg.skill_factor_min, cfg.skill_factor_max))
        .unwrap_or(1.0)
}

/// Posterior technique mix and field-normalised win probability per entrant,
/// in entrant order.
pub fn distributions(
    view: DayView<'_>,
    race: &RaceContext,
    entrants: &[Entrant],
    config: &EngineConfig,
) -> Result<Vec<TechniqueDistribution>, EngineError> {
    validate_race(race, entrants)?;
    check_view_date(&view, race)?;
    let cfg = &config.technique;

    let courses = resolve_courses(&view, race, entrants);
    let mut rows = Vec::with_capacity(entrants.len());
    for (entrant, &lane) in entrants.iter().zip(&courses) {
        let prior = cfg.lane_priors[usize::from(lane - 1)];
        let mix = mix_factors(&view, race, entrant, &prior, cfg);

        let mut raw = [0.0; 6];
        for t in Technique::ALL {
            let i = t.index();
            let value = prior[i]
                * mix[i]
                * start_factor(&view, entrant, t, cfg)
                * venue_factor(config, race, lane, t)
                * wind_factor(race, t, cfg)
                * profile_factor(&view, race, entrant, t, cfg);
            raw[i] = if value.is_finite() { value.max(0.0) } else { 0.0 };
        }
        let row_total: f64 = raw.iter().sum();
        if row_total <= 0.0 {
            return Err(EngineError::computation(
                &race.race_id,
                format!("lane {} has no technique mass", entrant.lane),
            ));
        }
        let strength = row_total * skill_factor(&view, entrant, cfg);
        rows.push((entrant, lane, raw, row_total, strength));
    }

    let field_total: f64 = rows.iter().map(|r| r.4).sum();
    if field_total <= 0.0 || !field_total.is_finite() {
        return Err(EngineError::computation(&race.race_id, "field has no win mass"));
    }

    Ok(rows
        .into_iter()
        .map(|(entrant, lane, raw, row_total, strength)| TechniqueDistribution {
            lane: entrant.lane,
            racer_id: entrant.racer_id,
            resolved_lane: lane,
            win_probability: strength / field_total,
            techniques: Technique::ALL
                .iter()
                .map(|t| (*t, raw[t.index()] / row_total))
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DayCache, RetryPolicy};
    use crate::db::models::{TelemetryRow, Weather};
    use crate::testutil::{day, race_on, standard_entrants, FixtureStore};
    use approx::assert_relative_eq;

    fn loaded(store: &FixtureStore) -> DayCache {
        let mut cache = DayCache::new(10);
        cache.load(store, day(1), &RetryPolicy::default()).unwrap();
        cache
    }

    #[test]
    fn posteriors_sum_to_one() {
        let config = EngineConfig::default();
        let store = FixtureStore::with_standard_day(day(1));
        let cache = loaded(&store);
        let mut race = race_on(day(1), 24);
        race.weather = Some(Weather {
            wind_speed: 5.0,
            wind_direction: 150.0,
            wave_height: 5.0,
        });
        let out = distributions(cache.view(day(1)).unwrap(), &race, &standard_entrants(), &config)
            .unwrap();
        for d in &out {
            assert_relative_eq!(d.techniques.values().sum::<f64>(), 1.0, epsilon = 1e-6);
            assert_eq!(d.techniques.len(), Technique::ALL.len());
        }
        assert_relative_eq!(
            out.iter().map(|d| d.win_probability).sum::<f64>(),
            1.0,
            epsilon = 1e-9
        );
        assert!(out[0].win_probability > out[5].win_probability);
    }

    #[test]
    fn missing_history_falls_back_to_the_lane_prior() {
        let config = EngineConfig::default();
        let store = FixtureStore::with_standard_day(day(1));
        let cache = loaded(&store);
        let race = race_on(day(1), 12);
        let strangers: Vec<Entrant> = (1..=6)
            .map(|lane| Entrant {
                lane,
                racer_id: 7000 + lane as u32,
                motor_id: 800 + lane as u32,
                hull_id: 800 + lane as u32,
            })
            .collect();
        let out = distributions(cache.view(day(1)).unwrap(), &race, &strangers, &config).unwrap();
        // Lane 1's posterior keeps the prior's shape except for the venue factor
        // on positional techniques; lead stays dominant and no slot is dropped.
        assert!(out[0].technique(Technique::Lead) > 0.8);
        assert_eq!(out[1].technique(Technique::Lead), 0.0);
        for d in &out {
            assert_relative_eq!(d.techniques.values().sum::<f64>(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn exhibition_course_changes_the_prior() {
        let config = EngineConfig::default();
        let mut store = FixtureStore::with_standard_day(day(1));
        store.set_telemetry(
            day(1),
            vec![TelemetryRow {
                venue_id: 12,
                race_no: 1,
                lane: 2,
                exhibition_time: None,
                exhibition_start: None,
                exhibition_course: Some(1),
            }],
        );
        let cache = loaded(&store);
        let race = race_on(day(1), 12);
        let mut entrants = standard_entrants();
        entrants.truncate(3);
        let out = distributions(cache.view(day(1)).unwrap(), &race, &entrants, &config).unwrap();
        assert_eq!(out[1].resolved_lane, 1);
        assert!(out[1].technique(Technique::Lead) > 0.5);
    }

    #[test]
    fn headwind_shifts_mass_to_the_sweep() {
        let config = EngineConfig::default();
        let store = FixtureStore::with_standard_day(day(1));
        let cache = loaded(&store);
        let entrants = standard_entrants();
        let calm = race_on(day(1), 12);
        let mut windy = calm.clone();
        windy.weather = Some(Weather {
            wind_speed: 7.0,
            wind_direction: 180.0,
            wave_height: 2.0,
        });
        let view = cache.view(day(1)).unwrap();
        let a = distributions(view, &calm, &entrants, &config).unwrap();
        let b = distributions(view, &windy, &entrants, &config).unwrap();
        assert!(b[2].technique(Technique::Overtake) > a[2].technique(Technique::Overtake));
    }

    fn exhibition(lane: u8, course: u8) -> TelemetryRow {
        TelemetryRow {
            venue_id: 12,
            race_no: 1,
            lane,
            exhibition_time: None,
            exhibition_start: None,
            exhibition_course: Some(course),
        }
    }

    #[test]
    fn partial_exhibition_courses_resolve_to_distinct_lanes() {
        let config = EngineConfig::default();
        let mut store = FixtureStore::with_standard_day(day(1));
        store.set_telemetry(day(1), vec![exhibition(2, 1)]);
        let cache = loaded(&store);
        let race = race_on(day(1), 12);
        let out = distributions(cache.view(day(1)).unwrap(), &race, &standard_entrants(), &config)
            .unwrap();
        let resolved: Vec<u8> = out.iter().map(|d| d.resolved_lane).collect();
        assert_eq!(resolved, vec![2, 1, 3, 4, 5, 6]);
        let unique: std::collections::HashSet<u8> = resolved.iter().copied().collect();
        assert_eq!(unique.len(), out.len());
        // The displaced inside boat loses its lead prior to the boat that cut in.
        assert!(out[1].technique(Technique::Lead) > out[0].technique(Technique::Lead));
    }

    #[test]
    fn start_factor_rewards_sharp_starters() {
        let mut cfg = EngineConfig::default().technique;
        let mut store = FixtureStore::with_standard_day(day(1));
        store.add_racer(day(1), 4100, 120, 20);
        let cache = loaded(&store);
        let view = cache.view(day(1)).unwrap();
        let entrants = standard_entrants();

        // 0.13 average start against a 0.14 sharp threshold
        assert_relative_eq!(start_factor(&view, &entrants[0], Technique::Lead, &cfg), 1.25);
        assert_eq!(start_factor(&view, &entrants[0], Technique::LatePass, &cfg), 1.0);
        assert_eq!(start_factor(&view, &entrants[2], Technique::Lead, &cfg), 1.0);

        cfg.start_slow = 0.18;
        assert_relative_eq!(start_factor(&view, &entrants[5], Technique::Overtake, &cfg), 0.8);

        let no_timing = Entrant {
            racer_id: 4100,
            ..entrants[0]
        };
        let stranger = Entrant {
            racer_id: 7001,
            ..entrants[0]
        };
        assert_eq!(start_factor(&view, &no_timing, Technique::Lead, &cfg), 1.0);
        assert_eq!(start_factor(&view, &stranger, Technique::Lead, &cfg), 1.0);
    }

    #[test]
    fn venue_factor_follows_the_venue_lane_bias() {
        let config = EngineConfig::default();
        let omura = race_on(day(1), 24);
        assert!(venue_factor(&config, &omura, 1, Technique::Lead) > 1.0);
        assert!(venue_factor(&config, &omura, 6, Technique::Overtake) < 1.0);
        assert_eq!(venue_factor(&config, &omura, 1, Technique::LatePass), 1.0);

        let unknown = race_on(day(1), 99);
        assert_eq!(venue_factor(&config, &unknown, 1, Technique::Lead), 1.0);
        assert_eq!(venue_factor(&config, &omura, 7, Technique::Lead), 1.0);
    }

    #[test]
    fn profile_factor_splits_acceleration_from_top_speed() {
        let cfg = EngineConfig::default().technique;
        let store = FixtureStore::with_standard_day(day(1));
        let cache = loaded(&store);
        let view = cache.view(day(1)).unwrap();
        let race = race_on(day(1), 24);
        let entrants = standard_entrants();

        // Motor 31: 10 acceleration wins against 3 top-speed wins.
        let bias = 7.0 / 13.0;
        let lead = profile_factor(&view, &race, &entrants[0], Technique::Lead, &cfg);
        let late = profile_factor(&view, &race, &entrants[0], Technique::LatePass, &cfg);
        assert_relative_eq!(lead, 1.0 + cfg.profile_strength * bias, epsilon = 1e-12);
        assert_relative_eq!(late, 1.0 - cfg.profile_strength * bias, epsilon = 1e-12);
        assert_eq!(profile_factor(&view, &race, &entrants[0], Technique::SlipThrough, &cfg), 1.0);

        // Motor 36 is balanced.
        assert_eq!(profile_factor(&view, &race, &entrants[5], Technique::Lead, &cfg), 1.0);

        let unknown_motor = Entrant {
            motor_id: 999,
            ..entrants[0]
        };
        assert_eq!(profile_factor(&view, &race, &unknown_motor, Technique::Lead, &cfg), 1.0);
        let elsewhere = race_on(day(1), 3);
        assert_eq!(profile_factor(&view, &elsewhere, &entrants[0], Technique::Lead, &cfg), 1.0);
    }

    #[test]
    fn skill_factor_scales_with_win_rate() {
        let cfg = EngineConfig::default().technique;
        let mut store = FixtureStore::with_standard_day(day(1));
        store.add_racer(day(1), 4100, 10, 5);
        let cache = loaded(&store);
        let view = cache.view(day(1)).unwrap();
        let entrants = standard_entrants();

        // 48 wins in 120 starts against a one-in-six baseline
        assert_relative_eq!(skill_factor(&view, &entrants[0], &cfg), 2.4, epsilon = 1e-12);
        assert_relative_eq!(skill_factor(&view, &entrants[5], &cfg), 0.4, epsilon = 1e-12);
        assert!(skill_factor(&view, &entrants[3], &cfg) < 1.0);

        let short_career = Entrant {
            racer_id: 4100,
            ..entrants[0]
        };
        let stranger = Entrant {
            racer_id: 7001,
            ..entrants[0]
        };
        assert_eq!(skill_factor(&view, &short_career, &cfg), 1.0);
        assert_eq!(skill_factor(&view, &stranger, &cfg), 1.0);
    }
}
