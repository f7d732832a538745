//! Date-scoped read-through cache of historical aggregates.
//!
//! Scoring one race needs per-racer, per-lane, per-venue and per-equipment
//! statistics for every boat. Querying them per entrant costs dozens of round
//! trips per race and hundreds per day. Instead, [`DayCache::load`] pulls every
//! statistic for every boat entered on a date in one aggregate query per
//! category, after which all lookups are plain map reads through a
//! [`DayView`].
//!
//! The cache holds exactly one date. Loading another date discards everything;
//! lookups for any date other than the loaded one are refused.

pub mod store;

pub use store::StatsStore;

use chrono::NaiveDate;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::models::{
    EquipmentRow, GradeTier, RaceRecord, RacerOverallRow, RecentFormRow, Technique, TelemetryRow,
};
use crate::error::EngineError;

/// Bounded retry with exponential backoff for storage queries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), with up to 25% jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Wins per technique for one racer at one venue.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TechniqueCounts {
    counts: [u32; 6],
}

impl TechniqueCounts {
    pub fn add(&mut self, technique: Technique, wins: u32) {
        self.counts[technique.index()] += wins;
    }

    pub fn get(&self, technique: Technique) -> u32 {
        self.counts[technique.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn share(&self, technique: Technique) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.get(technique) as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct DayStats {
    racers: HashMap<u32, RacerOverallRow>,
    by_lane: HashMap<(u32, u8), RaceRecord>,
    by_venue: HashMap<(u32, u8), RaceRecord>,
    by_grade: HashMap<(u32, GradeTier), RaceRecord>,
    techniques: HashMap<(u32, u8), TechniqueCounts>,
    form: HashMap<u32, RecentFormRow>,
    motors: HashMap<(u8, u32), EquipmentRow>,
    hulls: HashMap<(u8, u32), EquipmentRow>,
    /// (venue, race_no, lane) → exhibition data
    telemetry: HashMap<(u8, u8, u8), TelemetryRow>,
}

impl DayStats {
    /// Run every category query once. Fails on the first category that
    /// exhausts its retries.
    fn fetch(
        store: &dyn StatsStore,
        date: NaiveDate,
        form_window: u32,
        policy: &RetryPolicy,
    ) -> Result<Self, EngineError> {
        let mut stats = DayStats::default();

        for row in with_retry(date, "racer_overall", policy, || store.racer_overall(date))? {
            stats.racers.insert(row.racer_id, row);
        }
        for row in with_retry(date, "racer_by_lane", policy, || store.racer_by_lane(date))? {
            stats.by_lane.insert((row.racer_id, row.lane), row.record);
        }
        for row in with_retry(date, "racer_by_venue", policy, || store.racer_by_venue(date))? {
            stats.by_venue.insert((row.racer_id, row.venue_id), row.record);
        }
        for row in with_retry(date, "racer_by_grade", policy, || store.racer_by_grade(date))? {
            stats.by_grade.insert((row.racer_id, row.grade), row.record);
        }
        for row in with_retry(date, "racer_techniques", policy, || {
            store.racer_techniques(date)
        })? {
            stats
                .techniques
                .entry((row.racer_id, row.venue_id))
                .or_default()
                .add(row.technique, row.wins);
        }
        for row in with_retry(date, "recent_form", policy, || {
            store.recent_form(date, form_window)
        })? {
            stats.form.insert(row.racer_id, row);
        }
        for row in with_retry(date, "motor_by_venue", policy, || store.motor_by_venue(date))? {
            stats.motors.insert((row.venue_id, row.equipment_id), row);
        }
        for row in with_retry(date, "hull_by_venue", policy, || store.hull_by_venue(date))? {
            stats.hulls.insert((row.venue_id, row.equipment_id), row);
        }
        for row in with_retry(date, "telemetry", policy, || store.telemetry(date))? {
            stats
                .telemetry
                .insert((row.venue_id, row.race_no, row.lane), row);
        }

        Ok(stats)
    }
}

fn with_retry<T>(
    date: NaiveDate,
    category: &'static str,
    policy: &RetryPolicy,
    mut query: impl FnMut() -> anyhow::Result<T>,
) -> Result<T, EngineError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match query() {
            Ok(rows) => return Ok(rows),
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "DayCache {} query for {} failed (attempt {}/{}): {:#}; retrying in {:?}",
                    category, date, attempt, max_attempts, e, delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(EngineError::CacheUnavailable {
                    date,
                    category,
                    attempts: attempt,
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

/// Holds every historical aggregate needed to score one calendar date.
#[derive(Debug)]
pub struct DayCache {
    loaded: Option<NaiveDate>,
    form_window: u32,
    stats: DayStats,
}

impl DayCache {
    pub fn new(form_window: u32) -> Self {
        DayCache {
            loaded: None,
            form_window,
            stats: DayStats::default(),
        }
    }

    /// Make `date` the cached date. No-op if it already is.
    ///
    /// On failure the cache is left empty and unloaded; scoring against it is
    /// refused until a later load succeeds.
    pub fn load(
        &mut self,
        store: &dyn StatsStore,
        date: NaiveDate,
        policy: &RetryPolicy,
    ) -> Result<(), EngineError> {
        if self.loaded == Some(date) {
            debug!("DayCache already holds {}", date);
            return Ok(());
        }

        if let Some(previous) = self.loaded.take() {
            debug!("DayCache discarding {} for {}", previous, date);
        }
        self.stats = DayStats::default();

        let stats = DayStats::fetch(store, date, self.form_window, policy)?;
        info!(
            "DayCache loaded {}: {} racers, {} lane / {} venue / {} grade records, {} technique mixes, {} motors, {} hulls, {} telemetry rows",
            date,
            stats.racers.len(),
            stats.by_lane.len(),
            stats.by_venue.len(),
            stats.by_grade.len(),
            stats.techniques.len(),
            stats.motors.len(),
            stats.hulls.len(),
            stats.telemetry.len()
        );
        self.stats = stats;
        self.loaded = Some(date);
        Ok(())
    }

    pub fn loaded_date(&self) -> Option<NaiveDate> {
        self.loaded
    }

    /// Read-only view for `date`, refused unless `date` is the loaded date.
    pub fn view(&self, date: NaiveDate) -> Result<DayView<'_>, EngineError> {
        match self.loaded {
            None => Err(EngineError::CacheNotLoaded),
            Some(loaded) if loaded != date => Err(EngineError::CacheDateMismatch {
                loaded,
                requested: date,
            }),
            Some(_) => Ok(DayView {
                date,
                stats: &self.stats,
            }),
        }
    }
}

/// Borrowed lookups into a loaded [`DayCache`]. Never queries storage.
#[derive(Debug, Clone, Copy)]
pub struct DayView<'a> {
    date: NaiveDate,
    stats: &'a DayStats,
}

impl<'a> DayView<'a> {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn racer(&self, racer_id: u32) -> Option<&'a RacerOverallRow> {
        self.stats.racers.get(&racer_id)
    }

    pub fn lane_record(&self, racer_id: u32, lane: u8) -> Option<&'a RaceRecord> {
        self.stats.by_lane.get(&(racer_id, lane))
    }

    pub fn venue_record(&self, racer_id: u32, venue_id: u8) -> Option<&'a RaceRecord> {
        self.stats.by_venue.get(&(racer_id, venue_id))
    }

    pub fn grade_record(&self, racer_id: u32, grade: GradeTier) -> Option<&'a RaceRecord> {
        self.stats.by_grade.get(&(racer_id, grade))
    }

    pub fn technique_mix(&self, racer_id: u32, venue_id: u8) -> Option<&'a TechniqueCounts> {
        self.stats.techniques.get(&(racer_id, venue_id))
    }

    pub fn recent_form(&self, racer_id: u32) -> Option<&'a RecentFormRow> {
        self.stats.form.get(&racer_id)
    }

    pub fn motor(&self, venue_id: u8, motor_id: u32) -> Option<&'a EquipmentRow> {
        self.stats.motors.get(&(venue_id, motor_id))
    }

    pub fn hull(&self, venue_id: u8, hull_id: u32) -> Option<&'a EquipmentRow> {
        self.stats.hulls.get(&(venue_id, hull_id))
    }

    pub fn telemetry(&self, venue_id: u8, race_no: u8, lane: u8) -> Option<&'a TelemetryRow> {
        self.stats.telemetry.get(&(venue_id, race_no, lane))
    }
}
