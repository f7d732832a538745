//! Shared fixtures: an in-memory `StatsStore` and a standard six-boat field
//! in which lane 1 is the strongest boat on every factor.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::cache::StatsStore;
use crate::config::EngineConfig;
use crate::db::models::{
    EquipmentRow, Entrant, GradeTier, RaceContext, RaceRecord, RacerGradeRow, RacerLaneRow,
    RacerOverallRow, RacerVenueRow, RecentFormRow, Technique, TechniqueRow, TelemetryRow,
    VenueClass,
};

pub const FIXTURE_VENUES: [u8; 3] = [12, 18, 24];

pub fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, n).unwrap()
}

pub fn race_on(date: NaiveDate, venue_id: u8) -> RaceContext {
    let venue_class = EngineConfig::default()
        .venue(venue_id)
        .map(|v| v.class)
        .unwrap_or(VenueClass::Balanced);
    RaceContext {
        race_id: format!("{}-{:02}-01", date.format("%Y%m%d"), venue_id),
        venue_id,
        venue_class,
        grade: GradeTier::General,
        race_no: 1,
        scheduled_at: date.and_hms_opt(10, 30, 0).unwrap(),
        weather: None,
        tide: None,
    }
}

pub fn standard_entrants() -> Vec<Entrant> {
    (0..6u8)
        .map(|i| Entrant {
            lane: i + 1,
            racer_id: 4001 + u32::from(i),
            motor_id: 31 + u32::from(i),
            hull_id: 61 + u32::from(i),
        })
        .collect()
}

fn record(starts: u32, wins: u32, top2: u32, top3: u32) -> RaceRecord {
    RaceRecord {
        starts,
        wins,
        top2,
        top3,
    }
}

#[derive(Debug, Clone, Default)]
struct DayRows {
    overall: Vec<RacerOverallRow>,
    lanes: Vec<RacerLaneRow>,
    venues: Vec<RacerVenueRow>,
    grades: Vec<RacerGradeRow>,
    techniques: Vec<TechniqueRow>,
    form: Vec<RecentFormRow>,
    motors: Vec<EquipmentRow>,
    hulls: Vec<EquipmentRow>,
    telemetry: Vec<TelemetryRow>,
}

impl DayRows {
    fn standard() -> Self {
        const WINS: [u32; 6] = [48, 30, 22, 16, 12, 8];
        const SECONDS: [u32; 6] = [30, 26, 24, 20, 18, 14];
        const THIRDS: [u32; 6] = [15, 18, 18, 18, 18, 16];
        const START_TIMING: [f64; 6] = [0.13, 0.15, 0.15, 0.16, 0.17, 0.18];
        const AVG_FINISH: [f64; 6] = [1.8, 2.6, 3.2, 3.6, 4.2, 4.8];
        const MOTOR_TOP2: [u32; 6] = [40, 34, 30, 26, 24, 21];
        const ACCEL_WINS: [u32; 6] = [10, 6, 5, 4, 3, 2];
        const SPEED_WINS: [u32; 6] = [3, 4, 4, 3, 3, 2];
        let mixes: [&[(Technique, u32)]; 6] = [
            &[(Technique::Lead, 20), (Technique::LatePass, 2)],
            &[(Technique::SlipThrough, 6), (Technique::Overtake, 3)],
            &[(Technique::Overtake, 5), (Technique::OvertakeSlip, 3)],
            &[(Technique::Overtake, 4), (Technique::SlipThrough, 3)],
            &[(Technique::OvertakeSlip, 3), (Technique::Overtake, 2)],
            &[(Technique::OvertakeSlip, 2), (Technique::LatePass, 1)],
        ];

        let mut rows = DayRows::default();
        for (i, entrant) in standard_entrants().iter().enumerate() {
            let racer_id = entrant.racer_id;
            let (w, t2) = (WINS[i], WINS[i] + SECONDS[i]);
            let t3 = t2 + THIRDS[i];
            rows.overall.push(RacerOverallRow {
                racer_id,
                record: record(120, w, t2, t3),
                avg_start_timing: Some(START_TIMING[i]),
            });
            rows.lanes.push(RacerLaneRow {
                racer_id,
                lane: entrant.lane,
                record: record(20, w / 4, t2 / 5, t3 / 6),
            });
            rows.grades.push(RacerGradeRow {
                racer_id,
                grade: GradeTier::General,
                record: record(30, w / 4, t2 / 4, t3 / 4),
            });
            rows.form.push(RecentFormRow {
                racer_id,
                starts: 10,
                avg_finish: AVG_FINISH[i],
            });
            for venue_id in FIXTURE_VENUES {
                rows.venues.push(RacerVenueRow {
                    racer_id,
                    venue_id,
                    record: record(15, w / 8, t2 / 8, t3 / 8),
                });
                for (technique, wins) in mixes[i] {
                    rows.techniques.push(TechniqueRow {
                        racer_id,
                        venue_id,
                        technique: *technique,
                        wins: *wins,
                    });
                }
                let equipment = |equipment_id: u32, top2: u32| EquipmentRow {
                    venue_id,
                    equipment_id,
                    record: record(80, top2 / 2, top2, top2 + 12),
                    acceleration_wins: ACCEL_WINS[i],
                    speed_wins: SPEED_WINS[i],
                };
                rows.motors.push(equipment(entrant.motor_id, MOTOR_TOP2[i]));
                rows.hulls.push(equipment(entrant.hull_id, MOTOR_TOP2[i] - 2));
            }
        }
        rows
    }
}

/// In-memory store that counts queries and can fail on demand.
#[derive(Debug, Default)]
pub struct FixtureStore {
    days: HashMap<NaiveDate, DayRows>,
    queries: Cell<u32>,
    failures: RefCell<HashMap<&'static str, u32>>,
}

impl FixtureStore {
    pub fn with_standard_day(date: NaiveDate) -> Self {
        let mut store = FixtureStore::default();
        store.days.insert(date, DayRows::standard());
        store
    }

    pub fn query_count(&self) -> u32 {
        self.queries.get()
    }

    /// Make the next `times` calls of `category` fail.
    pub fn fail_next(&self, category: &'static str, times: u32) {
        self.failures.borrow_mut().insert(category, times);
    }

    pub fn add_racer(&mut self, date: NaiveDate, racer_id: u32, starts: u32, wins: u32) {
        self.days
            .entry(date)
            .or_default()
            .overall
            .push(RacerOverallRow {
                racer_id,
                record: record(starts, wins, wins, wins),
                avg_start_timing: None,
            });
    }

    pub fn set_telemetry(&mut self, date: NaiveDate, rows: Vec<TelemetryRow>) {
        self.days.entry(date).or_default().telemetry = rows;
    }

    fn query<T: Clone>(
        &self,
        category: &'static str,
        date: NaiveDate,
        pick: impl Fn(&DayRows) -> &Vec<T>,
    ) -> Result<Vec<T>> {
        self.queries.set(self.queries.get() + 1);
        if let Some(remaining) = self.failures.borrow_mut().get_mut(category) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("injected {} failure", category);
            }
        }
        Ok(self.days.get(&date).map(|d| pick(d).clone()).unwrap_or_default())
    }
}

impl StatsStore for FixtureStore {
    fn racer_overall(&self, date: NaiveDate) -> Result<Vec<RacerOverallRow>> {
        self.query("racer_overall", date, |d| &d.overall)
    }

    fn racer_by_lane(&self, date: NaiveDate) -> Result<Vec<RacerLaneRow>> {
        self.query("racer_by_lane", date, |d| &d.lanes)
    }

    fn racer_by_venue(&self, date: NaiveDate) -> Result<Vec<RacerVenueRow>> {
        self.query("racer_by_venue", date, |d| &d.venues)
    }

    fn racer_by_grade(&self, date: NaiveDate) -> Result<Vec<RacerGradeRow>> {
        self.query("racer_by_grade", date, |d| &d.grades)
    }

    fn racer_techniques(&self, date: NaiveDate) -> Result<Vec<TechniqueRow>> {
        self.query("racer_techniques", date, |d| &d.techniques)
    }

    fn recent_form(&self, date: NaiveDate, _window: u32) -> Result<Vec<RecentFormRow>> {
        self.query("recent_form", date, |d| &d.form)
    }

    fn motor_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>> {
        self.query("motor_by_venue", date, |d| &d.motors)
    }

    fn hull_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>> {
        self.query("hull_by_venue", date, |d| &d.hulls)
    }

    fn telemetry(&self, date: NaiveDate) -> Result<Vec<TelemetryRow>> {
        self.query("telemetry", date, |d| &d.telemetry)
    }
}
