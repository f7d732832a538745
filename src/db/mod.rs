use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub mod models;
use models::*;

use crate::cache::StatsStore;
use crate::config::EngineConfig;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Race cards ───────────────────────────────────────────────────────────

    /// Insert or update a race
    pub fn insert_race(&self, race: &RaceContext) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO races (
                race_id, race_date, scheduled_at, venue_id, race_no, grade,
                wind_speed, wind_direction, wave_height, tide_level, tide_phase
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(race_id) DO UPDATE SET
                race_date=excluded.race_date,
                scheduled_at=excluded.scheduled_at,
                venue_id=excluded.venue_id,
                race_no=excluded.race_no,
                grade=excluded.grade,
                wind_speed=excluded.wind_speed,
                wind_direction=excluded.wind_direction,
                wave_height=excluded.wave_height,
                tide_level=excluded.tide_level,
                tide_phase=excluded.tide_phase",
            params![
                race.race_id,
                race.date(),
                race.scheduled_at,
                race.venue_id,
                race.race_no,
                race.grade.as_str(),
                race.weather.map(|w| w.wind_speed),
                race.weather.map(|w| w.wind_direction),
                race.weather.map(|w| w.wave_height),
                race.tide.map(|t| t.level),
                race.tide.map(|t| t.phase.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Insert or update one boat of a race. `start_timing` is the racer's
    /// actual start in that race, once run.
    pub fn insert_entry(
        &self,
        race_id: &str,
        entrant: &Entrant,
        start_timing: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entries (
                race_id, lane, racer_id, motor_id, hull_id, start_timing
             ) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(race_id, lane) DO UPDATE SET
                racer_id=excluded.racer_id,
                motor_id=excluded.motor_id,
                hull_id=excluded.hull_id,
                start_timing=excluded.start_timing",
            params![
                race_id,
                entrant.lane,
                entrant.racer_id,
                entrant.motor_id,
                entrant.hull_id,
                start_timing,
            ],
        )?;
        Ok(())
    }

    /// Record same-day exhibition data for an entered boat
    pub fn record_exhibition(
        &self,
        race_id: &str,
        lane: u8,
        time: Option<f64>,
        start: Option<f64>,
        course: Option<u8>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE entries SET exhibition_time=?1, exhibition_start=?2, exhibition_course=?3
             WHERE race_id=?4 AND lane=?5",
            params![time, start, course, race_id, lane],
        )?;
        if updated == 0 {
            return Err(anyhow!("no entry for race {} lane {}", race_id, lane));
        }
        Ok(())
    }

    /// Record one boat's result. `finish` is `None` for a boat that did not
    /// finish; `technique` is set for the winner only.
    pub fn insert_result(
        &self,
        race_id: &str,
        lane: u8,
        finish: Option<u8>,
        technique: Option<Technique>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO results (race_id, lane, finish, technique)
             VALUES (?1,?2,?3,?4)",
            params![race_id, lane, finish, technique.map(|t| t.as_str())],
        )?;
        Ok(())
    }

    /// Every race scheduled on `date` with its entrants, ordered by venue
    /// then race number. The venue classification comes from `config`.
    pub fn race_cards(&self, date: NaiveDate, config: &EngineConfig) -> Result<Vec<RaceCard>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT race_id, venue_id, grade, race_no, scheduled_at,
                    wind_speed, wind_direction, wave_height, tide_level, tide_phase
             FROM races WHERE race_date = ?1 ORDER BY venue_id, race_no",
        )?;
        let contexts = stmt
            .query_map(params![date], |row| map_race(row, config))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = conn.prepare(
            "SELECT lane, racer_id, motor_id, hull_id FROM entries
             WHERE race_id = ?1 ORDER BY lane",
        )?;
        let mut cards = Vec::with_capacity(contexts.len());
        for context in contexts {
            let entrants = entries
                .query_map(params![context.race_id], map_entrant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            cards.push(RaceCard { context, entrants });
        }
        Ok(cards)
    }

    /// Look up one race card by id
    pub fn race_card(&self, race_id: &str, config: &EngineConfig) -> Result<Option<RaceCard>> {
        let date: Option<NaiveDate> = {
            let conn = self.conn()?;
            let date = conn
                .query_row(
                    "SELECT race_date FROM races WHERE race_id = ?1",
                    params![race_id],
                    |row| row.get(0),
                )
                .optional()?;
            date
        };
        let Some(date) = date else {
            return Ok(None);
        };
        Ok(self
            .race_cards(date, config)?
            .into_iter()
            .find(|c| c.context.race_id == race_id))
    }

    fn history<T>(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
        map: impl FnMut(&Row) -> rusqlite::Result<Option<T>>,
    ) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().flatten().collect())
    }
}

// ── Aggregate statistics ──────────────────────────────────────────────────────

/// Racers entered on ?1
const RACERS_ON_DAY: &str = "e.racer_id IN (
    SELECT e2.racer_id FROM entries e2 JOIN races r2 ON r2.race_id = e2.race_id
    WHERE r2.race_date = ?1)";

const MOTORS_ON_DAY: &str = "(r.venue_id, e.motor_id) IN (
    SELECT r2.venue_id, e2.motor_id FROM entries e2 JOIN races r2 ON r2.race_id = e2.race_id
    WHERE r2.race_date = ?1)";

const HULLS_ON_DAY: &str = "(r.venue_id, e.hull_id) IN (
    SELECT r2.venue_id, e2.hull_id FROM entries e2 JOIN races r2 ON r2.race_id = e2.race_id
    WHERE r2.race_date = ?1)";

const EQUIPMENT_PROFILE: &str = ",
    SUM(CASE WHEN res.finish = 1 AND res.technique IN ('lead', 'overtake') THEN 1 ELSE 0 END),
    SUM(CASE WHEN res.finish = 1 AND res.technique IN ('overtake_slip', 'late_pass') THEN 1 ELSE 0 END)";

/// Finishing record per `keys` over races strictly before ?1, limited by
/// `scope`. Columns: keys, starts, wins, top2, top3, then `extra`.
fn record_query(keys: &str, extra: &str, scope: &str) -> String {
    format!(
        "SELECT {keys},
                COUNT(*),
                SUM(CASE WHEN res.finish = 1 THEN 1 ELSE 0 END),
                SUM(CASE WHEN res.finish <= 2 THEN 1 ELSE 0 END),
                SUM(CASE WHEN res.finish <= 3 THEN 1 ELSE 0 END){extra}
         FROM entries e
         JOIN races r ON r.race_id = e.race_id
         JOIN results res ON res.race_id = e.race_id AND res.lane = e.lane
         WHERE r.race_date < ?1 AND {scope}
         GROUP BY {keys}"
    )
}

fn record_at(row: &Row, first: usize) -> rusqlite::Result<RaceRecord> {
    Ok(RaceRecord {
        starts: row.get(first)?,
        wins: row.get(first + 1)?,
        top2: row.get(first + 2)?,
        top3: row.get(first + 3)?,
    })
}

fn map_equipment(row: &Row) -> rusqlite::Result<Option<EquipmentRow>> {
    Ok(Some(EquipmentRow {
        venue_id: row.get(0)?,
        equipment_id: row.get(1)?,
        record: record_at(row, 2)?,
        acceleration_wins: row.get(6)?,
        speed_wins: row.get(7)?,
    }))
}

impl StatsStore for Database {
    fn racer_overall(&self, date: NaiveDate) -> Result<Vec<RacerOverallRow>> {
        let sql = record_query("e.racer_id", ", AVG(e.start_timing)", RACERS_ON_DAY);
        self.history(&sql, params![date], |row| {
            Ok(Some(RacerOverallRow {
                racer_id: row.get(0)?,
                record: record_at(row, 1)?,
                avg_start_timing: row.get(5)?,
            }))
        })
    }

    fn racer_by_lane(&self, date: NaiveDate) -> Result<Vec<RacerLaneRow>> {
        let sql = record_query("e.racer_id, e.lane", "", RACERS_ON_DAY);
        self.history(&sql, params![date], |row| {
            Ok(Some(RacerLaneRow {
                racer_id: row.get(0)?,
                lane: row.get(1)?,
                record: record_at(row, 2)?,
            }))
        })
    }

    fn racer_by_venue(&self, date: NaiveDate) -> Result<Vec<RacerVenueRow>> {
        let sql = record_query("e.racer_id, r.venue_id", "", RACERS_ON_DAY);
        self.history(&sql, params![date], |row| {
            Ok(Some(RacerVenueRow {
                racer_id: row.get(0)?,
                venue_id: row.get(1)?,
                record: record_at(row, 2)?,
            }))
        })
    }

    fn racer_by_grade(&self, date: NaiveDate) -> Result<Vec<RacerGradeRow>> {
        let sql = record_query("e.racer_id, r.grade", "", RACERS_ON_DAY);
        self.history(&sql, params![date], |row| {
            let raw: String = row.get(1)?;
            let Some(grade) = GradeTier::parse(&raw) else {
                warn!("Skipping unknown grade {:?} in racer_by_grade", raw);
                return Ok(None);
            };
            Ok(Some(RacerGradeRow {
                racer_id: row.get(0)?,
                grade,
                record: record_at(row, 2)?,
            }))
        })
    }

    fn racer_techniques(&self, date: NaiveDate) -> Result<Vec<TechniqueRow>> {
        let sql = format!(
            "SELECT e.racer_id, r.venue_id, res.technique, COUNT(*)
             FROM entries e
             JOIN races r ON r.race_id = e.race_id
             JOIN results res ON res.race_id = e.race_id AND res.lane = e.lane
             WHERE r.race_date < ?1 AND res.finish = 1 AND res.technique IS NOT NULL
               AND {RACERS_ON_DAY}
             GROUP BY e.racer_id, r.venue_id, res.technique"
        );
        self.history(&sql, params![date], |row| {
            let raw: String = row.get(2)?;
            let Some(technique) = Technique::parse(&raw) else {
                warn!("Skipping unknown technique {:?} in racer_techniques", raw);
                return Ok(None);
            };
            Ok(Some(TechniqueRow {
                racer_id: row.get(0)?,
                venue_id: row.get(1)?,
                technique,
                wins: row.get(3)?,
            }))
        })
    }

    fn recent_form(&self, date: NaiveDate, window: u32) -> Result<Vec<RecentFormRow>> {
        // A boat that did not finish counts as sixth
        let sql = format!(
            "SELECT racer_id, COUNT(*), AVG(finish) FROM (
                SELECT e.racer_id AS racer_id,
                       COALESCE(res.finish, 6) AS finish,
                       ROW_NUMBER() OVER (
                           PARTITION BY e.racer_id ORDER BY r.scheduled_at DESC, r.race_id DESC
                       ) AS rn
                FROM entries e
                JOIN races r ON r.race_id = e.race_id
                JOIN results res ON res.race_id = e.race_id AND res.lane = e.lane
                WHERE r.race_date < ?1 AND {RACERS_ON_DAY}
             )
             WHERE rn <= ?2
             GROUP BY racer_id"
        );
        self.history(&sql, params![date, window], |row| {
            Ok(Some(RecentFormRow {
                racer_id: row.get(0)?,
                starts: row.get(1)?,
                avg_finish: row.get(2)?,
            }))
        })
    }

    fn motor_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>> {
        let sql = record_query("r.venue_id, e.motor_id", EQUIPMENT_PROFILE, MOTORS_ON_DAY);
        self.history(&sql, params![date], map_equipment)
    }

    fn hull_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>> {
        let sql = record_query("r.venue_id, e.hull_id", EQUIPMENT_PROFILE, HULLS_ON_DAY);
        self.history(&sql, params![date], map_equipment)
    }

    fn telemetry(&self, date: NaiveDate) -> Result<Vec<TelemetryRow>> {
        self.history(
            "SELECT r.venue_id, r.race_no, e.lane,
                    e.exhibition_time, e.exhibition_start, e.exhibition_course
             FROM entries e
             JOIN races r ON r.race_id = e.race_id
             WHERE r.race_date = ?1
               AND (e.exhibition_time IS NOT NULL
                    OR e.exhibition_start IS NOT NULL
                    OR e.exhibition_course IS NOT NULL)",
            params![date],
            |row| {
                Ok(Some(TelemetryRow {
                    venue_id: row.get(0)?,
                    race_no: row.get(1)?,
                    lane: row.get(2)?,
                    exhibition_time: row.get(3)?,
                    exhibition_start: row.get(4)?,
                    exhibition_course: row.get(5)?,
                }))
            },
        )
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_race(row: &Row, config: &EngineConfig) -> rusqlite::Result<RaceContext> {
    let race_id: String = row.get(0)?;
    let venue_id: u8 = row.get(1)?;
    let raw_grade: String = row.get(2)?;
    let grade = GradeTier::parse(&raw_grade).unwrap_or_else(|| {
        warn!("Race {} has unknown grade {:?}; treating as general", race_id, raw_grade);
        GradeTier::General
    });
    let venue_class = config
        .venue(venue_id)
        .map(|v| v.class)
        .unwrap_or(VenueClass::Balanced);

    let wind_speed: Option<f64> = row.get(5)?;
    let wind_direction: Option<f64> = row.get(6)?;
    let wave_height: Option<f64> = row.get(7)?;
    let weather = match (wind_speed, wind_direction, wave_height) {
        (Some(wind_speed), Some(wind_direction), Some(wave_height)) => Some(Weather {
            wind_speed,
            wind_direction,
            wave_height,
        }),
        _ => None,
    };
    let tide_level: Option<f64> = row.get(8)?;
    let tide_phase: Option<String> = row.get(9)?;
    let tide = match (tide_level, tide_phase.as_deref().and_then(TidePhase::parse)) {
        (Some(level), Some(phase)) => Some(Tide { level, phase }),
        _ => None,
    };

    Ok(RaceContext {
        race_id,
        venue_id,
        venue_class,
        grade,
        race_no: row.get(3)?,
        scheduled_at: row.get(4)?,
        weather,
        tide,
    })
}

fn map_entrant(row: &Row) -> rusqlite::Result<Entrant> {
    Ok(Entrant {
        lane: row.get(0)?,
        racer_id: row.get(1)?,
        motor_id: row.get(2)?,
        hull_id: row.get(3)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS races (
    race_id        TEXT    PRIMARY KEY,
    race_date      TEXT    NOT NULL,
    scheduled_at   TEXT    NOT NULL,
    venue_id       INTEGER NOT NULL,
    race_no        INTEGER NOT NULL,
    grade          TEXT    NOT NULL,
    wind_speed     REAL,
    wind_direction REAL,
    wave_height    REAL,
    tide_level     REAL,
    tide_phase     TEXT
);

CREATE TABLE IF NOT EXISTS entries (
    race_id           TEXT    NOT NULL,
    lane              INTEGER NOT NULL,
    racer_id          INTEGER NOT NULL,
    motor_id          INTEGER NOT NULL,
    hull_id           INTEGER NOT NULL,
    start_timing      REAL,
    exhibition_time   REAL,
    exhibition_start  REAL,
    exhibition_course INTEGER,
    PRIMARY KEY (race_id, lane),
    FOREIGN KEY (race_id) REFERENCES races(race_id)
);

CREATE TABLE IF NOT EXISTS results (
    race_id   TEXT    NOT NULL,
    lane      INTEGER NOT NULL,
    finish    INTEGER,
    technique TEXT,
    PRIMARY KEY (race_id, lane),
    FOREIGN KEY (race_id, lane) REFERENCES entries(race_id, lane)
);

CREATE INDEX IF NOT EXISTS idx_races_date ON races(race_date);
CREATE INDEX IF NOT EXISTS idx_entries_racer ON entries(racer_id);
CREATE INDEX IF NOT EXISTS idx_entries_motor ON entries(motor_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DayCache, RetryPolicy};
    use crate::testutil::{day, race_on, standard_entrants};
    use approx::assert_relative_eq;

    /// Run one race on `date` at venue 12 with the standard field finishing
    /// in `finish_order` (lanes), won by `technique`.
    fn run_race(db: &Database, date: NaiveDate, race_no: u8, finish_order: [u8; 6], technique: Technique) {
        let mut race = race_on(date, 12);
        race.race_no = race_no;
        race.race_id = format!("{}-12-{:02}", date.format("%Y%m%d"), race_no);
        db.insert_race(&race).unwrap();
        for entrant in standard_entrants() {
            db.insert_entry(&race.race_id, &entrant, Some(0.10 + entrant.lane as f64 * 0.01))
                .unwrap();
        }
        for (pos, lane) in finish_order.iter().enumerate() {
            let technique = (pos == 0).then_some(technique);
            db.insert_result(&race.race_id, *lane, Some(pos as u8 + 1), technique)
                .unwrap();
        }
    }

    fn seeded() -> Database {
        let db = Database::open(":memory:").unwrap();
        run_race(&db, day(1), 1, [1, 2, 3, 4, 5, 6], Technique::Lead);
        run_race(&db, day(1), 2, [2, 1, 4, 3, 6, 5], Technique::SlipThrough);
        run_race(&db, day(2), 1, [1, 3, 2, 4, 5, 6], Technique::Lead);
        // Scheduled card for day 3, not yet run
        let race = race_on(day(3), 12);
        db.insert_race(&race).unwrap();
        for entrant in standard_entrants() {
            db.insert_entry(&race.race_id, &entrant, None).unwrap();
        }
        db
    }

    #[test]
    fn history_is_scoped_before_the_date() {
        let db = seeded();
        let overall = db.racer_overall(day(2)).unwrap();
        let lane1 = overall.iter().find(|r| r.racer_id == 4001).unwrap();
        // Only the two day-1 races count; day 2's own result is excluded
        assert_eq!(lane1.record.starts, 2);
        assert_eq!(lane1.record.wins, 1);
        assert_eq!(lane1.record.top2, 2);
        assert_relative_eq!(lane1.avg_start_timing.unwrap(), 0.11, epsilon = 1e-9);

        let overall = db.racer_overall(day(3)).unwrap();
        let lane1 = overall.iter().find(|r| r.racer_id == 4001).unwrap();
        assert_eq!(lane1.record.starts, 3);
    }

    #[test]
    fn only_racers_entered_on_the_date_are_returned() {
        let db = seeded();
        assert!(db.racer_overall(day(1)).unwrap().is_empty());
        assert!(db.racer_overall(day(9)).unwrap().is_empty());
    }

    #[test]
    fn technique_and_equipment_profiles_aggregate() {
        let db = seeded();
        let techniques = db.racer_techniques(day(3)).unwrap();
        let lead = techniques
            .iter()
            .find(|t| t.racer_id == 4001 && t.technique == Technique::Lead)
            .unwrap();
        assert_eq!(lead.wins, 2);
        assert_eq!(lead.venue_id, 12);

        let motors = db.motor_by_venue(day(3)).unwrap();
        let motor31 = motors.iter().find(|m| m.equipment_id == 31).unwrap();
        assert_eq!(motor31.record.starts, 3);
        assert_eq!(motor31.acceleration_wins, 2);
        let motor32 = motors.iter().find(|m| m.equipment_id == 32).unwrap();
        assert_eq!(motor32.acceleration_wins, 0);
        assert_eq!(motor32.speed_wins, 0);
    }

    #[test]
    fn recent_form_respects_window() {
        let db = seeded();
        let form = db.recent_form(day(3), 2).unwrap();
        let lane2 = form.iter().find(|f| f.racer_id == 4002).unwrap();
        // Latest two: day 2 (3rd), day 1 race 2 (1st)
        assert_eq!(lane2.starts, 2);
        assert_relative_eq!(lane2.avg_finish, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn telemetry_reads_the_same_day() {
        let db = seeded();
        let race_id = race_on(day(3), 12).race_id;
        db.record_exhibition(&race_id, 1, Some(6.72), Some(0.08), Some(1))
            .unwrap();
        assert!(db.record_exhibition("missing", 1, None, None, None).is_err());
        let rows = db.telemetry(day(3)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exhibition_course, Some(1));
        assert!(db.telemetry(day(2)).unwrap().is_empty());
    }

    #[test]
    fn race_cards_round_trip_context() {
        let db = seeded();
        let config = EngineConfig::default();
        let cards = db.race_cards(day(3), &config).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].context, race_on(day(3), 12));
        assert_eq!(cards[0].entrants, standard_entrants());

        let found = db
            .race_card(&race_on(day(3), 12).race_id, &config)
            .unwrap()
            .unwrap();
        assert_eq!(found.entrants.len(), 6);
        assert!(db.race_card("nope", &config).unwrap().is_none());
    }

    #[test]
    fn day_cache_loads_from_sqlite() {
        let db = seeded();
        let mut cache = DayCache::new(10);
        cache.load(&db, day(3), &RetryPolicy::default()).unwrap();
        let view = cache.view(day(3)).unwrap();
        assert_eq!(view.racer(4001).unwrap().record.starts, 3);
        assert_eq!(view.lane_record(4001, 1).unwrap().wins, 2);
        assert_eq!(view.venue_record(4002, 12).unwrap().starts, 3);
        assert!(view.grade_record(4003, GradeTier::General).is_some());
        assert_eq!(view.technique_mix(4002, 12).unwrap().get(Technique::SlipThrough), 1);
        assert!(view.motor(12, 36).is_some());
        assert!(view.hull(12, 61).is_some());
    }
}
