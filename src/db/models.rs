use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// How strongly a venue's outcomes are decided by starting lane versus equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueClass {
    LaneDominant,
    Balanced,
    EquipmentDominant,
}

/// Race grade, ordered from the top tier down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeTier {
    Premier,
    Major,
    Standard,
    General,
}

impl GradeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeTier::Premier => "premier",
            GradeTier::Major => "major",
            GradeTier::Standard => "standard",
            GradeTier::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "premier" | "sg" => Some(GradeTier::Premier),
            "major" | "g1" => Some(GradeTier::Major),
            "standard" | "g2" | "g3" => Some(GradeTier::Standard),
            "general" | "ippan" => Some(GradeTier::General),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TidePhase {
    Rising,
    Falling,
    High,
    Low,
}

impl TidePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TidePhase::Rising => "rising",
            TidePhase::Falling => "falling",
            TidePhase::High => "high",
            TidePhase::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "rising" => Some(TidePhase::Rising),
            "falling" => Some(TidePhase::Falling),
            "high" => Some(TidePhase::High),
            "low" => Some(TidePhase::Low),
            _ => None,
        }
    }
}

/// Weather at race time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    /// Wind speed in m/s
    pub wind_speed: f64,
    /// Degrees relative to the course: 0 = tailwind into the first turn, 180 = headwind
    pub wind_direction: f64,
    /// Wave height in cm
    pub wave_height: f64,
}

impl Weather {
    /// Decompose wind into (tailwind, crosswind) components in m/s.
    /// A negative tailwind component is a headwind.
    pub fn components(&self) -> (f64, f64) {
        let rad = self.wind_direction.to_radians();
        (self.wind_speed * rad.cos(), (self.wind_speed * rad.sin()).abs())
    }

    pub fn is_well_formed(&self) -> bool {
        self.wind_speed.is_finite()
            && self.wind_speed >= 0.0
            && self.wind_direction.is_finite()
            && self.wave_height.is_finite()
            && self.wave_height >= 0.0
    }
}

/// Tide snapshot, only present at tide-affected venues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tide {
    /// Level in cm
    pub level: f64,
    pub phase: TidePhase,
}

/// Everything known about a race before it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceContext {
    pub race_id: String,
    pub venue_id: u8,
    pub venue_class: VenueClass,
    pub grade: GradeTier,
    pub race_no: u8,
    pub scheduled_at: NaiveDateTime,
    pub weather: Option<Weather>,
    pub tide: Option<Tide>,
}

impl RaceContext {
    pub fn date(&self) -> NaiveDate {
        self.scheduled_at.date()
    }
}

/// One boat in a race. Immutable for the duration of a scoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entrant {
    /// Pit / lane number (1–6)
    pub lane: u8,
    pub racer_id: u32,
    pub motor_id: u32,
    pub hull_id: u32,
}

/// A race with its entrants, as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceCard {
    pub context: RaceContext,
    pub entrants: Vec<Entrant>,
}

/// The maneuver by which the winner took the lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Wire-to-wire from the inside
    Lead,
    /// Slip through on the inside of the boat ahead at the first turn
    SlipThrough,
    /// Sweep around the outside of the inner boats
    Overtake,
    /// Outside sweep followed by a cut inside
    OvertakeSlip,
    /// Pass after the first turn
    LatePass,
    /// Uncontested win after others' mishaps
    Fortunate,
}

impl Technique {
    pub const ALL: [Technique; 6] = [
        Technique::Lead,
        Technique::SlipThrough,
        Technique::Overtake,
        Technique::OvertakeSlip,
        Technique::LatePass,
        Technique::Fortunate,
    ];

    pub fn index(&self) -> usize {
        match self {
            Technique::Lead => 0,
            Technique::SlipThrough => 1,
            Technique::Overtake => 2,
            Technique::OvertakeSlip => 3,
            Technique::LatePass => 4,
            Technique::Fortunate => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Lead => "lead",
            Technique::SlipThrough => "slip_through",
            Technique::Overtake => "overtake",
            Technique::OvertakeSlip => "overtake_slip",
            Technique::LatePass => "late_pass",
            Technique::Fortunate => "fortunate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Technique::ALL.into_iter().find(|t| t.as_str() == s.trim())
    }

    /// Whether a winner can cause a scenario with this technique.
    pub fn is_causal(&self) -> bool {
        !matches!(self, Technique::Fortunate)
    }
}

// ── Aggregate statistics rows ────────────────────────────────────────────────

/// Finishing record over a set of historical starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    pub starts: u32,
    pub wins: u32,
    pub top2: u32,
    pub top3: u32,
}

impl RaceRecord {
    pub fn win_rate(&self) -> f64 {
        ratio(self.wins, self.starts)
    }

    pub fn top2_rate(&self) -> f64 {
        ratio(self.top2, self.starts)
    }

    pub fn top3_rate(&self) -> f64 {
        ratio(self.top3, self.starts)
    }
}

fn ratio(n: u32, d: u32) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RacerOverallRow {
    pub racer_id: u32,
    pub record: RaceRecord,
    /// Mean start timing in seconds (lower is better)
    pub avg_start_timing: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RacerLaneRow {
    pub racer_id: u32,
    pub lane: u8,
    pub record: RaceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RacerVenueRow {
    pub racer_id: u32,
    pub venue_id: u8,
    pub record: RaceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RacerGradeRow {
    pub racer_id: u32,
    pub grade: GradeTier,
    pub record: RaceRecord,
}

/// Wins by one racer at one venue using one technique.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechniqueRow {
    pub racer_id: u32,
    pub venue_id: u8,
    pub technique: Technique,
    pub wins: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentFormRow {
    pub racer_id: u32,
    pub starts: u32,
    pub avg_finish: f64,
}

/// Motor or hull record at its home venue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRow {
    pub venue_id: u8,
    pub equipment_id: u32,
    pub record: RaceRecord,
    /// Wins taken by lead or overtake (acceleration-driven)
    pub acceleration_wins: u32,
    /// Wins taken by overtake-slip or late pass (top-speed-driven)
    pub speed_wins: u32,
}

/// Same-day pre-race exhibition data for one boat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub venue_id: u8,
    pub race_no: u8,
    pub lane: u8,
    /// Exhibition lap time in seconds
    pub exhibition_time: Option<f64>,
    /// Exhibition start timing in seconds
    pub exhibition_start: Option<f64>,
    /// Course actually taken in the exhibition start
    pub exhibition_course: Option<u8>,
}
