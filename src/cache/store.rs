use anyhow::Result;
use chrono::NaiveDate;

use crate::db::models::{
    EquipmentRow, RacerGradeRow, RacerLaneRow, RacerOverallRow, RacerVenueRow, RecentFormRow,
    TechniqueRow, TelemetryRow,
};

/// Backing store for historical aggregates.
///
/// Every method is one aggregate query scoped to all racers / equipment entered
/// on `date`. History methods only count races strictly before `date`;
/// `telemetry` reads the exhibition data of `date` itself.
///
/// Implementations must return an error on failure. An empty `Vec` means "no
/// history" and is scored as such.
pub trait StatsStore {
    fn racer_overall(&self, date: NaiveDate) -> Result<Vec<RacerOverallRow>>;
    fn racer_by_lane(&self, date: NaiveDate) -> Result<Vec<RacerLaneRow>>;
    fn racer_by_venue(&self, date: NaiveDate) -> Result<Vec<RacerVenueRow>>;
    fn racer_by_grade(&self, date: NaiveDate) -> Result<Vec<RacerGradeRow>>;
    fn racer_techniques(&self, date: NaiveDate) -> Result<Vec<TechniqueRow>>;
    fn recent_form(&self, date: NaiveDate, window: u32) -> Result<Vec<RecentFormRow>>;
    fn motor_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>>;
    fn hull_by_venue(&self, date: NaiveDate) -> Result<Vec<EquipmentRow>>;
    fn telemetry(&self, date: NaiveDate) -> Result<Vec<TelemetryRow>>;
}
