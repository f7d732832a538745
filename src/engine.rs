use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::betting::{
    self, technique, BetRecommendation, BetSelection, BetShape, ScenarioSet, TechniqueDistribution,
};
use crate::cache::{DayCache, DayView, RetryPolicy, StatsStore};
use crate::config::EngineConfig;
use crate::db::models::{Entrant, RaceContext};
use crate::error::EngineError;
use crate::scoring::adjustments::{CompoundBuff, PatternRule};
use crate::scoring::{EntrantPrediction, RacePredictor};

/// Everything the engine produces for one race.
#[derive(Debug, Clone, Serialize)]
pub struct RaceReport {
    pub race_id: String,
    pub venue_id: u8,
    pub race_no: u8,
    pub predictions: Vec<EntrantPrediction>,
    pub techniques: Vec<TechniqueDistribution>,
    /// Probability mass covered by the retained scenarios
    pub scenario_mass: f64,
    pub bets: Vec<BetRecommendation>,
}

/// Ties the scoring and wager flows to one date-scoped cache.
///
/// Scoring is refused unless the cache holds the race's own date; call
/// [`RaceEngine::prepare_day`] first.
pub struct RaceEngine {
    config: EngineConfig,
    rules: Vec<PatternRule>,
    buffs: Vec<CompoundBuff>,
    cache: DayCache,
}

impl RaceEngine {
    pub fn new(
        config: EngineConfig,
        rules: Vec<PatternRule>,
        buffs: Vec<CompoundBuff>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        info!(
            "Race engine ready: {} venues, {} pattern rules, {} compound buffs",
            config.venues.len(),
            rules.len(),
            buffs.len()
        );
        let cache = DayCache::new(config.features.form_window);
        Ok(RaceEngine {
            config,
            rules,
            buffs,
            cache,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loaded_date(&self) -> Option<NaiveDate> {
        self.cache.loaded_date()
    }

    /// Bulk-load every aggregate needed to score `date`.
    pub fn prepare_day(
        &mut self,
        store: &dyn StatsStore,
        date: NaiveDate,
        retry: &RetryPolicy,
    ) -> Result<(), EngineError> {
        self.cache.load(store, date, retry)
    }

    fn view_for(&self, race: &RaceContext) -> Result<DayView<'_>, EngineError> {
        self.cache.view(race.date())
    }

    pub fn predict(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
    ) -> Result<Vec<EntrantPrediction>, EngineError> {
        let view = self.view_for(race)?;
        RacePredictor::new(&self.config, &self.rules, &self.buffs).predict(view, race, entrants)
    }

    pub fn technique_distributions(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
    ) -> Result<Vec<TechniqueDistribution>, EngineError> {
        let view = self.view_for(race)?;
        technique::distributions(view, race, entrants, &self.config)
    }

    pub fn scenarios(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
    ) -> Result<ScenarioSet, EngineError> {
        let field = self.technique_distributions(race, entrants)?;
        Ok(betting::scenario::build(&field, &self.config.scenario))
    }

    /// Ranked bets for each requested shape, in the order the shapes are given.
    pub fn recommend(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
        shapes: &[BetShape],
        selection: &BetSelection,
    ) -> Result<Vec<BetRecommendation>, EngineError> {
        let set = self.scenarios(race, entrants)?;
        Ok(self.bets_from(&set, shapes, selection))
    }

    fn bets_from(
        &self,
        set: &ScenarioSet,
        shapes: &[BetShape],
        selection: &BetSelection,
    ) -> Vec<BetRecommendation> {
        let fused = betting::fuse(set);
        shapes
            .iter()
            .flat_map(|shape| {
                betting::select_bets(fused.get(*shape), *shape, selection, &self.config.bet_tiers)
            })
            .collect()
    }

    /// Predictions, technique posteriors and bets for one race in one pass.
    pub fn score_race(
        &self,
        race: &RaceContext,
        entrants: &[Entrant],
        shapes: &[BetShape],
        selection: &BetSelection,
    ) -> Result<RaceReport, EngineError> {
        let predictions = self.predict(race, entrants)?;
        let techniques = self.technique_distributions(race, entrants)?;
        let set = betting::scenario::build(&techniques, &self.config.scenario);
        debug!(
            "race {}: {} of {} scenarios retained ({:.3} mass)",
            race.race_id,
            set.scenarios.len(),
            set.candidate_count,
            set.retained_mass
        );
        let bets = self.bets_from(&set, shapes, selection);
        Ok(RaceReport {
            race_id: race.race_id.clone(),
            venue_id: race.venue_id,
            race_no: race.race_no,
            predictions,
            techniques,
            scenario_mass: set.retained_mass,
            bets,
        })
    }
}
