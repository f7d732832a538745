use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};

use race_engine::betting::stake::{annotate_with_odds, load_odds, OddsBook};
use race_engine::betting::BetShape;
use race_engine::config::{Config, EngineConfig};
use race_engine::db::Database;
use race_engine::scoring::adjustments::{compound::load_buffs, rules::load_rules};
use race_engine::{EngineError, RaceEngine, RaceReport};

#[derive(Debug, Serialize)]
struct SkippedRace {
    race_id: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct DayReport {
    date: chrono::NaiveDate,
    races: Vec<RaceReport>,
    skipped: Vec<SkippedRace>,
}

fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    config.validate()?;

    let engine_config = match &config.engine_config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let rules = match &config.pattern_rules {
        Some(path) => load_rules(path)?,
        None => Vec::new(),
    };
    let buffs = match &config.compound_buffs {
        Some(path) => load_buffs(path)?,
        None => Vec::new(),
    };
    let odds: OddsBook = match &config.odds {
        Some(path) => load_odds(path)?,
        None => OddsBook::new(),
    };

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let mut engine = RaceEngine::new(engine_config, rules, buffs)?;
    engine
        .prepare_day(&db, config.date, &config.retry_policy())
        .with_context(|| format!("Cannot score {} without its history", config.date))?;

    let cards: Vec<_> = db
        .race_cards(config.date, engine.config())?
        .into_iter()
        .filter(|card| config.venue_id.map_or(true, |v| card.context.venue_id == v))
        .filter(|card| config.race_no.map_or(true, |r| card.context.race_no == r))
        .collect();
    if cards.is_empty() {
        warn!("No races found for {}", config.date);
    }

    let selection = config.bet_selection();
    let shapes = [BetShape::Exacta, BetShape::Trifecta];
    let mut report = DayReport {
        date: config.date,
        races: Vec::with_capacity(cards.len()),
        skipped: Vec::new(),
    };

    for card in &cards {
        let race = &card.context;
        match engine.score_race(race, &card.entrants, &shapes, &selection) {
            Ok(mut scored) => {
                if let Some(quotes) = odds.get(&race.race_id) {
                    annotate_with_odds(&mut scored.bets, quotes, config.kelly_fraction);
                }
                info!(
                    "Scored {} ({} entrants, {} bets)",
                    race.race_id,
                    scored.predictions.len(),
                    scored.bets.len()
                );
                report.races.push(scored);
            }
            Err(err @ EngineError::Computation { .. }) => {
                warn!("Skipping {}: {}", race.race_id, err);
                report.skipped.push(SkippedRace {
                    race_id: race.race_id.clone(),
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                error!("Aborting run at {}: {}", race.race_id, err);
                return Err(err.into());
            }
        }
    }

    let out = if config.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", out);
    Ok(())
}
