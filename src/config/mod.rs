pub mod engine;
pub mod venues;

pub use engine::EngineConfig;
pub use venues::{TideCoefficients, VenueProfile};

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::betting::{BetSelection, SelectionStrategy};
use crate::cache::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Keep adding bets while each one clears the probability floor
    Probability,
    /// Keep adding bets until the selected set covers the target mass
    Coverage,
}

/// Boat race scoring and wager recommendation engine
#[derive(Parser, Debug, Clone)]
#[command(name = "race-engine", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "races.db")]
    pub database_path: String,

    /// Race date to score (YYYY-MM-DD)
    #[arg(long, env = "RACE_DATE")]
    pub date: NaiveDate,

    /// Only score this venue
    #[arg(long, env = "VENUE_ID")]
    pub venue_id: Option<u8>,

    /// Only score this race number
    #[arg(long, env = "RACE_NO")]
    pub race_no: Option<u8>,

    /// JSON file overriding the built-in scoring tables
    #[arg(long, env = "ENGINE_CONFIG")]
    pub engine_config: Option<PathBuf>,

    /// JSON file of discovered pattern rules
    #[arg(long, env = "PATTERN_RULES")]
    pub pattern_rules: Option<PathBuf>,

    /// JSON file of compound condition buffs
    #[arg(long, env = "COMPOUND_BUFFS")]
    pub compound_buffs: Option<PathBuf>,

    /// JSON file of decimal odds per race and finish order
    #[arg(long, env = "ODDS_PATH")]
    pub odds: Option<PathBuf>,

    /// Bet selection strategy
    #[arg(long, env = "BET_STRATEGY", value_enum, default_value = "probability")]
    pub strategy: StrategyArg,

    /// Minimum bets per wager shape
    #[arg(long, env = "MIN_BETS", default_value = "2")]
    pub min_bets: usize,

    /// Maximum bets per wager shape
    #[arg(long, env = "MAX_BETS", default_value = "6")]
    pub max_bets: usize,

    /// Probability each added bet must exceed (probability strategy)
    #[arg(long, env = "PROBABILITY_FLOOR", default_value = "0.02")]
    pub probability_floor: f64,

    /// Cumulative probability to cover (coverage strategy)
    #[arg(long, env = "COVERAGE_TARGET", default_value = "0.5")]
    pub coverage_target: f64,

    /// Fractional Kelly multiplier used when odds are supplied (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25")]
    pub kelly_fraction: f64,

    /// Attempts per cache query before giving up
    #[arg(long, env = "CACHE_RETRY_ATTEMPTS", default_value = "3")]
    pub cache_retry_attempts: u32,

    /// Base backoff between cache query attempts in milliseconds
    #[arg(long, env = "CACHE_RETRY_BASE_MS", default_value = "200")]
    pub cache_retry_base_ms: u64,

    /// Pretty-print the JSON report
    #[arg(long, env = "PRETTY", default_value = "false")]
    pub pretty: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_bets == 0 {
            anyhow::bail!("min_bets must be at least 1");
        }
        if self.max_bets < self.min_bets {
            anyhow::bail!("max_bets must be >= min_bets");
        }
        if !(0.0..=1.0).contains(&self.probability_floor) {
            anyhow::bail!("probability_floor must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.coverage_target) {
            anyhow::bail!("coverage_target must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if self.cache_retry_attempts == 0 {
            anyhow::bail!("cache_retry_attempts must be at least 1");
        }
        if let Some(race_no) = self.race_no {
            if !(1..=12).contains(&race_no) {
                anyhow::bail!("race_no must be between 1 and 12");
            }
        }
        Ok(())
    }

    pub fn bet_selection(&self) -> BetSelection {
        let strategy = match self.strategy {
            StrategyArg::Probability => SelectionStrategy::Probability {
                floor: self.probability_floor,
            },
            StrategyArg::Coverage => SelectionStrategy::Coverage {
                target: self.coverage_target,
            },
        };
        BetSelection {
            min_bets: self.min_bets,
            max_bets: self.max_bets,
            strategy,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.cache_retry_attempts,
            base_delay: Duration::from_millis(self.cache_retry_base_ms),
            max_delay: Duration::from_millis(self.cache_retry_base_ms.saturating_mul(10)),
        }
    }
}
