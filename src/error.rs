use chrono::NaiveDate;

/// Errors surfaced to callers of the scoring engine.
///
/// Thin historical data is never an error (factors fall back to neutral
/// values); these variants cover malformed input and storage failures only.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("race {race_id}: {reason}")]
    Computation { race_id: String, reason: String },

    #[error("day cache load failed for {date} ({category}) after {attempts} attempt(s): {message}")]
    CacheUnavailable {
        date: NaiveDate,
        category: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("day cache is not loaded")]
    CacheNotLoaded,

    #[error("day cache holds {loaded}, lookup requested {requested}")]
    CacheDateMismatch {
        loaded: NaiveDate,
        requested: NaiveDate,
    },

    #[error("invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn computation(race_id: &str, reason: impl Into<String>) -> Self {
        EngineError::Computation {
            race_id: race_id.to_string(),
            reason: reason.into(),
        }
    }
}
