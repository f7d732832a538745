//! Stage 5: fixed-point buffs for multi-condition conjunctions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::conditions::RuleCondition;
use super::{AdjustmentSource, AdjustmentStage, StageError, StageInput, StageOutcome};
use crate::config::engine::CompoundConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundBuff {
    pub id: String,
    pub condition: RuleCondition,
    /// Score points added (or removed) when every condition holds
    pub points: f64,
}

pub fn load_buffs(path: &Path) -> Result<Vec<CompoundBuff>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read compound buffs {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse compound buffs {}", path.display()))
}

pub struct CompoundBuffStage<'a> {
    cfg: &'a CompoundConfig,
    buffs: &'a [CompoundBuff],
}

impl<'a> CompoundBuffStage<'a> {
    pub fn new(cfg: &'a CompoundConfig, buffs: &'a [CompoundBuff]) -> Self {
        CompoundBuffStage { cfg, buffs }
    }
}

impl AdjustmentStage for CompoundBuffStage<'_> {
    fn source(&self) -> AdjustmentSource {
        AdjustmentSource::CompoundBuff
    }

    fn cap(&self) -> f64 {
        self.cfg.cap
    }

    fn evaluate(&self, input: &StageInput<'_>) -> Result<Vec<StageOutcome>, StageError> {
        for buff in self.buffs {
            if !buff.points.is_finite() {
                return Err(StageError::MalformedBuff {
                    id: buff.id.clone(),
                    reason: format!("points {}", buff.points),
                });
            }
            if let Some(problem) = buff.condition.problem() {
                return Err(StageError::MalformedBuff {
                    id: buff.id.clone(),
                    reason: problem,
                });
            }
        }

        Ok(input
            .entrants
            .iter()
            .map(|entrant| {
                let matched: Vec<&CompoundBuff> = self
                    .buffs
                    .iter()
                    .filter(|b| b.condition.matches(input.race, entrant, &input.view))
                    .collect();
                if matched.is_empty() {
                    return StageOutcome::skipped("no compound buff matched");
                }
                let points: f64 = matched.iter().map(|b| b.points).sum();
                let ids: Vec<&str> = matched.iter().map(|b| b.id.as_str()).collect();
                StageOutcome::applied(points, format!("buffs [{}]", ids.join(", ")))
            })
            .collect())
    }
}
