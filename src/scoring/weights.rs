//! Per-race factor weights.
//!
//! Starts from the configured base weights and applies additive deltas for the
//! venue's classification, the race grade and the field's data sufficiency,
//! then renormalises to exactly 100. The resolved weight of a factor is also
//! that factor's maximum score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::FactorKind;
use crate::config::engine::WeightPolicyConfig;
use crate::db::models::{GradeTier, VenueClass};

pub const WEIGHT_TOTAL: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    weights: BTreeMap<FactorKind, f64>,
}

impl WeightSet {
    pub fn get(&self, kind: FactorKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FactorKind, f64)> + '_ {
        self.weights.iter().map(|(k, w)| (*k, *w))
    }
}

/// Resolve the weight set for one race. Pure and deterministic.
pub fn resolve(
    base: &BTreeMap<FactorKind, f64>,
    venue_class: VenueClass,
    grade: GradeTier,
    sufficiency: f64,
    cfg: &WeightPolicyConfig,
) -> WeightSet {
    let mut weights: BTreeMap<FactorKind, f64> = FactorKind::ALL
        .iter()
        .map(|k| (*k, base.get(k).copied().unwrap_or(0.0).max(0.0)))
        .collect();

    match venue_class {
        VenueClass::LaneDominant => apply_deltas(&mut weights, &cfg.lane_dominant),
        VenueClass::EquipmentDominant => apply_deltas(&mut weights, &cfg.equipment_dominant),
        VenueClass::Balanced => {}
    }
    if let Some(deltas) = cfg.grade.get(&grade) {
        apply_deltas(&mut weights, deltas);
    }

    let sufficiency = if sufficiency.is_finite() {
        sufficiency.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if cfg.low_sufficiency_threshold > 0.0 && sufficiency < cfg.low_sufficiency_threshold {
        let shift = cfg.low_sufficiency_shift * (1.0 - sufficiency / cfg.low_sufficiency_threshold);
        shift_to_course(&mut weights, shift, &cfg.low_sufficiency_donors, cfg.min_weight);
    }

    for w in weights.values_mut() {
        *w = w.max(cfg.min_weight.max(0.0));
    }
    renormalize(&mut weights);
    WeightSet { weights }
}

fn apply_deltas(weights: &mut BTreeMap<FactorKind, f64>, deltas: &BTreeMap<FactorKind, f64>) {
    for (kind, delta) in deltas {
        if let Some(w) = weights.get_mut(kind) {
            *w += delta;
        }
    }
}

/// Move up to `shift` points from the donors (pro rata) onto the course factor,
/// never taking a donor below `min_weight`.
fn shift_to_course(
    weights: &mut BTreeMap<FactorKind, f64>,
    shift: f64,
    donors: &[FactorKind],
    min_weight: f64,
) {
    let donor_total: f64 = donors
        .iter()
        .filter(|d| **d != FactorKind::Course)
        .map(|d| weights.get(d).copied().unwrap_or(0.0).max(0.0))
        .sum();
    if donor_total <= 0.0 || shift <= 0.0 {
        return;
    }
    let mut moved = 0.0;
    for donor in donors.iter().filter(|d| **d != FactorKind::Course) {
        if let Some(w) = weights.get_mut(donor) {
            let share = shift * w.max(0.0) / donor_total;
            let take = share.min((*w - min_weight).max(0.0));
            *w -= take;
            moved += take;
        }
    }
    if let Some(course) = weights.get_mut(&FactorKind::Course) {
        *course += moved;
    }
}

fn renormalize(weights: &mut BTreeMap<FactorKind, f64>) {
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        let even = WEIGHT_TOTAL / weights.len().max(1) as f64;
        for w in weights.values_mut() {
            *w = even;
        }
        return;
    }
    for w in weights.values_mut() {
        *w *= WEIGHT_TOTAL / total;
    }
    // Push the rounding residue onto the largest weight
    let residue = WEIGHT_TOTAL - weights.values().sum::<f64>();
    if let Some(largest) = weights
        .values_mut()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        *largest += residue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use approx::assert_relative_eq;

    const CLASSES: [VenueClass; 3] = [
        VenueClass::LaneDominant,
        VenueClass::Balanced,
        VenueClass::EquipmentDominant,
    ];
    const GRADES: [GradeTier; 4] = [
        GradeTier::Premier,
        GradeTier::Major,
        GradeTier::Standard,
        GradeTier::General,
    ];

    #[test]
    fn every_resolved_set_sums_to_100() {
        let config = EngineConfig::default();
        for class in CLASSES {
            for grade in GRADES {
                for step in 0..=10 {
                    let sufficiency = step as f64 / 10.0;
                    let set = resolve(
                        &config.base_weights,
                        class,
                        grade,
                        sufficiency,
                        &config.weight_policy,
                    );
                    assert!(
                        (set.total() - 100.0).abs() <= 0.1,
                        "{:?}/{:?}/{} summed to {}",
                        class,
                        grade,
                        sufficiency,
                        set.total()
                    );
                    assert!(set.iter().all(|(_, w)| w > 0.0));
                }
            }
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let config = EngineConfig::default();
        let a = resolve(
            &config.base_weights,
            VenueClass::EquipmentDominant,
            GradeTier::Premier,
            0.2,
            &config.weight_policy,
        );
        let b = resolve(
            &config.base_weights,
            VenueClass::EquipmentDominant,
            GradeTier::Premier,
            0.2,
            &config.weight_policy,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn equipment_venue_moves_weight_from_course_to_equipment() {
        let config = EngineConfig::default();
        let balanced = resolve(
            &config.base_weights,
            VenueClass::Balanced,
            GradeTier::General,
            1.0,
            &config.weight_policy,
        );
        let equipment = resolve(
            &config.base_weights,
            VenueClass::EquipmentDominant,
            GradeTier::General,
            1.0,
            &config.weight_policy,
        );
        let lane = resolve(
            &config.base_weights,
            VenueClass::LaneDominant,
            GradeTier::General,
            1.0,
            &config.weight_policy,
        );
        assert!(equipment.get(FactorKind::Equipment) > balanced.get(FactorKind::Equipment));
        assert!(equipment.get(FactorKind::Course) < balanced.get(FactorKind::Course));
        assert!(lane.get(FactorKind::Course) > balanced.get(FactorKind::Course));
        assert_relative_eq!(balanced.get(FactorKind::Course), 32.0, epsilon = 1e-9);
    }

    #[test]
    fn premier_grade_favours_competitor_over_technique() {
        let config = EngineConfig::default();
        let general = resolve(
            &config.base_weights,
            VenueClass::Balanced,
            GradeTier::General,
            1.0,
            &config.weight_policy,
        );
        let premier = resolve(
            &config.base_weights,
            VenueClass::Balanced,
            GradeTier::Premier,
            1.0,
            &config.weight_policy,
        );
        assert!(premier.get(FactorKind::Competitor) > general.get(FactorKind::Competitor));
        assert!(premier.get(FactorKind::ClassAffinity) > general.get(FactorKind::ClassAffinity));
        assert!(
            premier.get(FactorKind::TechniqueAffinity) < general.get(FactorKind::TechniqueAffinity)
        );
    }

    #[test]
    fn thin_data_shifts_weight_to_course() {
        let config = EngineConfig::default();
        let rich = resolve(
            &config.base_weights,
            VenueClass::Balanced,
            GradeTier::General,
            0.9,
            &config.weight_policy,
        );
        let thin = resolve(
            &config.base_weights,
            VenueClass::Balanced,
            GradeTier::General,
            0.0,
            &config.weight_policy,
        );
        assert_relative_eq!(
            thin.get(FactorKind::Course) - rich.get(FactorKind::Course),
            6.0,
            epsilon = 1e-9
        );
        assert!(thin.get(FactorKind::Form) < rich.get(FactorKind::Form));
    }

    #[test]
    fn negative_deltas_respect_floor() {
        let mut config = EngineConfig::default();
        config
            .weight_policy
            .lane_dominant
            .insert(FactorKind::Equipment, -500.0);
        let set = resolve(
            &config.base_weights,
            VenueClass::LaneDominant,
            GradeTier::General,
            1.0,
            &config.weight_policy,
        );
        assert!(set.get(FactorKind::Equipment) > 0.0);
        assert!((set.total() - 100.0).abs() <= 0.1);
    }
}
