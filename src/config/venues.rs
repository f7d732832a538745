use serde::{Deserialize, Serialize};

use crate::db::models::{TidePhase, VenueClass};

/// National win share per starting lane.
pub const NATIONAL_LANE_WIN_RATES: [f64; 6] = [0.536, 0.140, 0.124, 0.104, 0.060, 0.036];

/// Per-lane percent adjustments for each tide phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TideCoefficients {
    pub rising: [f64; 6],
    pub falling: [f64; 6],
    pub high: [f64; 6],
    pub low: [f64; 6],
}

impl TideCoefficients {
    pub fn for_phase(&self, phase: TidePhase) -> &[f64; 6] {
        match phase {
            TidePhase::Rising => &self.rising,
            TidePhase::Falling => &self.falling,
            TidePhase::High => &self.high,
            TidePhase::Low => &self.low,
        }
    }

    /// The reference table with every entry multiplied by `strength`.
    pub fn scaled(strength: f64) -> Self {
        let scale = |row: [f64; 6]| row.map(|v| v * strength);
        let base = TideCoefficients::default();
        TideCoefficients {
            rising: scale(base.rising),
            falling: scale(base.falling),
            high: scale(base.high),
            low: scale(base.low),
        }
    }
}

impl Default for TideCoefficients {
    fn default() -> Self {
        // Inflow against the start line helps the inside; outflow helps the dash.
        TideCoefficients {
            rising: [1.5, 0.5, 0.0, -0.5, -1.0, -1.5],
            falling: [-1.0, -0.3, 0.3, 0.6, 0.8, 0.6],
            high: [0.5, 0.2, 0.0, 0.0, -0.3, -0.4],
            low: [-0.5, 0.0, 0.2, 0.3, 0.2, 0.1],
        }
    }
}

/// Static description of one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueProfile {
    pub id: u8,
    pub name: String,
    pub class: VenueClass,
    /// Win share per starting lane (lane-advantage coefficients)
    pub lane_win_rates: [f64; 6],
    /// Present only for tide-affected venues
    pub tide: Option<TideCoefficients>,
}

impl VenueProfile {
    /// Build a profile from the venue's lane-1 win share, spreading the rest
    /// over lanes 2–6 in national proportions. `tide_strength` scales the
    /// reference tide table for venues whose water is tidal.
    pub fn scaled(
        id: u8,
        name: &str,
        class: VenueClass,
        inner_rate: f64,
        tide_strength: Option<f64>,
    ) -> Self {
        let outer_scale = (1.0 - inner_rate) / (1.0 - NATIONAL_LANE_WIN_RATES[0]);
        let mut lane_win_rates = [0.0; 6];
        for (i, rate) in lane_win_rates.iter_mut().enumerate() {
            *rate = if i == 0 {
                inner_rate
            } else {
                NATIONAL_LANE_WIN_RATES[i] * outer_scale
            };
        }
        VenueProfile {
            id,
            name: name.to_string(),
            class,
            lane_win_rates,
            tide: tide_strength.map(TideCoefficients::scaled),
        }
    }

    /// Lane-advantage coefficient for `lane` (1-based). Out-of-range lanes get 0.
    pub fn lane_rate(&self, lane: u8) -> f64 {
        lane.checked_sub(1)
            .and_then(|i| self.lane_win_rates.get(i as usize))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn best_lane_rate(&self) -> f64 {
        self.lane_win_rates.iter().copied().fold(0.0, f64::max)
    }
}

pub fn default_venues() -> Vec<VenueProfile> {
    use VenueClass::*;
    vec![
        VenueProfile::scaled(1, "Kiryu", Balanced, 0.50, None),
        VenueProfile::scaled(2, "Toda", EquipmentDominant, 0.44, None),
        VenueProfile::scaled(3, "Edogawa", EquipmentDominant, 0.46, Some(1.4)),
        VenueProfile::scaled(4, "Heiwajima", EquipmentDominant, 0.45, None),
        VenueProfile::scaled(5, "Tamagawa", Balanced, 0.52, None),
        VenueProfile::scaled(6, "Hamanako", Balanced, 0.53, None),
        VenueProfile::scaled(7, "Gamagori", Balanced, 0.55, None),
        VenueProfile::scaled(8, "Tokoname", LaneDominant, 0.58, None),
        VenueProfile::scaled(9, "Tsu", Balanced, 0.56, None),
        VenueProfile::scaled(10, "Mikuni", Balanced, 0.55, None),
        VenueProfile::scaled(11, "Biwako", Balanced, 0.50, None),
        VenueProfile::scaled(12, "Suminoe", LaneDominant, 0.58, None),
        VenueProfile::scaled(13, "Amagasaki", Balanced, 0.57, None),
        VenueProfile::scaled(14, "Naruto", Balanced, 0.50, Some(1.3)),
        VenueProfile::scaled(15, "Marugame", Balanced, 0.56, Some(0.8)),
        VenueProfile::scaled(16, "Kojima", Balanced, 0.56, Some(1.1)),
        VenueProfile::scaled(17, "Miyajima", Balanced, 0.56, Some(1.2)),
        VenueProfile::scaled(18, "Tokuyama", LaneDominant, 0.63, Some(0.9)),
        VenueProfile::scaled(19, "Shimonoseki", LaneDominant, 0.60, Some(1.15)),
        VenueProfile::scaled(20, "Wakamatsu", Balanced, 0.55, Some(1.0)),
        VenueProfile::scaled(21, "Ashiya", LaneDominant, 0.60, None),
        VenueProfile::scaled(22, "Fukuoka", Balanced, 0.53, Some(0.95)),
        VenueProfile::scaled(23, "Karatsu", Balanced, 0.57, None),
        VenueProfile::scaled(24, "Omura", LaneDominant, 0.64, Some(0.6)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scaled_profile_sums_to_one() {
        for venue in default_venues() {
            let total: f64 = venue.lane_win_rates.iter().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn lane_rate_handles_out_of_range() {
        let v = VenueProfile::scaled(24, "Omura", VenueClass::LaneDominant, 0.64, Some(0.6));
        assert_relative_eq!(v.lane_rate(1), 0.64, epsilon = 1e-12);
        assert_eq!(v.lane_rate(0), 0.0);
        assert_eq!(v.lane_rate(7), 0.0);
        assert_relative_eq!(v.best_lane_rate(), 0.64, epsilon = 1e-12);
    }

    #[test]
    fn tidal_venues_carry_their_own_tide_tables() {
        let venues = default_venues();
        let tidal: Vec<&VenueProfile> = venues.iter().filter(|v| v.tide.is_some()).collect();
        let ids: Vec<u8> = tidal.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 14, 15, 16, 17, 18, 19, 20, 22, 24]);
        for (i, a) in tidal.iter().enumerate() {
            for b in &tidal[i + 1..] {
                assert_ne!(a.tide, b.tide, "venues {} and {} share a tide table", a.id, b.id);
            }
        }

        let omura = tidal.iter().find(|v| v.id == 24).and_then(|v| v.tide.as_ref()).unwrap();
        assert_relative_eq!(omura.rising[0], 0.9, epsilon = 1e-12);
        assert_relative_eq!(omura.falling[5], 0.36, epsilon = 1e-12);
    }
}
