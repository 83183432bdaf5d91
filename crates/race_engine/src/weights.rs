use core_types::{RaceContext, SafetyCarRisk, TrackProfile, TyreStress, Weather};

/// Context-derived multipliers consumed by the pace scorer and the noise
/// model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextWeights {
    pub straightline: f64,
    pub cornering: f64,
    pub wet: f64,
    pub noise: f64,
    pub tyre: f64,
    pub safety_car: f64,
}

impl ContextWeights {
    pub fn for_context(ctx: &RaceContext) -> Self {
        let (straightline, cornering) = match ctx.track_profile {
            TrackProfile::Balanced => (1.0, 1.0),
            TrackProfile::Power => (1.25, 0.9),
            TrackProfile::Technical => (0.92, 1.25),
        };
        let (wet, noise) = match ctx.weather {
            Weather::Dry => (0.85, 0.85),
            Weather::Mixed => (1.0, 1.0),
            Weather::Wet => (1.25, 1.2),
        };
        let tyre = match ctx.tyre_stress {
            TyreStress::Low => 0.92,
            TyreStress::Medium => 1.0,
            TyreStress::High => 1.12,
        };
        let safety_car = match ctx.safety_car {
            SafetyCarRisk::Low => 0.88,
            SafetyCarRisk::Medium => 1.0,
            SafetyCarRisk::High => 1.18,
        };
        Self {
            straightline,
            cornering,
            wet,
            noise,
            tyre,
            safety_car,
        }
    }

    /// Per-run score noise deviation.
    pub fn noise_sigma(&self, ctx: &RaceContext) -> f64 {
        (0.35 + 0.45 * ctx.randomness) * self.noise * self.safety_car
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RaceContext {
        RaceContext::default()
    }

    #[test]
    fn balanced_dry_medium_is_near_identity() {
        let w = ContextWeights::for_context(&ctx());
        assert_eq!(w.straightline, 1.0);
        assert_eq!(w.cornering, 1.0);
        assert_eq!(w.tyre, 1.0);
        assert_eq!(w.safety_car, 1.0);
        assert_eq!(w.wet, 0.85);
        assert_eq!(w.noise, 0.85);
    }

    #[test]
    fn power_track_favours_straightline() {
        let w = ContextWeights::for_context(&RaceContext {
            track_profile: TrackProfile::Power,
            ..ctx()
        });
        assert!(w.straightline > 1.0);
        assert!(w.cornering < 1.0);
    }

    #[test]
    fn wet_weather_inflates_noise() {
        let dry = ContextWeights::for_context(&ctx());
        let wet = ContextWeights::for_context(&RaceContext {
            weather: Weather::Wet,
            ..ctx()
        });
        assert!(wet.noise_sigma(&ctx()) > dry.noise_sigma(&ctx()));
        assert!(wet.wet > dry.wet);
    }

    #[test]
    fn sigma_scales_with_randomness() {
        let w = ContextWeights::for_context(&ctx());
        let calm = RaceContext {
            randomness: 0.0,
            ..ctx()
        };
        let chaos = RaceContext {
            randomness: 1.0,
            ..ctx()
        };
        assert!((w.noise_sigma(&calm) - 0.35 * 0.85).abs() < 1e-12);
        assert!((w.noise_sigma(&chaos) - 0.80 * 0.85).abs() < 1e-12);
    }
}
