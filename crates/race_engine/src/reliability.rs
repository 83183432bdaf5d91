use core_types::{RaceContext, SafetyCarRisk, TyreStress, Weather};

/// Context stress on mechanical reliability. Wet races and abrasive
/// circuits push marginal cars over the edge; neutralisations add a small
/// restart risk.
pub fn reliability_amplifier(ctx: &RaceContext) -> f64 {
    let mut amp = 1.0;
    if ctx.weather == Weather::Wet {
        amp += 0.08;
    }
    if ctx.tyre_stress == TyreStress::High {
        amp += 0.05;
    }
    amp += match ctx.safety_car {
        SafetyCarRisk::Medium => 0.01,
        SafetyCarRisk::High => 0.02,
        SafetyCarRisk::Low => 0.0,
    };
    amp
}

/// Probability that a driver sees the flag in a given run. A zero DNF
/// rate finishes every run; anything above zero clamps into
/// `[0.04, 0.98]`.
pub fn finish_probability(dnf_rate: f64, amplifier: f64) -> f64 {
    if dnf_rate <= 0.0 {
        return 1.0;
    }
    (1.0 - dnf_rate * amplifier).clamp(0.04, 0.98)
}
