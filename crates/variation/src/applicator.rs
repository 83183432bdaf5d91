use core_types::{
    DriverMetrics, ImpactType, RaceContext, TargetKind, VariationFactor,
};

/// Maps the enabled factor list onto a fresh `(drivers, context)` pair.
/// The engine never sees factors; everything it observes flows through
/// the returned snapshot.
///
/// Fold rules:
/// - pace: per-factor multiplier `clamp(1 + 0.12·m, 0.6, 1.5)` folded
///   into `team_strength`, which the scorer applies to the base score.
/// - reliability: `dnf_rate` moves by `-0.05·m` (negative magnitude is
///   bad news), clamped to `[0, 0.6]`.
/// - qualifying: grid improves by `round(2·m)` slots, floored at P1.
/// - strategy: the summed `0.15·m` lands on `context.randomness`,
///   clamped to `[0, 1]`.
pub fn apply_factors(
    factors: &[VariationFactor],
    drivers: &[DriverMetrics],
    ctx: &RaceContext,
) -> (Vec<DriverMetrics>, RaceContext) {
    let mut out_drivers = drivers.to_vec();
    let mut out_ctx = *ctx;
    let mut strategy_shift = 0.0;

    for factor in factors.iter().filter(|f| f.enabled) {
        let magnitude = factor.magnitude.clamp(-1.0, 1.0);
        match factor.impact {
            ImpactType::Pace => {
                let mult = (1.0 + 0.12 * magnitude).clamp(0.6, 1.5);
                for d in out_drivers.iter_mut().filter(|d| matches(factor, d)) {
                    d.team_strength *= mult;
                }
            }
            ImpactType::Reliability => {
                for d in out_drivers.iter_mut().filter(|d| matches(factor, d)) {
                    d.dnf_rate = (d.dnf_rate - 0.05 * magnitude).clamp(0.0, 0.6);
                }
            }
            ImpactType::Qualifying => {
                let slots = (2.0 * magnitude).round() as i64;
                for d in out_drivers.iter_mut().filter(|d| matches(factor, d)) {
                    d.grid_position = (d.grid_position as i64 - slots).max(1) as u32;
                }
            }
            ImpactType::Strategy => {
                strategy_shift += 0.15 * magnitude;
            }
        }
    }
    out_ctx.randomness = (out_ctx.randomness + strategy_shift).clamp(0.0, 1.0);

    (out_drivers, out_ctx)
}

/// A factor touches a driver when any target matches: driver targets by
/// code (case-insensitive), team targets by substring of the team name
/// (case-insensitive). No targets means everyone.
fn matches(factor: &VariationFactor, driver: &DriverMetrics) -> bool {
    if factor.targets.is_empty() {
        return true;
    }
    factor.targets.iter().any(|t| match t.kind {
        TargetKind::Driver => t.id.eq_ignore_ascii_case(&driver.code),
        TargetKind::Team => driver
            .team
            .to_lowercase()
            .contains(&t.id.to_lowercase()),
    })
}
