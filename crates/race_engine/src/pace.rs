use core_types::DriverMetrics;

use crate::normalise::MetricDescriptor;
use crate::weights::ContextWeights;

/// Normalisation descriptors for every field-relative metric, computed
/// once per simulation over the active lineup.
#[derive(Debug, Clone)]
pub struct FieldNorms {
    pub long_run: MetricDescriptor,
    pub qualy: MetricDescriptor,
    pub grid: MetricDescriptor,
    pub straightline: MetricDescriptor,
    pub cornering: MetricDescriptor,
    pub pit: MetricDescriptor,
    pub speed_trap: MetricDescriptor,
}

impl FieldNorms {
    pub fn from_lineup(drivers: &[DriverMetrics]) -> Self {
        fn column(drivers: &[DriverMetrics], f: impl Fn(&DriverMetrics) -> f64) -> Vec<f64> {
            drivers.iter().map(f).collect()
        }
        Self {
            long_run: MetricDescriptor::from_values(&column(drivers, |d| d.long_run_pace_delta)),
            qualy: MetricDescriptor::from_values(&column(drivers, |d| d.qualy_gap_ms)),
            grid: MetricDescriptor::from_values(&column(drivers, |d| d.grid_position as f64)),
            straightline: MetricDescriptor::from_values(&column(drivers, |d| d.straightline_index)),
            cornering: MetricDescriptor::from_values(&column(drivers, |d| d.cornering_index)),
            pit: MetricDescriptor::from_values(&column(drivers, |d| d.pit_stop_median)),
            speed_trap: MetricDescriptor::from_values(&column(drivers, |d| d.speed_trap_kph)),
        }
    }
}

/// Deterministic component of a driver's pace score, computed once at
/// simulation start. The per-run stochastic term is added by the run
/// loop.
pub fn base_score(driver: &DriverMetrics, norms: &FieldNorms, w: &ContextWeights) -> f64 {
    let long_run = norms.long_run.linear(driver.long_run_pace_delta, true);
    let qualy = norms.qualy.linear(driver.qualy_gap_ms, true);
    let grid = norms.grid.linear(driver.grid_position as f64, true);
    let straightline = norms.straightline.linear(driver.straightline_index, false);
    let cornering = norms.cornering.linear(driver.cornering_index, false);
    let pit = norms.pit.linear(driver.pit_stop_median, false);
    let speed_trap = norms.speed_trap.linear(driver.speed_trap_kph, false);

    let raw = 0.28 * long_run
        + 0.20 * qualy
        + 0.10 * grid
        + 0.10 * straightline * w.straightline
        + 0.10 * cornering * w.cornering
        + 0.06 * (1.0 - pit)
        + 0.05 * speed_trap * w.straightline
        + 0.05 * driver.consistency
        + 0.03 * driver.aggression
        + 0.03 * (driver.tyre_management * w.tyre).clamp(0.0, 1.1)
        + 0.04 * driver.wet_skill * w.wet;

    raw * driver.team_strength
}
