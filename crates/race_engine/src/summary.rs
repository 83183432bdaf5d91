use std::cmp::Ordering;

use core_types::{
    DriverMetrics, DriverResult, PerformanceMetrics, RaceContext, SimError, SimulationSummary,
};

use crate::engine::DriverTally;

const WIN_PROB_TIE: f64 = 1e-3;

/// Folds the per-driver tallies into the final summary: probabilities,
/// expectations, consistency, the final ordering and the invariant
/// checks that guard against silent aggregation corruption.
pub(crate) fn build_summary(
    drivers: &[DriverMetrics],
    tallies: &[DriverTally],
    ctx: &RaceContext,
    runs: u32,
    performance: PerformanceMetrics,
) -> Result<SimulationSummary, SimError> {
    let runs_f = runs as f64;
    let mut results = Vec::with_capacity(drivers.len());

    for (driver, tally) in drivers.iter().zip(tallies) {
        let average_finish = tally.total_finish as f64 / runs_f;
        let mean_sq = tally.total_finish_sq as f64 / runs_f;
        let variance = (mean_sq - average_finish * average_finish).max(0.0);
        let result = DriverResult {
            driver_id: driver.id.clone(),
            code: driver.code.clone(),
            name: driver.name.clone(),
            team: driver.team.clone(),
            win_probability: tally.wins as f64 / runs_f,
            podium_probability: tally.podiums as f64 / runs_f,
            dnf_probability: tally.dnfs as f64 / runs_f,
            average_finish,
            expected_points: tally.points / runs_f,
            best_finish: tally.best_finish,
            worst_finish: tally.worst_finish,
            consistency_index: (1.0 - variance / 12.0).clamp(0.0, 1.0),
        };
        check_result(&result)?;
        results.push(result);
    }

    let win_sum = results.iter().map(|r| r.win_probability).sum::<f64>();
    if (win_sum - 1.0).abs() > 1e-6 {
        return Err(SimError::Invariant(format!(
            "win probabilities sum to {win_sum}, expected 1"
        )));
    }

    // Primary: win probability descending with ties at the 1e-3
    // tolerance broken by average finish ascending. Rounding to the
    // tolerance first keeps the comparator transitive; a pairwise
    // "close enough" check would not be, and sort_by needs a total
    // order.
    results.sort_by(|a, b| {
        let bucket_a = win_bucket(a.win_probability);
        let bucket_b = win_bucket(b.win_probability);
        bucket_b.cmp(&bucket_a).then_with(|| {
            a.average_finish
                .partial_cmp(&b.average_finish)
                .unwrap_or(Ordering::Equal)
        })
    });

    let predicted_winner = results[0].code.clone();
    let predicted_podium = results.iter().take(3).map(|r| r.code.clone()).collect();

    Ok(SimulationSummary {
        results,
        predicted_winner,
        predicted_podium,
        context: *ctx,
        runs,
        performance,
    })
}

fn win_bucket(win_probability: f64) -> i64 {
    (win_probability / WIN_PROB_TIE).round() as i64
}

fn check_result(result: &DriverResult) -> Result<(), SimError> {
    let probs = [
        result.win_probability,
        result.podium_probability,
        result.dnf_probability,
        result.consistency_index,
    ];
    for p in probs {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(SimError::Invariant(format!(
                "probability out of range for driver {}: {p}",
                result.code
            )));
        }
    }
    if !result.average_finish.is_finite() || result.average_finish < 1.0 {
        return Err(SimError::Invariant(format!(
            "bad average finish for driver {}: {}",
            result.code, result.average_finish
        )));
    }
    if !result.expected_points.is_finite() || result.expected_points < 0.0 {
        return Err(SimError::Invariant(format!(
            "bad expected points for driver {}: {}",
            result.code, result.expected_points
        )));
    }
    Ok(())
}
