use std::cmp::Ordering;
use std::time::Instant;

use core_types::{
    DriverMetrics, EngineHooks, PerformanceMetrics, RaceContext, SimError, SimulationSummary,
    POINTS_TABLE,
};
use sim_rng::SimRng;

use crate::pace::{base_score, FieldNorms};
use crate::reliability::{finish_probability, reliability_amplifier};
use crate::summary::build_summary;
use crate::weights::ContextWeights;

/// Per-driver accumulator over all runs.
#[derive(Debug, Clone)]
pub(crate) struct DriverTally {
    pub wins: u32,
    pub podiums: u32,
    pub dnfs: u32,
    pub points: f64,
    pub total_finish: u64,
    pub total_finish_sq: u64,
    pub best_finish: u32,
    pub worst_finish: u32,
}

impl DriverTally {
    fn new() -> Self {
        Self {
            wins: 0,
            podiums: 0,
            dnfs: 0,
            points: 0.0,
            total_finish: 0,
            total_finish_sq: 0,
            best_finish: u32::MAX,
            worst_finish: 0,
        }
    }

    fn record(&mut self, position: u32, finished: bool) {
        self.total_finish += position as u64;
        self.total_finish_sq += (position as u64) * (position as u64);
        self.best_finish = self.best_finish.min(position);
        self.worst_finish = self.worst_finish.max(position);
        if position == 1 {
            self.wins += 1;
        }
        if position <= 3 {
            self.podiums += 1;
        }
        if position <= 10 {
            self.points += POINTS_TABLE[(position - 1) as usize];
        }
        if !finished {
            self.dnfs += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationEngine;

impl SimulationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs the full Monte Carlo sweep and returns the aggregated
    /// summary. The only suspension points are the progress ticks, where
    /// `hooks.should_cancel()` is serviced; RNG consumption order is
    /// therefore fixed: per run, one reliability uniform per driver in
    /// lineup order, then one noise batch of lineup size.
    pub fn run(
        &self,
        drivers: &[DriverMetrics],
        context: &RaceContext,
        hooks: &dyn EngineHooks,
    ) -> Result<SimulationSummary, SimError> {
        validate_lineup(drivers)?;
        let ctx = context.sanitized();
        let runs = ctx.runs;
        let started = Instant::now();

        let mut rng = match ctx.seed {
            Some(seed) => SimRng::seeded(seed),
            None => SimRng::from_entropy(),
        };

        let weights = ContextWeights::for_context(&ctx);
        let norms = FieldNorms::from_lineup(drivers);
        let sigma = weights.noise_sigma(&ctx);
        let amplifier = reliability_amplifier(&ctx);

        let n = drivers.len();
        let bases = drivers
            .iter()
            .map(|d| base_score(d, &norms, &weights))
            .collect::<Vec<_>>();
        if let Some(i) = bases.iter().position(|b| !b.is_finite()) {
            return Err(SimError::Invariant(format!(
                "non-finite base score for driver {}",
                drivers[i].code
            )));
        }
        let finish_probs = drivers
            .iter()
            .map(|d| finish_probability(d.dnf_rate, amplifier))
            .collect::<Vec<_>>();

        let mut tallies = vec![DriverTally::new(); n];
        let mut finished = vec![true; n];
        let mut scores = vec![0.0f64; n];
        let mut order = (0..n).collect::<Vec<_>>();

        let tick = (runs / 20).max(1);
        let mut last_percent = 0u8;

        tracing::debug!(drivers = n, runs, sigma, "simulation sweep started");

        for run_idx in 0..runs {
            for (i, prob) in finish_probs.iter().enumerate() {
                finished[i] = rng.next_uniform() < *prob;
            }
            let noise = rng.normal_batch(n, 0.0, sigma);
            for i in 0..n {
                scores[i] = if finished[i] {
                    bases[i] + noise[i]
                } else {
                    // Retirements sink below every finisher.
                    -5.0 + 0.5 * noise[i]
                };
                if !scores[i].is_finite() {
                    return Err(SimError::Invariant(format!(
                        "non-finite run score for driver {}",
                        drivers[i].code
                    )));
                }
            }

            // Descending by score; the stable sort keeps lineup order on
            // exact ties, which pins the ranking for a given seed.
            order.sort_by(|&a, &b| {
                scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal)
            });
            for (rank, &driver_idx) in order.iter().enumerate() {
                tallies[driver_idx].record(rank as u32 + 1, finished[driver_idx]);
            }

            let done = run_idx + 1;
            if done % tick == 0 {
                last_percent = ((done as u64 * 100) / runs as u64) as u8;
                hooks.on_progress(last_percent);
                if hooks.should_cancel() {
                    tracing::debug!(done, runs, "simulation cancelled mid-sweep");
                    return Err(SimError::Cancelled);
                }
            }
        }

        if last_percent < 100 {
            hooks.on_progress(100);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let performance = PerformanceMetrics {
            elapsed_ms,
            runs_per_sec: if elapsed_ms == 0 {
                runs as f64 * 1_000.0
            } else {
                runs as f64 * 1_000.0 / elapsed_ms as f64
            },
        };

        build_summary(drivers, &tallies, &ctx, runs, performance)
    }
}

fn validate_lineup(drivers: &[DriverMetrics]) -> Result<(), SimError> {
    if drivers.len() < 2 {
        return Err(SimError::InvalidInput(format!(
            "at least two active drivers are required, got {}",
            drivers.len()
        )));
    }
    for d in drivers {
        if d.numeric_fields().iter().any(|v| !v.is_finite()) {
            return Err(SimError::InvalidInput(format!(
                "driver {} has a non-finite metric",
                d.code
            )));
        }
    }
    Ok(())
}
