//! Simulation lifecycle service.
//!
//! Owns the one-run-at-a-time state machine
//! (`idle -> running -> {completed | cancelled | failed} -> idle`), keeps
//! the engine off the caller's thread through the `EngineExecutor` seam,
//! and exposes latest-value observables for progress and the current run.

pub mod config;
pub mod executor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use core_types::{
    DriverMetrics, EngineHooks, FactorBundle, FactorSource, KvStore, RaceContext, RunStatus,
    SimError, SimulationRun, VariationFactor,
};
use parking_lot::Mutex;
use race_engine::SimulationEngine;
use run_store::{persist_last_run, RunHistory};
use tokio::sync::watch;
use variation::apply_factors;

pub use config::{load_orchestrator_config, OrchestratorConfig};
pub use executor::{BlockingExecutor, EngineExecutor, EngineJob, InlineExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { run_id: i64 },
    /// A simulation is already in flight; the request was a no-op.
    Busy,
}

/// Everything a run needs once accepted: the snapshot the engine will
/// consume plus the lifecycle record and cancel flag.
struct PreparedRun {
    run: SimulationRun,
    drivers: Vec<DriverMetrics>,
    context: RaceContext,
    cancel: Arc<AtomicBool>,
}

struct RunSignals {
    progress: Arc<watch::Sender<Option<u8>>>,
    cancel: Arc<AtomicBool>,
}

impl EngineHooks for RunSignals {
    fn on_progress(&self, percent: u8) {
        let _ = self.progress.send(Some(percent));
    }

    fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

pub struct SimulationOrchestrator {
    cfg: OrchestratorConfig,
    executor: Arc<dyn EngineExecutor>,
    store: Option<Arc<dyn KvStore>>,
    progress_tx: Arc<watch::Sender<Option<u8>>>,
    current_tx: watch::Sender<Option<SimulationRun>>,
    history: Mutex<RunHistory>,
    running: AtomicBool,
    cancel_flag: Mutex<Option<Arc<AtomicBool>>>,
    factors: Mutex<Vec<VariationFactor>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl SimulationOrchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        executor: Arc<dyn EngineExecutor>,
        store: Option<Arc<dyn KvStore>>,
    ) -> Arc<Self> {
        let history = match &store {
            Some(store) => RunHistory::load(store.as_ref(), cfg.history_limit),
            None => RunHistory::new(cfg.history_limit),
        };
        let (progress_tx, _) = watch::channel(None);
        let (current_tx, _) = watch::channel(None);
        Arc::new(Self {
            cfg,
            executor,
            store,
            progress_tx: Arc::new(progress_tx),
            current_tx,
            history: Mutex::new(history),
            running: AtomicBool::new(false),
            cancel_flag: Mutex::new(None),
            factors: Mutex::new(Vec::new()),
            last_refresh: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest progress percent, `None` before the first submission.
    pub fn progress(&self) -> Option<u8> {
        *self.progress_tx.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<u8>> {
        self.progress_tx.subscribe()
    }

    pub fn current_run(&self) -> Option<SimulationRun> {
        self.current_tx.borrow().clone()
    }

    pub fn subscribe_current_run(&self) -> watch::Receiver<Option<SimulationRun>> {
        self.current_tx.subscribe()
    }

    /// Terminal runs, newest first.
    pub fn history(&self) -> Vec<SimulationRun> {
        self.history.lock().snapshot()
    }

    /// Last known factor set, used when a refresh fails or is on
    /// cooldown.
    pub fn factors(&self) -> Vec<VariationFactor> {
        self.factors.lock().clone()
    }

    pub fn set_factors(&self, factors: Vec<VariationFactor>) {
        *self.factors.lock() = factors;
    }

    /// Requests cancellation of the in-flight run, if any. The engine
    /// honours the flag at its next progress tick.
    pub fn cancel(&self) {
        if let Some(flag) = self.cancel_flag.lock().as_ref() {
            flag.store(true, Ordering::SeqCst);
            tracing::info!("cancellation requested");
        }
    }

    /// Fire-and-forget submission; the run proceeds on a spawned task.
    pub fn start(
        self: &Arc<Self>,
        drivers: &[DriverMetrics],
        context: &RaceContext,
        factors: &[VariationFactor],
    ) -> Result<StartOutcome, SimError> {
        match self.accept(drivers, context, factors)? {
            None => Ok(StartOutcome::Busy),
            Some(prepared) => {
                let run_id = prepared.run.id;
                let me = Arc::clone(self);
                tokio::spawn(async move {
                    me.drive(prepared).await;
                });
                Ok(StartOutcome::Started { run_id })
            }
        }
    }

    /// Submission that resolves with the terminal run record. `Ok(None)`
    /// means the orchestrator was busy.
    pub async fn run_and_wait(
        &self,
        drivers: &[DriverMetrics],
        context: &RaceContext,
        factors: &[VariationFactor],
    ) -> Result<Option<SimulationRun>, SimError> {
        match self.accept(drivers, context, factors)? {
            None => Ok(None),
            Some(prepared) => Ok(Some(self.drive(prepared).await)),
        }
    }

    /// Fetches a fresh factor bundle, enforcing the refresh cooldown. A
    /// successful fetch replaces the last known set; failures leave it
    /// untouched so simulation can proceed on stale factors.
    pub async fn refresh_factors(
        &self,
        source: &dyn FactorSource,
    ) -> Result<FactorBundle, SimError> {
        let cooldown = Duration::from_secs(self.cfg.news_cooldown_sec);
        {
            let mut last = self.last_refresh.lock();
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < cooldown {
                    let remaining = (cooldown - elapsed).as_secs().max(1);
                    return Err(SimError::Cooldown(remaining));
                }
            }
            // The attempt consumes the quota whether or not it succeeds.
            *last = Some(Instant::now());
        }

        let bundle = source.fetch().await?;
        tracing::info!(
            factors = bundle.factors.len(),
            source = %bundle.source,
            "variation factors refreshed"
        );
        *self.factors.lock() = bundle.factors.clone();
        Ok(bundle)
    }

    fn accept(
        &self,
        drivers: &[DriverMetrics],
        context: &RaceContext,
        factors: &[VariationFactor],
    ) -> Result<Option<PreparedRun>, SimError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("submission rejected: busy");
            return Ok(None);
        }

        if let Err(err) = validate_lineup(drivers) {
            self.running.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let sanitized = context.sanitized();
        let enabled = factors
            .iter()
            .filter(|f| f.enabled)
            .cloned()
            .collect::<Vec<_>>();
        let (sim_drivers, sim_context) = apply_factors(&enabled, drivers, &sanitized);

        let now = Utc::now();
        let run = SimulationRun {
            id: now.timestamp_millis(),
            status: RunStatus::Running,
            context: sim_context,
            lineup: sim_drivers.clone(),
            applied_factors: enabled,
            seed: sim_context.seed,
            started_at: now,
            finished_at: None,
            message: None,
            result: None,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel_flag.lock() = Some(Arc::clone(&cancel));
        let _ = self.progress_tx.send(Some(0));
        let _ = self.current_tx.send(Some(run.clone()));
        tracing::info!(
            run_id = run.id,
            drivers = run.lineup.len(),
            runs = run.context.runs,
            factors = run.applied_factors.len(),
            "simulation accepted"
        );

        Ok(Some(PreparedRun {
            run,
            drivers: sim_drivers,
            context: sim_context,
            cancel,
        }))
    }

    async fn drive(&self, prepared: PreparedRun) -> SimulationRun {
        let PreparedRun {
            mut run,
            drivers,
            context,
            cancel,
        } = prepared;

        let hooks = RunSignals {
            progress: Arc::clone(&self.progress_tx),
            cancel: Arc::clone(&cancel),
        };
        let job: EngineJob =
            Box::new(move || SimulationEngine::new().run(&drivers, &context, &hooks));

        let budget = Duration::from_millis(self.cfg.timeout_ms);
        let outcome = match tokio::time::timeout(budget, self.executor.execute(job)).await {
            Ok(result) => result,
            Err(_) => {
                // The worker cannot be killed; raise the flag so it
                // unwinds at its next tick, and abandon it.
                cancel.store(true, Ordering::SeqCst);
                Err(SimError::Timeout(self.cfg.timeout_ms))
            }
        };

        run.finished_at = Some(Utc::now());
        match outcome {
            Ok(summary) => {
                run.status = RunStatus::Completed;
                run.result = Some(summary);
                let _ = self.progress_tx.send(Some(100));
                tracing::info!(run_id = run.id, "simulation completed");
            }
            Err(SimError::Cancelled) => {
                run.status = RunStatus::Cancelled;
                tracing::info!(run_id = run.id, "simulation cancelled");
            }
            Err(err) => {
                run.status = RunStatus::Failed;
                run.message = Some(err.to_string());
                tracing::warn!(run_id = run.id, %err, "simulation failed");
            }
        }

        // Terminal transition first, then the history append.
        let _ = self.current_tx.send(Some(run.clone()));
        {
            let mut history = self.history.lock();
            history.push(run.clone());
            if let Some(store) = &self.store {
                history.persist(store.as_ref());
                persist_last_run(store.as_ref(), &run);
            }
        }
        *self.cancel_flag.lock() = None;
        self.running.store(false, Ordering::SeqCst);
        run
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::{FactorTarget, ImpactType, TargetKind};
    use run_store::MemoryStore;
    use std::sync::atomic::AtomicU32;

    fn driver(code: &str, grid: u32, qualy_ms: f64, long_run: f64) -> DriverMetrics {
        DriverMetrics {
            id: code.to_ascii_lowercase(),
            code: code.to_string(),
            name: format!("{code} Driver"),
            team: format!("{code} Racing"),
            grid_position: grid,
            qualy_gap_ms: qualy_ms,
            long_run_pace_delta: long_run,
            straightline_index: 92.0,
            cornering_index: 96.0,
            speed_trap_kph: 342.0,
            pit_stop_median: 2.27,
            dnf_rate: 0.0,
            wet_skill: 0.95,
            consistency: 0.97,
            tyre_management: 0.9,
            aggression: 0.68,
            experience: 0.83,
            team_strength: 1.0,
            standings_points: None,
        }
    }

    fn lineup() -> Vec<DriverMetrics> {
        vec![
            driver("AAA", 1, 0.0, -0.2),
            driver("BBB", 2, 120.0, 0.0),
        ]
    }

    fn context(runs: u32, seed: u64) -> RaceContext {
        RaceContext {
            runs,
            randomness: 0.0,
            seed: Some(seed),
            ..RaceContext::default()
        }
    }

    fn orchestrator(
        cfg: OrchestratorConfig,
        store: Option<Arc<dyn KvStore>>,
    ) -> Arc<SimulationOrchestrator> {
        SimulationOrchestrator::new(cfg, Arc::new(BlockingExecutor), store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completed_run_lands_in_history_and_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let orch = orchestrator(OrchestratorConfig::default(), Some(Arc::clone(&store)));

        let run = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");

        assert_eq!(run.status, RunStatus::Completed);
        let summary = run.result.expect("summary");
        assert_eq!(summary.predicted_winner, "AAA");
        assert_eq!(orch.progress(), Some(100));
        assert_eq!(orch.history().len(), 1);
        assert!(store.get_item(run_store::LAST_RUN_KEY).is_some());
        assert!(store.get_item(run_store::HISTORY_KEY).is_some());
        assert!(!orch.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn determinism_across_submissions() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let first = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");
        let second = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");
        assert_eq!(
            first.result.expect("first summary").results,
            second.result.expect("second summary").results
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_before_first_tick_lands_within_one_interval() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let ctx = RaceContext {
            runs: 20_000,
            randomness: 0.5,
            seed: Some(1),
            ..RaceContext::default()
        };
        let mut current = orch.subscribe_current_run();

        let outcome = orch.start(&lineup(), &ctx, &[]).expect("submission");
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        orch.cancel();

        let run = loop {
            current.changed().await.expect("watch open");
            let snapshot = current.borrow_and_update().clone();
            if let Some(run) = snapshot {
                if run.status.is_terminal() {
                    break run;
                }
            }
        };

        assert_eq!(run.status, RunStatus::Cancelled);
        let progress = orch.progress().expect("progress seen");
        assert!(progress <= 15, "progress was {progress}");
        assert_eq!(orch.history().len(), 1);
        assert_eq!(orch.history()[0].status, RunStatus::Cancelled);
        assert!(!orch.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_fails_the_run_with_a_diagnostic() {
        let cfg = OrchestratorConfig {
            timeout_ms: 1,
            ..OrchestratorConfig::default()
        };
        let orch = orchestrator(cfg, None);
        let run = orch
            .run_and_wait(&lineup(), &context(20_000, 9), &[])
            .await
            .expect("submission")
            .expect("not busy");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.message.as_deref(), Some("timeout after 1 ms"));
        assert!(run.result.is_none());

        // A fresh submission gets a fresh worker.
        let run = orch
            .run_and_wait(&lineup(), &context(1_000, 9), &[])
            .await
            .expect("submission")
            .expect("not busy");
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_orchestrator_rejects_reentry() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let ctx = RaceContext {
            runs: 20_000,
            randomness: 0.5,
            seed: Some(2),
            ..RaceContext::default()
        };
        let mut current = orch.subscribe_current_run();
        orch.start(&lineup(), &ctx, &[]).expect("first submission");
        let second = orch.start(&lineup(), &ctx, &[]).expect("second submission");
        assert_eq!(second, StartOutcome::Busy);

        orch.cancel();
        loop {
            current.changed().await.expect("watch open");
            let terminal = current
                .borrow_and_update()
                .as_ref()
                .is_some_and(|run| run.status.is_terminal());
            if terminal {
                break;
            }
        }
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_lineup_never_starts_the_engine() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let err = orch
            .run_and_wait(&[driver("SOL", 1, 0.0, 0.0)], &context(1_000, 3), &[])
            .await
            .expect_err("must reject");
        assert!(matches!(err, SimError::InvalidInput(_)));
        assert!(orch.history().is_empty());
        assert!(!orch.is_running());

        // The slot is released for the next valid submission.
        let run = orch
            .run_and_wait(&lineup(), &context(1_000, 3), &[])
            .await
            .expect("submission")
            .expect("not busy");
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reliability_factor_raises_dnf_probability() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let baseline = orch
            .run_and_wait(&lineup(), &context(2_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");

        let factor = VariationFactor {
            id: "engine-scare".to_string(),
            label: "Engine scare".to_string(),
            description: String::new(),
            impact: ImpactType::Reliability,
            targets: vec![FactorTarget {
                kind: TargetKind::Driver,
                id: "A".repeat(3),
            }],
            magnitude: -1.0,
            enabled: true,
        };
        let adjusted = orch
            .run_and_wait(&lineup(), &context(2_000, 42), &[factor])
            .await
            .expect("submission")
            .expect("not busy");

        let dnf_of = |run: &SimulationRun| {
            run.result
                .as_ref()
                .expect("summary")
                .results
                .iter()
                .find(|r| r.code == "AAA")
                .expect("driver A")
                .dnf_probability
        };
        let before = dnf_of(&baseline);
        let after = dnf_of(&adjusted);
        assert_eq!(before, 0.0);
        assert!(after - before >= 0.03, "dnf moved {before} -> {after}");
        assert_eq!(adjusted.applied_factors.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn qualifying_factor_moves_the_observed_grid() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let factor = VariationFactor {
            id: "quali-boost".to_string(),
            label: "Qualifying boost".to_string(),
            description: String::new(),
            impact: ImpactType::Qualifying,
            targets: vec![FactorTarget {
                kind: TargetKind::Driver,
                id: "bbb".to_string(),
            }],
            magnitude: 1.0,
            enabled: true,
        };
        let run = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[factor])
            .await
            .expect("submission")
            .expect("not busy");
        let b = run
            .lineup
            .iter()
            .find(|d| d.code == "BBB")
            .expect("driver B");
        assert_eq!(b.grid_position, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_magnitude_pace_factor_preserves_the_ranking() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let baseline = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");
        let factor = VariationFactor {
            id: "nothingburger".to_string(),
            label: "No news".to_string(),
            description: String::new(),
            impact: ImpactType::Pace,
            targets: Vec::new(),
            magnitude: 0.0,
            enabled: true,
        };
        let adjusted = orch
            .run_and_wait(&lineup(), &context(1_000, 42), &[factor])
            .await
            .expect("submission")
            .expect("not busy");
        assert_eq!(
            baseline.result.expect("baseline summary").results,
            adjusted.result.expect("adjusted summary").results
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pace_boost_improves_average_finish_on_the_same_seed() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let avg_of = |run: &SimulationRun, code: &str| {
            run.result
                .as_ref()
                .expect("summary")
                .results
                .iter()
                .find(|r| r.code == code)
                .expect("driver")
                .average_finish
        };

        let baseline = orch
            .run_and_wait(&lineup(), &context(2_000, 42), &[])
            .await
            .expect("submission")
            .expect("not busy");
        let factor = VariationFactor {
            id: "b-upgrade".to_string(),
            label: "Major upgrade".to_string(),
            description: String::new(),
            impact: ImpactType::Pace,
            targets: vec![FactorTarget {
                kind: TargetKind::Driver,
                id: "BBB".to_string(),
            }],
            magnitude: 1.0,
            enabled: true,
        };
        let boosted = orch
            .run_and_wait(&lineup(), &context(2_000, 42), &[factor])
            .await
            .expect("submission")
            .expect("not busy");

        assert!(
            avg_of(&boosted, "BBB") < avg_of(&baseline, "BBB"),
            "boost did not lower B's average finish"
        );
    }

    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl FactorSource for CountingSource {
        async fn fetch(&self) -> Result<FactorBundle, SimError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FactorBundle {
                factors: Vec::new(),
                source: "heuristic".to_string(),
                updated_at: None,
            })
        }
    }

    #[tokio::test]
    async fn factor_refresh_honours_the_cooldown() {
        let orch = orchestrator(OrchestratorConfig::default(), None);
        let source = CountingSource {
            calls: AtomicU32::new(0),
        };

        orch.refresh_factors(&source).await.expect("first refresh");
        let err = orch
            .refresh_factors(&source)
            .await
            .expect_err("cooldown must block");
        assert!(matches!(err, SimError::Cooldown(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_is_bounded() {
        let cfg = OrchestratorConfig {
            history_limit: 3,
            ..OrchestratorConfig::default()
        };
        let orch = orchestrator(cfg, None);
        for seed in 0..5u64 {
            orch.run_and_wait(&lineup(), &context(500, seed), &[])
                .await
                .expect("submission")
                .expect("not busy");
        }
        let history = orch.history();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.status == RunStatus::Completed));
    }
}
