use async_trait::async_trait;
use core_types::{SimError, SimulationSummary};

pub type EngineJob = Box<dyn FnOnce() -> Result<SimulationSummary, SimError> + Send + 'static>;

/// Seam between the orchestrator and wherever the CPU-bound sweep
/// actually runs.
#[async_trait]
pub trait EngineExecutor: Send + Sync {
    async fn execute(&self, job: EngineJob) -> Result<SimulationSummary, SimError>;
}

/// Production executor: the sweep runs on the tokio blocking pool so the
/// calling runtime stays responsive.
pub struct BlockingExecutor;

#[async_trait]
impl EngineExecutor for BlockingExecutor {
    async fn execute(&self, job: EngineJob) -> Result<SimulationSummary, SimError> {
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|err| SimError::Invariant(format!("engine worker died: {err}")))?
    }
}

/// Runs the job on the calling task. Blocks the runtime for the whole
/// sweep; only suitable for tests.
pub struct InlineExecutor;

#[async_trait]
impl EngineExecutor for InlineExecutor {
    async fn execute(&self, job: EngineJob) -> Result<SimulationSummary, SimError> {
        job()
    }
}
