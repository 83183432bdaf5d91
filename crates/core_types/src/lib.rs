use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Points awarded to the top ten finishing positions, P1 first.
pub const POINTS_TABLE: [f64; 10] = [25.0, 18.0, 15.0, 12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 1.0];

pub const MIN_RUNS: u32 = 500;
pub const MAX_RUNS: u32 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackProfile {
    #[default]
    Balanced,
    Power,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    #[default]
    Dry,
    Mixed,
    Wet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TyreStress {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCarRisk {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for TrackProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Balanced => "balanced",
            Self::Power => "power",
            Self::Technical => "technical",
        };
        f.write_str(value)
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Dry => "dry",
            Self::Mixed => "mixed",
            Self::Wet => "wet",
        };
        f.write_str(value)
    }
}

impl fmt::Display for TyreStress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(value)
    }
}

impl fmt::Display for SafetyCarRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(value)
    }
}

/// One row of the active lineup. Rows are snapshotted at submission and
/// immutable through a simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverMetrics {
    pub id: String,
    pub code: String,
    pub name: String,
    pub team: String,
    pub grid_position: u32,
    pub qualy_gap_ms: f64,
    /// Seconds versus the session reference lap; lower is faster.
    pub long_run_pace_delta: f64,
    pub straightline_index: f64,
    pub cornering_index: f64,
    pub speed_trap_kph: f64,
    pub pit_stop_median: f64,
    pub dnf_rate: f64,
    pub wet_skill: f64,
    pub consistency: f64,
    pub tyre_management: f64,
    pub aggression: f64,
    pub experience: f64,
    /// Base-score multiplier; pace variation factors fold into this.
    #[serde(default = "default_team_strength")]
    pub team_strength: f64,
    #[serde(default)]
    pub standings_points: Option<f64>,
}

fn default_team_strength() -> f64 {
    1.0
}

impl DriverMetrics {
    /// All numeric inputs the engine consumes, for finiteness validation.
    pub fn numeric_fields(&self) -> [f64; 14] {
        [
            self.grid_position as f64,
            self.qualy_gap_ms,
            self.long_run_pace_delta,
            self.straightline_index,
            self.cornering_index,
            self.speed_trap_kph,
            self.pit_stop_median,
            self.dnf_rate,
            self.wet_skill,
            self.consistency,
            self.tyre_management,
            self.aggression,
            self.experience,
            self.team_strength,
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RaceContext {
    pub track_profile: TrackProfile,
    pub weather: Weather,
    pub tyre_stress: TyreStress,
    pub safety_car: SafetyCarRisk,
    pub runs: u32,
    pub randomness: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub track_temp_c: Option<f64>,
}

impl Default for RaceContext {
    fn default() -> Self {
        Self {
            track_profile: TrackProfile::Balanced,
            weather: Weather::Dry,
            tyre_stress: TyreStress::Medium,
            safety_car: SafetyCarRisk::Medium,
            runs: 5_000,
            randomness: 0.5,
            seed: None,
            track_temp_c: None,
        }
    }
}

impl RaceContext {
    /// Returns a copy with every tunable clamped into its legal range.
    pub fn sanitized(&self) -> Self {
        Self {
            runs: self.runs.clamp(MIN_RUNS, MAX_RUNS),
            randomness: self.randomness.clamp(0.0, 1.0),
            track_temp_c: self.track_temp_c.map(|t| t.clamp(-10.0, 60.0)),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Pace,
    Reliability,
    Qualifying,
    Strategy,
}

impl fmt::Display for ImpactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Pace => "pace",
            Self::Reliability => "reliability",
            Self::Qualifying => "qualifying",
            Self::Strategy => "strategy",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Driver,
    Team,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorTarget {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub id: String,
}

/// A news-derived adjustment scoped to drivers or teams. Positive
/// magnitude improves the target; for qualifying it means a better grid
/// slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariationFactor {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "impactType")]
    pub impact: ImpactType,
    #[serde(default)]
    pub targets: Vec<FactorTarget>,
    pub magnitude: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorBundle {
    pub factors: Vec<VariationFactor>,
    pub source: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(value)
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Lifecycle record for one submission. `result` is populated iff the run
/// completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationRun {
    pub id: i64,
    pub status: RunStatus,
    pub context: RaceContext,
    pub lineup: Vec<DriverMetrics>,
    pub applied_factors: Vec<VariationFactor>,
    pub seed: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<SimulationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverResult {
    pub driver_id: String,
    pub code: String,
    pub name: String,
    pub team: String,
    pub win_probability: f64,
    pub podium_probability: f64,
    pub dnf_probability: f64,
    pub average_finish: f64,
    pub expected_points: f64,
    pub best_finish: u32,
    pub worst_finish: u32,
    pub consistency_index: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceMetrics {
    pub elapsed_ms: u64,
    pub runs_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSummary {
    pub results: Vec<DriverResult>,
    pub predicted_winner: String,
    pub predicted_podium: Vec<String>,
    pub context: RaceContext,
    pub runs: u32,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("simulation cancelled")]
    Cancelled,
    #[error("timeout after {0} ms")]
    Timeout(u64),
    #[error("factor source unavailable: {0}")]
    FactorSource(String),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    #[error("news refresh cooling down, retry in {0} s")]
    Cooldown(u64),
}

/// The engine's only channel back to its host. Progress ticks double as
/// cancellation service points; the engine never suspends elsewhere.
pub trait EngineHooks: Send + Sync {
    fn on_progress(&self, percent: u8);
    fn should_cancel(&self) -> bool;
}

pub struct NoopHooks;

impl EngineHooks for NoopHooks {
    fn on_progress(&self, _percent: u8) {}
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Opaque key-value persistence with last-writer-wins semantics. Absence
/// of a store is tolerated everywhere (in-memory only).
pub trait KvStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

#[async_trait]
pub trait FactorSource: Send + Sync {
    async fn fetch(&self) -> Result<FactorBundle, SimError>;
}
