use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_types::{
    FactorSource, KvStore, RaceContext, RunStatus, SafetyCarRisk, TrackProfile, TyreStress,
    VariationFactor, Weather,
};
use driver_ingest::{export_driver_csv, parse_driver_csv};
use orchestrator::{load_orchestrator_config, BlockingExecutor, SimulationOrchestrator};
use run_store::JsonFileStore;
use variation::{decode_envelope, HttpFactorSource};

#[derive(Parser, Debug)]
#[command(name = "gridedge", about = "GridEdge race prediction CLI", version)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a Monte Carlo race simulation over a driver CSV.
    Simulate(SimulateArgs),
    /// Fetch the current variation factor bundle.
    Factors(FactorsArgs),
    /// Normalise a driver CSV by parsing and re-exporting it.
    Export(ExportArgs),
}

#[derive(Debug, Clone, ValueEnum)]
enum TrackProfileArg {
    Balanced,
    Power,
    Technical,
}

impl TrackProfileArg {
    fn as_profile(&self) -> TrackProfile {
        match self {
            Self::Balanced => TrackProfile::Balanced,
            Self::Power => TrackProfile::Power,
            Self::Technical => TrackProfile::Technical,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum WeatherArg {
    Dry,
    Mixed,
    Wet,
}

impl WeatherArg {
    fn as_weather(&self) -> Weather {
        match self {
            Self::Dry => Weather::Dry,
            Self::Mixed => Weather::Mixed,
            Self::Wet => Weather::Wet,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum LevelArg {
    Low,
    Medium,
    High,
}

impl LevelArg {
    fn as_tyre_stress(&self) -> TyreStress {
        match self {
            Self::Low => TyreStress::Low,
            Self::Medium => TyreStress::Medium,
            Self::High => TyreStress::High,
        }
    }

    fn as_safety_car(&self) -> SafetyCarRisk {
        match self {
            Self::Low => SafetyCarRisk::Low,
            Self::Medium => SafetyCarRisk::Medium,
            Self::High => SafetyCarRisk::High,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    /// Driver metrics CSV.
    #[arg(long)]
    csv: PathBuf,
    #[arg(long, value_enum, default_value_t = TrackProfileArg::Balanced)]
    track_profile: TrackProfileArg,
    #[arg(long, value_enum, default_value_t = WeatherArg::Dry)]
    weather: WeatherArg,
    #[arg(long, value_enum, default_value_t = LevelArg::Medium)]
    tyre_stress: LevelArg,
    #[arg(long, value_enum, default_value_t = LevelArg::Medium)]
    safety_car: LevelArg,
    #[arg(long, default_value_t = 5_000)]
    runs: u32,
    #[arg(long, default_value_t = 0.5)]
    randomness: f64,
    #[arg(long)]
    seed: Option<u64>,
    /// JSON file with a factor array or `{factors: [...]}` envelope.
    #[arg(long)]
    factors_file: Option<PathBuf>,
    /// Factor endpoint URL; overrides the configured one.
    #[arg(long)]
    factors_url: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Directory for run persistence; omit for in-memory only.
    #[arg(long)]
    store_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct FactorsArgs {
    #[arg(long)]
    url: String,
}

#[derive(Args, Debug, Clone)]
struct ExportArgs {
    #[arg(long)]
    csv: PathBuf,
    /// Output path; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = observability::init_tracing("gridedge", cli.verbose);

    match cli.command {
        Commands::Simulate(args) => run_simulate(args).await,
        Commands::Factors(args) => run_factors(args).await,
        Commands::Export(args) => run_export(args),
    }
}

async fn run_simulate(args: SimulateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.csv)
        .with_context(|| format!("read driver CSV {}", args.csv.display()))?;
    let drivers = parse_driver_csv(&raw)?;

    let context = RaceContext {
        track_profile: args.track_profile.as_profile(),
        weather: args.weather.as_weather(),
        tyre_stress: args.tyre_stress.as_tyre_stress(),
        safety_car: args.safety_car.as_safety_car(),
        runs: args.runs,
        randomness: args.randomness,
        seed: args.seed,
        track_temp_c: None,
    };

    let mut cfg = load_orchestrator_config();
    if let Some(timeout_ms) = args.timeout_ms {
        cfg.timeout_ms = timeout_ms.clamp(1_000, 600_000);
    }
    let endpoint = args.factors_url.or_else(|| cfg.factor_endpoint.clone());

    let store: Option<Arc<dyn KvStore>> = match &args.store_dir {
        Some(dir) => Some(Arc::new(
            JsonFileStore::open(dir).context("open run store")?,
        )),
        None => None,
    };
    let orch = SimulationOrchestrator::new(cfg, Arc::new(BlockingExecutor), store);

    let mut factors = Vec::new();
    if let Some(path) = &args.factors_file {
        factors = load_factor_file(path)?;
    } else if let Some(url) = endpoint {
        let source = HttpFactorSource::new(url)?;
        match orch.refresh_factors(&source).await {
            Ok(bundle) => factors = bundle.factors,
            Err(err) => tracing::warn!(%err, "factor refresh failed, simulating without"),
        }
    }

    let mut progress_rx = orch.subscribe_progress();
    let echo = (!args.json).then(|| {
        tokio::spawn(async move {
            let mut last = None;
            while progress_rx.changed().await.is_ok() {
                let current = *progress_rx.borrow_and_update();
                if current != last {
                    if let Some(pct) = current {
                        eprintln!("progress {pct}%");
                    }
                    last = current;
                }
            }
        })
    });

    let Some(run) = orch.run_and_wait(&drivers, &context, &factors).await? else {
        bail!("orchestrator is busy");
    };
    if let Some(echo) = echo {
        echo.abort();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    match run.status {
        RunStatus::Completed => {
            let Some(summary) = run.result.as_ref() else {
                bail!("completed run is missing its summary");
            };
            println!(
                "winner={} podium={}",
                summary.predicted_winner,
                summary.predicted_podium.join(",")
            );
            for (pos, r) in summary.results.iter().enumerate() {
                println!(
                    "P{:<2} {} {:<24} win={:5.1}% podium={:5.1}% dnf={:4.1}% avg={:4.2} pts={:5.2}",
                    pos + 1,
                    r.code,
                    r.name,
                    r.win_probability * 100.0,
                    r.podium_probability * 100.0,
                    r.dnf_probability * 100.0,
                    r.average_finish,
                    r.expected_points
                );
            }
            println!(
                "runs={} elapsed_ms={} runs_per_sec={:.0}",
                summary.runs, summary.performance.elapsed_ms, summary.performance.runs_per_sec
            );
            Ok(())
        }
        RunStatus::Cancelled => {
            println!("status=cancelled");
            Ok(())
        }
        status => bail!(
            "simulation {status}: {}",
            run.message.as_deref().unwrap_or("no diagnostic")
        ),
    }
}

async fn run_factors(args: FactorsArgs) -> Result<()> {
    let source = HttpFactorSource::new(args.url)?;
    let bundle = source.fetch().await?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.csv)
        .with_context(|| format!("read driver CSV {}", args.csv.display()))?;
    let drivers = parse_driver_csv(&raw)?;
    let exported = export_driver_csv(&drivers)?;
    match args.out {
        Some(path) => {
            fs::write(&path, exported).with_context(|| format!("write {}", path.display()))?;
            println!("exported {} drivers to {}", drivers.len(), path.display());
        }
        None => print!("{exported}"),
    }
    Ok(())
}

fn load_factor_file(path: &PathBuf) -> Result<Vec<VariationFactor>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read factor file {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let envelope = if value.is_array() {
        serde_json::json!({ "factors": value })
    } else {
        value
    };
    Ok(decode_envelope(&envelope, None, None).factors)
}
