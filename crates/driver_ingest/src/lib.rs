//! CSV driver-table ingest and export.
//!
//! Headers are strict (exact lowercase snake_case set), numbers are
//! lenient: anything that fails to parse lands as `0`.

use core_types::{DriverMetrics, SimError};

pub const REQUIRED_HEADERS: [&str; 10] = [
    "driver_name",
    "team_name",
    "grid_position",
    "qualy_gap_ms",
    "fp_longrun_pace_s",
    "straightline_index",
    "cornering_index",
    "pit_crew_mean_s",
    "dnf_rate",
    "speed_trap_kph",
];

const DEFAULT_WET_SKILL: f64 = 0.8;
const DEFAULT_CONSISTENCY: f64 = 0.8;
const DEFAULT_TYRE_MANAGEMENT: f64 = 0.8;
const DEFAULT_AGGRESSION: f64 = 0.6;
const DEFAULT_EXPERIENCE: f64 = 0.5;

/// Parses a UTF-8 CSV string into driver rows.
pub fn parse_driver_csv(raw: &str) -> Result<Vec<DriverMetrics>, SimError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| SimError::InvalidInput(format!("unreadable CSV header: {err}")))?
        .clone();
    let index_of = |name: &str| headers.iter().position(|h| h == name);

    let missing = REQUIRED_HEADERS
        .iter()
        .filter(|name| index_of(name).is_none())
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(SimError::InvalidInput(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let col = |name: &str| index_of(name).unwrap_or(usize::MAX);
    let name_col = col("driver_name");
    let team_col = col("team_name");
    let grid_col = col("grid_position");
    let qualy_col = col("qualy_gap_ms");
    let longrun_col = col("fp_longrun_pace_s");
    let straight_col = col("straightline_index");
    let corner_col = col("cornering_index");
    let pit_col = col("pit_crew_mean_s");
    let dnf_col = col("dnf_rate");
    let trap_col = col("speed_trap_kph");

    let mut drivers = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            SimError::InvalidInput(format!("unreadable CSV row {}: {err}", row_idx + 1))
        })?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let name = field(name_col);
        if name.is_empty() {
            return Err(SimError::InvalidInput(format!(
                "empty driver_name on row {}",
                row_idx + 1
            )));
        }

        drivers.push(DriverMetrics {
            id: derive_id(name),
            code: derive_code(name),
            name: name.to_string(),
            team: field(team_col).to_string(),
            grid_position: (lenient_number(field(grid_col)) as u32).max(1),
            qualy_gap_ms: lenient_number(field(qualy_col)),
            long_run_pace_delta: lenient_number(field(longrun_col)),
            straightline_index: lenient_number(field(straight_col)),
            cornering_index: lenient_number(field(corner_col)),
            speed_trap_kph: lenient_number(field(trap_col)),
            pit_stop_median: lenient_number(field(pit_col)),
            dnf_rate: lenient_number(field(dnf_col)).clamp(0.0, 1.0),
            wet_skill: DEFAULT_WET_SKILL,
            consistency: DEFAULT_CONSISTENCY,
            tyre_management: DEFAULT_TYRE_MANAGEMENT,
            aggression: DEFAULT_AGGRESSION,
            experience: DEFAULT_EXPERIENCE,
            team_strength: 1.0,
            standings_points: None,
        });
    }

    Ok(drivers)
}

/// Serialises the active driver columns back to CSV: same header set,
/// UTF-8, LF line endings, no BOM.
pub fn export_driver_csv(drivers: &[DriverMetrics]) -> Result<String, SimError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(REQUIRED_HEADERS)
        .map_err(|err| SimError::InvalidInput(format!("CSV header write failed: {err}")))?;
    for d in drivers {
        let record = [
            d.name.clone(),
            d.team.clone(),
            d.grid_position.to_string(),
            format_number(d.qualy_gap_ms),
            format_number(d.long_run_pace_delta),
            format_number(d.straightline_index),
            format_number(d.cornering_index),
            format_number(d.pit_stop_median),
            format_number(d.dnf_rate),
            format_number(d.speed_trap_kph),
        ];
        writer
            .write_record(&record)
            .map_err(|err| SimError::InvalidInput(format!("CSV row write failed: {err}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| SimError::InvalidInput(format!("CSV flush failed: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|err| SimError::InvalidInput(format!("CSV is not UTF-8: {err}")))
}

fn lenient_number(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn derive_id(name: &str) -> String {
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

fn derive_code(name: &str) -> String {
    name.split_whitespace()
        .last()
        .unwrap_or(name)
        .to_uppercase()
        .chars()
        .take(3)
        .collect()
}
