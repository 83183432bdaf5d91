use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub timeout_ms: u64,
    pub history_limit: usize,
    pub news_cooldown_sec: u64,
    pub factor_endpoint: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            history_limit: 10,
            news_cooldown_sec: 30,
            factor_endpoint: None,
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var("GRIDEDGE_CONFIG_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("configs/simulator.toml"))
}

/// Loads `configs/simulator.toml` (or the `GRIDEDGE_CONFIG_PATH`
/// override). A missing or unparsable file falls back to defaults; every
/// field is clamped on load.
pub fn load_orchestrator_config() -> OrchestratorConfig {
    let path = config_path();
    let Ok(raw) = fs::read_to_string(path) else {
        return OrchestratorConfig::default();
    };
    parse_orchestrator_config(&raw)
}

pub(crate) fn parse_orchestrator_config(raw: &str) -> OrchestratorConfig {
    #[derive(Debug, Deserialize, Default)]
    struct SimulatorFile {
        orchestrator: Option<OrchestratorSection>,
    }

    #[derive(Debug, Deserialize, Default)]
    struct OrchestratorSection {
        timeout_ms: Option<u64>,
        history_limit: Option<usize>,
        news_cooldown_sec: Option<u64>,
        factor_endpoint: Option<String>,
    }

    let Ok(parsed) = toml::from_str::<SimulatorFile>(raw) else {
        return OrchestratorConfig::default();
    };
    let Some(section) = parsed.orchestrator else {
        return OrchestratorConfig::default();
    };

    let mut cfg = OrchestratorConfig::default();
    if let Some(v) = section.timeout_ms {
        cfg.timeout_ms = v.clamp(1_000, 600_000);
    }
    if let Some(v) = section.history_limit {
        cfg.history_limit = v.clamp(1, 10);
    }
    if let Some(v) = section.news_cooldown_sec {
        cfg.news_cooldown_sec = v.clamp(5, 3_600);
    }
    if let Some(v) = section.factor_endpoint {
        cfg.factor_endpoint = (!v.trim().is_empty()).then_some(v);
    }
    cfg
}
