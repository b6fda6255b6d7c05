use crate::plan::DEFAULT_PHASE_BUDGET_MS;
use crate::telemetry::{JsonlTelemetry, TelemetryHub};
use ensemble_core::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runtime configuration of the orchestrator.
///
/// ```toml
/// phase_budget_ms = 30000
/// enforce_timeout = false
///
/// [telemetry]
/// jsonl_path = "logs/telemetry.jsonl"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_phase_budget_ms")]
    pub phase_budget_ms: u64,
    /// Abort runs that exceed the plan's timeout budget.
    #[serde(default)]
    pub enforce_timeout: bool,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Append-only JSONL log of worker state changes and events.
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,
}

fn default_phase_budget_ms() -> u64 {
    DEFAULT_PHASE_BUDGET_MS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            phase_budget_ms: default_phase_budget_ms(),
            enforce_timeout: false,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> EnsembleResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| EnsembleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub async fn load(path: &Path) -> EnsembleResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> EnsembleResult<()> {
        if self.phase_budget_ms == 0 {
            return Err(EnsembleError::Config(
                "phase_budget_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Telemetry hub with the sinks this configuration asks for.
    ///
    /// The JSONL writer starts on the current tokio runtime; call
    /// [`TelemetryHub::shutdown`] on the returned hub before exiting.
    pub fn telemetry_hub(&self) -> TelemetryHub {
        let mut hub = TelemetryHub::new();
        if let Some(path) = &self.telemetry.jsonl_path {
            hub.add_sink(Arc::new(JsonlTelemetry::new(path.clone())));
        }
        hub
    }
}
