use async_trait::async_trait;
use clap::{Parser, Subcommand};
use ensemble_core::EnsembleResult;
use ensemble_orchestrator::{
    default_profiles, CoordinationRequest, Orchestrator, OrchestratorConfig, TextGenerator,
    WorkerRegistry,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "ensemble.toml";

#[derive(Parser)]
#[command(name = "ensemble", about = "Ensemble: phased multi-worker coordination")]
struct Cli {
    /// Path to config file (defaults to ./ensemble.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Coordinate a request end to end and print the report
    Run {
        request: String,
        /// Complexity tier (classified from the request when omitted)
        #[arg(long)]
        tier: Option<String>,
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Print the execution plan for a request without running it
    Plan {
        request: String,
        #[arg(long)]
        tier: Option<String>,
    },
    /// Print the tier and capability tags of a request
    Classify { request: String },
}

/// Offline generator: answers every prompt with the task it was given.
struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> EnsembleResult<String> {
        let role = system_prompt.lines().next().unwrap_or_default();
        let task = prompt.lines().nth(1).unwrap_or_default();
        Ok(format!("{role}\n\n{task}"))
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to load config file '{}': {}", path.display(), e)
        }),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if tokio::fs::try_exists(default).await.unwrap_or(false) {
                Ok(OrchestratorConfig::load(default).await?)
            } else {
                Ok(OrchestratorConfig::default())
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Execute one subcommand. Returns `false` when a run ended in failure.
async fn run_command(orchestrator: &Orchestrator, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Run {
            request,
            tier,
            session,
        } => {
            let mut request = CoordinationRequest::new(session, request);
            if let Some(tier) = tier {
                request = request.with_tier(tier);
            }
            let report = orchestrator.run(request).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            info!(task_id = %report.task_id(), success = report.is_success(), "Run finished");
            return Ok(report.is_success());
        }
        Commands::Plan { request, tier } => {
            let plan = orchestrator.plan(&request, tier.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Classify { request } => {
            let classification = orchestrator.classify(&request);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_deref()).await?;
    let telemetry = config.telemetry_hub();
    let registry = WorkerRegistry::from_profiles(default_profiles(), Arc::new(EchoGenerator));
    let orchestrator = Orchestrator::with_config(registry, config, telemetry.clone());

    let outcome = run_command(&orchestrator, cli.command).await;
    telemetry.shutdown().await;

    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
