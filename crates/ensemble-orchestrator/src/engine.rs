use crate::aggregator::{completed_report, failed_report, CoordinationReport};
use crate::classifier::Classification;
use crate::config::OrchestratorConfig;
use crate::context::{generate_task_id, ContextStore, CoordinationContext, ORCHESTRATOR};
use crate::executor::PhaseExecutor;
use crate::gates::validate_gates;
use crate::plan::PlanBuilder;
use crate::telemetry::{TelemetryHub, TelemetryUpdate};
use crate::types::{CommunicationEvent, EventType, ExecutionPlan, Phase, PhaseStatus};
use crate::worker::WorkerRegistry;
use ensemble_core::{EnsembleError, EnsembleResult, Tier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A request to coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub session_id: String,
    pub request: String,
    /// Tier name. Classified from the request text when absent.
    #[serde(default)]
    pub tier: Option<String>,
    /// Entries seeded into shared state before the first phase.
    #[serde(default)]
    pub initial_state: Map<String, Value>,
}

impl CoordinationRequest {
    pub fn new(session_id: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request: request.into(),
            tier: None,
            initial_state: Map::new(),
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_state.insert(key.into(), value);
        self
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

/// Error that aborted a run, with the phase it happened in.
struct PhaseFailure {
    phase_id: String,
    error: EnsembleError,
}

/// Removes the run's context from the store on every exit path.
struct ContextGuard<'a> {
    store: &'a ContextStore,
    task_id: String,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.store.destroy(&self.task_id);
    }
}

/// The coordination engine.
///
/// Builds a plan, then runs its phases one at a time, validating quality
/// gates after each completed phase, and folds the outcome into a
/// [`CoordinationReport`]. Never returns an error to the caller.
pub struct Orchestrator {
    store: Arc<ContextStore>,
    executor: PhaseExecutor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Orchestrator with default configuration and no telemetry.
    pub fn new(registry: WorkerRegistry) -> Self {
        Self::with_config(registry, OrchestratorConfig::default(), TelemetryHub::default())
    }

    pub fn with_config(
        registry: WorkerRegistry,
        config: OrchestratorConfig,
        telemetry: TelemetryHub,
    ) -> Self {
        let builder = PlanBuilder::default().with_phase_budget_ms(config.phase_budget_ms);
        let store = Arc::new(ContextStore::new(builder).with_telemetry(telemetry));
        Self::with_store(registry, config, store)
    }

    /// Use an existing context store, e.g. one shared with other components.
    pub fn with_store(
        registry: WorkerRegistry,
        config: OrchestratorConfig,
        store: Arc<ContextStore>,
    ) -> Self {
        Self {
            store,
            executor: PhaseExecutor::new(Arc::new(registry)),
            config,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn classify(&self, request: &str) -> Classification {
        self.store.builder().classifier().classify(request)
    }

    /// Build the plan a run would use, without running it.
    pub fn plan(&self, request: &str, tier: Option<&str>) -> EnsembleResult<ExecutionPlan> {
        let tier = self.resolve_tier(request, tier)?;
        Ok(self.store.builder().build(request, tier))
    }

    fn resolve_tier(&self, request: &str, tier: Option<&str>) -> EnsembleResult<Tier> {
        match tier {
            Some(name) => name.parse(),
            None => Ok(self.store.builder().classifier().tier(request)),
        }
    }

    /// Run the full coordination pipeline for one request.
    pub async fn run(&self, request: CoordinationRequest) -> CoordinationReport {
        let task_id = generate_task_id();

        info!(
            task_id = %task_id,
            session_id = %request.session_id,
            "Coordination run starting"
        );

        let ctx = match self
            .resolve_tier(&request.request, request.tier.as_deref())
            .and_then(|tier| {
                self.store
                    .create_with_id(task_id.clone(), &request.session_id, &request.request, tier)
            }) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Coordination run rejected");
                self.store.telemetry().emit(TelemetryUpdate::RunFinished {
                    task_id: task_id.clone(),
                    success: false,
                });
                return CoordinationReport::rejected(task_id, e.to_string());
            }
        };

        if !request.initial_state.is_empty() {
            ctx.merge_shared(request.initial_state);
        }
        self.run_context(ctx).await
    }

    /// Run a context that is already registered in this orchestrator's store.
    ///
    /// The context is destroyed before this returns, whatever the outcome.
    pub async fn run_context(&self, ctx: Arc<CoordinationContext>) -> CoordinationReport {
        let task_id = ctx.task_id().to_string();
        let _guard = ContextGuard {
            store: &self.store,
            task_id: task_id.clone(),
        };
        let started = Instant::now();
        let mut status = RunStatus::Initialized;

        status = transition(&task_id, status, RunStatus::Running);
        let outcome = self.run_phases(&ctx).await;

        let report = match outcome {
            Ok(()) => {
                status = transition(&task_id, status, RunStatus::Completed);
                completed_report(&ctx)
            }
            Err(PhaseFailure { phase_id, error }) => {
                status = transition(&task_id, status, RunStatus::Failed);
                error!(task_id = %task_id, phase = %phase_id, error = %error, "Coordination run failed");
                failed_report(&ctx, error.to_string(), Some(phase_id))
            }
        };

        ctx.telemetry().emit(TelemetryUpdate::RunFinished {
            task_id: task_id.clone(),
            success: report.is_success(),
        });
        info!(
            task_id = %task_id,
            status = ?status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Coordination run finished"
        );
        report
    }

    /// Execute phases in plan order until one fails or a gate aborts.
    async fn run_phases(&self, ctx: &Arc<CoordinationContext>) -> Result<(), PhaseFailure> {
        let deadline = Instant::now() + Duration::from_millis(ctx.plan().timeout_ms);

        for phase in &ctx.plan().phases {
            ctx.begin_phase(&phase.id);

            let executed = if self.config.enforce_timeout {
                self.execute_with_deadline(ctx, phase, deadline).await
            } else {
                self.executor.execute(ctx, phase).await
            };

            if let Err(error) = executed {
                ctx.finish_phase(&phase.id, PhaseStatus::Failed);
                return Err(PhaseFailure {
                    phase_id: phase.id.clone(),
                    error,
                });
            }
            ctx.finish_phase(&phase.id, PhaseStatus::Completed);

            if let Err(error) = validate_gates(ctx, &phase.id) {
                ctx.finish_phase(&phase.id, PhaseStatus::Failed);
                return Err(PhaseFailure {
                    phase_id: phase.id.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    async fn execute_with_deadline(
        &self,
        ctx: &Arc<CoordinationContext>,
        phase: &Phase,
        deadline: Instant,
    ) -> EnsembleResult<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, self.executor.execute(ctx, phase)).await {
            Ok(result) => result,
            Err(_) => {
                let budget_ms = remaining.as_millis() as u64;
                let timed_out = ctx.close_phase(&phase.id, "timed out");
                warn!(
                    task_id = %ctx.task_id(),
                    phase = %phase.id,
                    budget_ms,
                    workers = ?timed_out,
                    "Phase timed out"
                );
                ctx.append_event(
                    CommunicationEvent::new(EventType::Error, ORCHESTRATOR, phase.id.clone())
                        .with_payload(json!({ "error": "timeout", "budget_ms": budget_ms })),
                );
                Err(EnsembleError::Timeout {
                    phase_id: phase.id.clone(),
                    budget_ms,
                })
            }
        }
    }
}

fn transition(task_id: &str, from: RunStatus, to: RunStatus) -> RunStatus {
    debug!(task_id = %task_id, from = ?from, to = ?to, "Run status changed");
    to
}
