use crate::context::CoordinationContext;
use crate::gates::GateOutcome;
use crate::types::{PhaseStatus, WorkerState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status and outputs of one attempted phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub id: String,
    pub name: String,
    pub status: PhaseStatus,
    pub workers: Vec<String>,
    /// Worker ID to output.
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_workers: Vec<String>,
}

/// Everything a run produced, complete or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub phases: Vec<PhaseSummary>,
    pub shared_state: Map<String, Value>,
    /// Number of communication events logged.
    pub communications: usize,
    pub worker_states: Vec<WorkerState>,
    pub gate_outcomes: Vec<GateOutcome>,
}

/// Successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedReport {
    pub success: bool,
    pub task_id: String,
    pub results: RunResults,
    pub execution_time_ms: u64,
    pub workers_executed: Vec<String>,
}

/// Aborted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedReport {
    pub success: bool,
    pub task_id: String,
    pub error: String,
    /// `None` when the run failed before a context existed.
    pub partial_results: Option<RunResults>,
    pub failed_phase_id: Option<String>,
}

/// The single structured outcome handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordinationReport {
    Completed(CompletedReport),
    Failed(FailedReport),
}

impl CoordinationReport {
    pub fn is_success(&self) -> bool {
        matches!(self, CoordinationReport::Completed(_))
    }

    pub fn task_id(&self) -> &str {
        match self {
            CoordinationReport::Completed(r) => &r.task_id,
            CoordinationReport::Failed(r) => &r.task_id,
        }
    }

    /// Results, whether complete or partial.
    pub fn results(&self) -> Option<&RunResults> {
        match self {
            CoordinationReport::Completed(r) => Some(&r.results),
            CoordinationReport::Failed(r) => r.partial_results.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CoordinationReport::Completed(_) => None,
            CoordinationReport::Failed(r) => Some(&r.error),
        }
    }

    pub fn failed_phase_id(&self) -> Option<&str> {
        match self {
            CoordinationReport::Completed(_) => None,
            CoordinationReport::Failed(r) => r.failed_phase_id.as_deref(),
        }
    }

    /// Failure report for a run that never got a context.
    pub fn rejected(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        CoordinationReport::Failed(FailedReport {
            success: false,
            task_id: task_id.into(),
            error: error.into(),
            partial_results: None,
            failed_phase_id: None,
        })
    }
}

/// Collect the results of a (possibly partial) run.
///
/// Phases that were never started are left out.
pub fn aggregate(ctx: &CoordinationContext) -> RunResults {
    let phases = ctx
        .phases()
        .into_iter()
        .filter(|p| p.status != PhaseStatus::Pending)
        .map(|p| PhaseSummary {
            id: p.id,
            name: p.name,
            status: p.status,
            workers: p.worker_ids,
            outputs: p.outputs,
            failed_workers: p.failed_workers,
        })
        .collect();

    RunResults {
        phases,
        shared_state: ctx.shared_snapshot(),
        communications: ctx.event_count(),
        worker_states: ctx.worker_states(),
        gate_outcomes: ctx.gate_outcomes(),
    }
}

/// Span from the earliest phase start to the latest phase end, over phases
/// that recorded both. Zero when none did.
pub fn execution_time_ms(ctx: &CoordinationContext) -> u64 {
    let spans: Vec<_> = ctx
        .phases()
        .into_iter()
        .filter_map(|p| Some((p.started_at?, p.ended_at?)))
        .collect();

    let first_start = spans.iter().map(|(start, _)| *start).min();
    let last_end = spans.iter().map(|(_, end)| *end).max();
    match (first_start, last_end) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

/// Wrap a finished run into a success report.
pub fn completed_report(ctx: &CoordinationContext) -> CoordinationReport {
    CoordinationReport::Completed(CompletedReport {
        success: true,
        task_id: ctx.task_id().to_string(),
        results: aggregate(ctx),
        execution_time_ms: execution_time_ms(ctx),
        workers_executed: ctx.workers_executed(),
    })
}

/// Wrap an aborted run into a failure report carrying partial results.
pub fn failed_report(
    ctx: &CoordinationContext,
    error: impl Into<String>,
    failed_phase_id: Option<String>,
) -> CoordinationReport {
    CoordinationReport::Failed(FailedReport {
        success: false,
        task_id: ctx.task_id().to_string(),
        error: error.into(),
        partial_results: Some(aggregate(ctx)),
        failed_phase_id,
    })
}
