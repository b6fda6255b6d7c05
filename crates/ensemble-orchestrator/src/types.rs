use crate::gates::QualityGate;
use chrono::{DateTime, Utc};
use ensemble_core::Tier;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// How the workers of a phase are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One worker at a time, stopping at the first failure.
    Sequential,
    /// All workers at once, every worker attempted regardless of failures.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Lifecycle of a [`Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Failed)
    }
}

/// A named step of an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Assigned workers, in dispatch order.
    pub worker_ids: Vec<String>,
    pub mode: ExecutionMode,
    /// Shared-state keys handed to every worker of the phase.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Shared-state keys the phase is expected to produce.
    #[serde(default)]
    pub output_keys: Vec<String>,
    pub status: PhaseStatus,
    /// Worker outputs keyed by worker ID.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Workers that failed during this phase, in resolution order.
    #[serde(default)]
    pub failed_workers: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            worker_ids: Vec::new(),
            mode,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            status: PhaseStatus::Pending,
            outputs: Map::new(),
            failed_workers: Vec::new(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_workers<I, S>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_ids = workers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Wall-clock span of the phase, when both ends were recorded.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// An ordered, immutable execution plan.
///
/// Phase order is execution order. The phases stored here stay `Pending`;
/// live status is tracked on the coordination context's own copy.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub tier: Tier,
    pub phases: Vec<Phase>,
    pub quality_gates: Vec<QualityGate>,
    /// Total budget for the run. Only enforced when the orchestrator is
    /// configured with `enforce_timeout`.
    pub timeout_ms: u64,
}

impl ExecutionPlan {
    /// Look up a phase by ID.
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Every distinct worker ID in the plan, in first-appearance order.
    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for phase in &self.phases {
            for id in &phase.worker_ids {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }

    /// Criteria strings of every gate, concatenated in gate order.
    pub fn quality_criteria(&self) -> Vec<String> {
        self.quality_gates
            .iter()
            .flat_map(|g| g.criteria.iter().cloned())
            .collect()
    }
}

/// Lifecycle of a worker within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Completed,
    Failed,
    /// Assigned to a sequential phase and blocked on an earlier worker.
    Waiting,
}

/// Per-run state of one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    pub worker_id: String,
    pub status: WorkerStatus,
    /// Point-to-point channel between the orchestrator and this worker.
    pub channel_id: String,
    /// Phase that most recently assigned the worker.
    pub phase_id: Option<String>,
    pub dependencies: Vec<String>,
    pub blocked_by: Vec<String>,
    pub last_error: Option<String>,
}

impl WorkerState {
    pub fn new(task_id: &str, worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        Self {
            channel_id: format!("{task_id}-{worker_id}"),
            worker_id,
            status: WorkerStatus::Idle,
            phase_id: None,
            dependencies: Vec::new(),
            blocked_by: Vec::new(),
            last_error: None,
        }
    }

    /// Whether the worker has been dispatched at least once and resolved.
    pub fn was_attempted(&self) -> bool {
        matches!(self.status, WorkerStatus::Completed | WorkerStatus::Failed)
    }
}

/// Kind of a [`CommunicationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Handoff,
    Request,
    Response,
    Validation,
    Error,
}

/// One entry of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl CommunicationEvent {
    pub fn new(event_type: EventType, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            from: from.into(),
            to: to.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
