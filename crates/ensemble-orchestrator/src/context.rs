use crate::gates::GateOutcome;
use crate::plan::PlanBuilder;
use crate::telemetry::{TelemetryHub, TelemetryUpdate};
use crate::types::{
    CommunicationEvent, EventType, ExecutionMode, ExecutionPlan, Phase, PhaseStatus,
    WorkerState, WorkerStatus,
};
use chrono::Utc;
use ensemble_core::{EnsembleError, EnsembleResult, Tier};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Name used for the engine itself in the event log.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Shared-state key under which the request text is published.
pub const USER_REQUEST_KEY: &str = "user-request";

/// Allocate a fresh, collision-resistant task ID.
pub fn generate_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

/// Mutable part of a run. Guarded by a single lock; never held across an await.
#[derive(Debug, Default)]
struct RunState {
    shared: Map<String, Value>,
    current_phase: Option<String>,
    phases: Vec<Phase>,
    workers: Vec<WorkerState>,
    dispatch_order: Vec<String>,
    events: Vec<CommunicationEvent>,
    gate_outcomes: Vec<GateOutcome>,
    /// Phases that no longer accept dispatches or worker results.
    closed_phases: Vec<String>,
}

impl RunState {
    fn phase_mut(&mut self, phase_id: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.id == phase_id)
    }

    fn worker_mut(&mut self, worker_id: &str) -> Option<&mut WorkerState> {
        self.workers.iter_mut().find(|w| w.worker_id == worker_id)
    }

    fn is_closed(&self, phase_id: &str) -> bool {
        self.closed_phases.iter().any(|p| p == phase_id)
    }

    /// Whether `worker_id` is currently dispatched in an open `phase_id`.
    fn is_busy_in(&self, phase_id: &str, worker_id: &str) -> bool {
        !self.is_closed(phase_id)
            && self.workers.iter().any(|w| {
                w.worker_id == worker_id
                    && w.status == WorkerStatus::Busy
                    && w.phase_id.as_deref() == Some(phase_id)
            })
    }

    fn fail(
        &mut self,
        task_id: &str,
        phase_id: &str,
        worker_id: &str,
        reason: &str,
        out: &mut Vec<TelemetryUpdate>,
    ) {
        if let Some(phase) = self.phase_mut(phase_id) {
            if !phase.failed_workers.iter().any(|w| w == worker_id) {
                phase.failed_workers.push(worker_id.to_string());
            }
        }
        if let Some(worker) = self.worker_mut(worker_id) {
            worker.status = WorkerStatus::Failed;
            worker.last_error = Some(reason.to_string());
            out.push(TelemetryUpdate::WorkerState {
                task_id: task_id.to_string(),
                state: worker.clone(),
            });
        }
        let event = CommunicationEvent::new(EventType::Error, worker_id, ORCHESTRATOR)
            .with_payload(json!({ "phase": phase_id, "error": reason }));
        self.push_event(task_id, event, out);
    }

    fn push_event(&mut self, task_id: &str, event: CommunicationEvent, out: &mut Vec<TelemetryUpdate>) {
        out.push(TelemetryUpdate::Event {
            task_id: task_id.to_string(),
            event: event.clone(),
        });
        self.events.push(event);
    }
}

/// Per-run state shared by the phase executor, gate validator and aggregator.
///
/// Workers running concurrently inside a parallel phase never touch the
/// underlying maps directly; every mutation goes through this type's methods
/// and is serialized by an internal lock.
pub struct CoordinationContext {
    session_id: String,
    task_id: String,
    request: String,
    plan: ExecutionPlan,
    state: RwLock<RunState>,
    telemetry: TelemetryHub,
}

impl std::fmt::Debug for CoordinationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationContext")
            .field("session_id", &self.session_id)
            .field("task_id", &self.task_id)
            .field("plan", &self.plan.id)
            .finish_non_exhaustive()
    }
}

impl CoordinationContext {
    /// Create a context around an already-built plan.
    ///
    /// The request text is published in shared state under [`USER_REQUEST_KEY`].
    pub fn new(
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        request: impl Into<String>,
        plan: ExecutionPlan,
    ) -> Self {
        let request = request.into();
        let mut shared = Map::new();
        shared.insert(USER_REQUEST_KEY.to_string(), Value::String(request.clone()));

        let state = RunState {
            shared,
            phases: plan.phases.clone(),
            ..RunState::default()
        };

        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            request,
            plan,
            state: RwLock::new(state),
            telemetry: TelemetryHub::default(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHub) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub(crate) fn telemetry(&self) -> &TelemetryHub {
        &self.telemetry
    }

    fn emit_all(&self, updates: Vec<TelemetryUpdate>) {
        for update in updates {
            self.telemetry.emit(update);
        }
    }

    fn worker_update(&self, state: &WorkerState) -> TelemetryUpdate {
        TelemetryUpdate::WorkerState {
            task_id: self.task_id.clone(),
            state: state.clone(),
        }
    }

    // --- Shared key/value store ---

    pub fn set_shared(&self, key: impl Into<String>, value: Value) {
        self.state.write().shared.insert(key.into(), value);
    }

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.state.read().shared.get(key).cloned()
    }

    pub fn has_shared(&self, key: &str) -> bool {
        self.state.read().shared.contains_key(key)
    }

    /// Point-in-time copy of the whole store.
    pub fn shared_snapshot(&self) -> Map<String, Value> {
        self.state.read().shared.clone()
    }

    /// Merge several entries atomically; later writes win.
    pub fn merge_shared(&self, entries: Map<String, Value>) {
        let mut state = self.state.write();
        for (key, value) in entries {
            state.shared.insert(key, value);
        }
    }

    // --- Phases ---

    pub fn current_phase(&self) -> Option<String> {
        self.state.read().current_phase.clone()
    }

    pub fn phase(&self, phase_id: &str) -> Option<Phase> {
        self.state.read().phases.iter().find(|p| p.id == phase_id).cloned()
    }

    /// Live copy of every phase, in plan order.
    pub fn phases(&self) -> Vec<Phase> {
        self.state.read().phases.clone()
    }

    /// Mark a phase `running`, make it current and log the handoff into it.
    pub fn begin_phase(&self, phase_id: &str) {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            let previous = state.current_phase.clone();
            let Some(phase) = state.phase_mut(phase_id) else {
                return;
            };
            phase.status = PhaseStatus::Running;
            phase.started_at = Some(Utc::now());
            let payload = json!({
                "mode": phase.mode,
                "workers": phase.worker_ids,
                "previous_phase": previous,
            });
            state.current_phase = Some(phase_id.to_string());
            let event = CommunicationEvent::new(EventType::Handoff, ORCHESTRATOR, phase_id)
                .with_payload(payload);
            state.push_event(&self.task_id, event, &mut updates);
        }
        info!(task_id = %self.task_id, phase = %phase_id, "Phase started");
        self.emit_all(updates);
    }

    /// Record the terminal status of a phase.
    pub fn finish_phase(&self, phase_id: &str, status: PhaseStatus) {
        {
            let mut state = self.state.write();
            let Some(phase) = state.phase_mut(phase_id) else {
                return;
            };
            phase.status = status;
            phase.ended_at = Some(Utc::now());
        }
        info!(task_id = %self.task_id, phase = %phase_id, status = ?status, "Phase finished");
    }

    // --- Workers ---

    /// Register the phase's workers.
    ///
    /// Parallel phases leave every worker `idle`. In sequential phases each
    /// worker after the first depends on, and is blocked by, its predecessor
    /// and starts out `waiting`.
    pub fn assign_workers(&self, phase: &Phase) {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            let mut previous: Option<String> = None;
            for worker_id in &phase.worker_ids {
                if state.worker_mut(worker_id).is_none() {
                    state.workers.push(WorkerState::new(&self.task_id, worker_id.clone()));
                }
                let Some(worker) = state.worker_mut(worker_id) else {
                    continue;
                };
                worker.phase_id = Some(phase.id.clone());
                worker.last_error = None;
                match (&phase.mode, &previous) {
                    (ExecutionMode::Sequential, Some(prev)) => {
                        worker.status = WorkerStatus::Waiting;
                        worker.dependencies = vec![prev.clone()];
                        worker.blocked_by = vec![prev.clone()];
                    }
                    _ => {
                        worker.status = WorkerStatus::Idle;
                        worker.dependencies.clear();
                        worker.blocked_by.clear();
                    }
                }
                updates.push(self.worker_update(worker));
                previous = Some(worker_id.clone());
            }
        }
        self.emit_all(updates);
    }

    /// Mark a worker `busy` and log the dispatch.
    ///
    /// Returns `false`, changing nothing, once the phase has been closed.
    pub fn mark_worker_busy(&self, phase_id: &str, worker_id: &str) -> bool {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            if state.is_closed(phase_id) {
                return false;
            }
            if state.worker_mut(worker_id).is_none() {
                state.workers.push(WorkerState::new(&self.task_id, worker_id));
            }
            if let Some(worker) = state.worker_mut(worker_id) {
                worker.status = WorkerStatus::Busy;
                worker.blocked_by.clear();
                worker.phase_id = Some(phase_id.to_string());
                updates.push(self.worker_update(worker));
            }
            if !state.dispatch_order.iter().any(|w| w == worker_id) {
                state.dispatch_order.push(worker_id.to_string());
            }
            let event = CommunicationEvent::new(EventType::Request, ORCHESTRATOR, worker_id)
                .with_payload(json!({ "phase": phase_id }));
            state.push_event(&self.task_id, event, &mut updates);
        }
        debug!(task_id = %self.task_id, phase = %phase_id, worker = %worker_id, "Worker busy");
        self.emit_all(updates);
        true
    }

    /// Mark a worker `completed`, store its output on the phase and merge its
    /// shared-state updates.
    ///
    /// Only a worker that is `busy` in `phase_id` can complete. Anything else,
    /// such as a result arriving after the phase timed out, is discarded and
    /// `false` is returned.
    pub fn complete_worker(
        &self,
        phase_id: &str,
        worker_id: &str,
        output: Value,
        state_updates: Map<String, Value>,
    ) -> bool {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            if !state.is_busy_in(phase_id, worker_id) {
                drop(state);
                debug!(task_id = %self.task_id, phase = %phase_id, worker = %worker_id, "Discarded late worker result");
                return false;
            }
            for (key, value) in state_updates {
                state.shared.insert(key, value);
            }
            if let Some(phase) = state.phase_mut(phase_id) {
                phase.outputs.insert(worker_id.to_string(), output.clone());
            }
            if let Some(worker) = state.worker_mut(worker_id) {
                worker.status = WorkerStatus::Completed;
                updates.push(self.worker_update(worker));
            }
            for worker in &mut state.workers {
                if worker.blocked_by.iter().any(|b| b == worker_id) {
                    worker.blocked_by.retain(|b| b != worker_id);
                    if worker.blocked_by.is_empty() && worker.status == WorkerStatus::Waiting {
                        worker.status = WorkerStatus::Idle;
                    }
                    updates.push(TelemetryUpdate::WorkerState {
                        task_id: self.task_id.clone(),
                        state: worker.clone(),
                    });
                }
            }
            let event = CommunicationEvent::new(EventType::Response, worker_id, ORCHESTRATOR)
                .with_payload(json!({ "phase": phase_id, "output": output }));
            state.push_event(&self.task_id, event, &mut updates);
        }
        self.emit_all(updates);
        true
    }

    /// Mark a worker `failed` and record the failure on its phase.
    ///
    /// Like [`complete_worker`](Self::complete_worker), applies only to a
    /// worker that is `busy` in `phase_id`.
    pub fn fail_worker(&self, phase_id: &str, worker_id: &str, reason: &str) -> bool {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            if !state.is_busy_in(phase_id, worker_id) {
                drop(state);
                debug!(task_id = %self.task_id, phase = %phase_id, worker = %worker_id, "Discarded late worker failure");
                return false;
            }
            state.fail(&self.task_id, phase_id, worker_id, reason, &mut updates);
        }
        self.emit_all(updates);
        true
    }

    /// Stop a phase from accepting work.
    ///
    /// Every worker still `busy` in the phase is failed with `reason`, later
    /// dispatches are refused and late results are discarded. Returns the
    /// workers that were failed.
    pub fn close_phase(&self, phase_id: &str, reason: &str) -> Vec<String> {
        let mut updates = Vec::new();
        let failed = {
            let mut state = self.state.write();
            if !state.is_closed(phase_id) {
                state.closed_phases.push(phase_id.to_string());
            }
            let busy: Vec<String> = state
                .workers
                .iter()
                .filter(|w| {
                    w.status == WorkerStatus::Busy && w.phase_id.as_deref() == Some(phase_id)
                })
                .map(|w| w.worker_id.clone())
                .collect();
            for worker_id in &busy {
                state.fail(&self.task_id, phase_id, worker_id, reason, &mut updates);
            }
            busy
        };
        debug!(task_id = %self.task_id, phase = %phase_id, failed = failed.len(), "Phase closed");
        self.emit_all(updates);
        failed
    }

    pub fn worker_state(&self, worker_id: &str) -> Option<WorkerState> {
        self.state
            .read()
            .workers
            .iter()
            .find(|w| w.worker_id == worker_id)
            .cloned()
    }

    /// Every worker state, in assignment order.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.state.read().workers.clone()
    }

    /// Workers that were dispatched and resolved, in first-dispatch order.
    pub fn workers_executed(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .dispatch_order
            .iter()
            .filter(|id| {
                state
                    .workers
                    .iter()
                    .any(|w| &w.worker_id == *id && w.was_attempted())
            })
            .cloned()
            .collect()
    }

    // --- Event log ---

    /// Append an event to the log.
    pub fn append_event(&self, event: CommunicationEvent) {
        let mut updates = Vec::new();
        self.state.write().push_event(&self.task_id, event, &mut updates);
        self.emit_all(updates);
    }

    pub fn events(&self) -> Vec<CommunicationEvent> {
        self.state.read().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    // --- Gates ---

    /// Record a gate outcome and log it as a validation event.
    pub fn record_gate_outcome(&self, outcome: GateOutcome) {
        let mut updates = Vec::new();
        {
            let mut state = self.state.write();
            let event = CommunicationEvent::new(EventType::Validation, outcome.gate_id.clone(), ORCHESTRATOR)
                .with_payload(json!({ "phase": outcome.phase_id, "passed": outcome.passed }));
            state.push_event(&self.task_id, event, &mut updates);
            state.gate_outcomes.push(outcome);
        }
        self.emit_all(updates);
    }

    pub fn gate_outcomes(&self) -> Vec<GateOutcome> {
        self.state.read().gate_outcomes.clone()
    }
}

/// Registry of live coordination contexts, keyed by task ID.
///
/// Owned by whoever composes the orchestrator; there is no global instance.
pub struct ContextStore {
    contexts: RwLock<HashMap<String, Arc<CoordinationContext>>>,
    builder: PlanBuilder,
    telemetry: TelemetryHub,
}

impl ContextStore {
    pub fn new(builder: PlanBuilder) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            builder,
            telemetry: TelemetryHub::default(),
        }
    }

    /// Telemetry hub attached to every context this store creates.
    pub fn with_telemetry(mut self, telemetry: TelemetryHub) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn builder(&self) -> &PlanBuilder {
        &self.builder
    }

    pub(crate) fn telemetry(&self) -> &TelemetryHub {
        &self.telemetry
    }

    /// Allocate a task ID, build the plan and register the new context.
    pub fn create(
        &self,
        session_id: &str,
        request: &str,
        tier: Tier,
    ) -> EnsembleResult<Arc<CoordinationContext>> {
        self.create_with_id(generate_task_id(), session_id, request, tier)
    }

    /// Like [`create`](Self::create) with a caller-allocated task ID.
    pub fn create_with_id(
        &self,
        task_id: String,
        session_id: &str,
        request: &str,
        tier: Tier,
    ) -> EnsembleResult<Arc<CoordinationContext>> {
        let plan = self.builder.build(request, tier);
        self.register(CoordinationContext::new(session_id, task_id, request, plan))
    }

    /// Register an externally built context.
    ///
    /// Fails with [`EnsembleError::DuplicateTask`] if the task ID is taken.
    pub fn register(&self, context: CoordinationContext) -> EnsembleResult<Arc<CoordinationContext>> {
        let context = if self.telemetry.is_empty() {
            context
        } else {
            context.with_telemetry(self.telemetry.clone())
        };
        let task_id = context.task_id().to_string();

        let mut contexts = self.contexts.write();
        if contexts.contains_key(&task_id) {
            return Err(EnsembleError::DuplicateTask(task_id));
        }
        let context = Arc::new(context);
        contexts.insert(task_id.clone(), Arc::clone(&context));
        info!(
            task_id = %task_id,
            session_id = %context.session_id(),
            plan = %context.plan().id,
            tier = %context.plan().tier,
            "Coordination context created"
        );
        Ok(context)
    }

    pub fn get(&self, task_id: &str) -> EnsembleResult<Arc<CoordinationContext>> {
        self.contexts
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| EnsembleError::ContextNotFound(task_id.to_string()))
    }

    /// Remove a context. Returns whether it was registered.
    pub fn destroy(&self, task_id: &str) -> bool {
        let removed = self.contexts.write().remove(task_id).is_some();
        if removed {
            info!(task_id = %task_id, "Coordination context destroyed");
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
