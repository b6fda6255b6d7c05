use crate::telemetry::{TelemetrySink, TelemetryUpdate};
use crate::types::{EventType, WorkerStatus};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Counters for one worker across every run the monitor has seen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerMetrics {
    pub dispatches: u64,
    pub completions: u64,
    pub failures: u64,
    pub last_status: Option<WorkerStatus>,
    pub last_task: Option<String>,
}

/// Totals over all workers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    pub dispatches: u64,
    pub completions: u64,
    pub failures: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    workers: BTreeMap<String, WorkerMetrics>,
    events: HashMap<EventType, u64>,
    runs_succeeded: u64,
    runs_failed: u64,
}

/// In-process telemetry sink that tracks worker activity.
///
/// Counts only; utilisation and forecasting are left to whatever consumes
/// the snapshot.
#[derive(Debug, Default)]
pub struct WorkerMonitor {
    state: RwLock<MonitorState>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for one worker, if it has been seen.
    pub fn get(&self, worker_id: &str) -> Option<WorkerMetrics> {
        self.state.read().workers.get(worker_id).cloned()
    }

    /// Metrics for every worker seen so far, sorted by worker ID.
    pub fn snapshot(&self) -> Vec<(String, WorkerMetrics)> {
        self.state
            .read()
            .workers
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }

    pub fn event_count(&self, event_type: EventType) -> u64 {
        self.state.read().events.get(&event_type).copied().unwrap_or(0)
    }

    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        let state = self.state.read();
        let mut total = AggregateMetrics {
            runs_succeeded: state.runs_succeeded,
            runs_failed: state.runs_failed,
            ..AggregateMetrics::default()
        };
        for metrics in state.workers.values() {
            total.dispatches += metrics.dispatches;
            total.completions += metrics.completions;
            total.failures += metrics.failures;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let workers: BTreeMap<String, WorkerMetrics> = self.snapshot().into_iter().collect();
        let events: BTreeMap<String, u64> = {
            let state = self.state.read();
            state
                .events
                .iter()
                .map(|(kind, count)| {
                    let name = serde_json::to_value(kind)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    (name, *count)
                })
                .collect()
        };
        serde_json::json!({
            "workers": workers,
            "events": events,
            "aggregate": self.aggregate_metrics(),
        })
    }
}

impl TelemetrySink for WorkerMonitor {
    fn publish(&self, update: &TelemetryUpdate) {
        let mut state = self.state.write();
        match update {
            TelemetryUpdate::WorkerState { task_id, state: worker } => {
                let metrics = state.workers.entry(worker.worker_id.clone()).or_default();
                match worker.status {
                    WorkerStatus::Busy => metrics.dispatches += 1,
                    WorkerStatus::Completed => metrics.completions += 1,
                    WorkerStatus::Failed => metrics.failures += 1,
                    WorkerStatus::Idle | WorkerStatus::Waiting => {}
                }
                metrics.last_status = Some(worker.status);
                metrics.last_task = Some(task_id.clone());
            }
            TelemetryUpdate::Event { event, .. } => {
                *state.events.entry(event.event_type).or_insert(0) += 1;
            }
            TelemetryUpdate::RunFinished { success, .. } => {
                if *success {
                    state.runs_succeeded += 1;
                } else {
                    state.runs_failed += 1;
                }
            }
        }
    }
}
