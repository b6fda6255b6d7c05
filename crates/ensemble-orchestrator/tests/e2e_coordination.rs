//! End-to-end coordination tests.
//!
//! Drive the orchestrator with mock workers and check phase ordering,
//! parallel/sequential failure semantics, gate aborts, cleanup, timeout
//! enforcement and telemetry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use ensemble_core::{EnsembleResult, Tier};
use ensemble_orchestrator::context::generate_task_id;
use ensemble_orchestrator::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mock workers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Mode {
    Succeed,
    /// Responds with `success = false`.
    Fail,
    /// Returns an `Err`.
    Error,
    /// Sleeps for the given milliseconds, then succeeds.
    Sleep(u64),
}

struct MockWorker {
    id: String,
    mode: Mode,
    produces: Vec<String>,
    calls: AtomicUsize,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockWorker {
    fn new(id: &str, mode: Mode) -> Arc<Self> {
        Self::producing(id, mode, &[])
    }

    fn producing(id: &str, mode: Mode, keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            mode,
            produces: keys.iter().map(|k| (*k).to_string()).collect(),
            calls: AtomicUsize::new(0),
            log: None,
        })
    }

    fn logging(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            mode: Mode::Sleep(10),
            produces: Vec::new(),
            calls: AtomicUsize::new(0),
            log: Some(Arc::clone(log)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, request: WorkerRequest) -> EnsembleResult<WorkerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let phase = request.coordination.phase_id.clone();
        if let Some(log) = &self.log {
            log.lock().push(format!("start:{phase}:{}", self.id));
        }

        let response = match self.mode {
            Mode::Succeed => WorkerResponse::success(json!(format!("{} ok", self.id))),
            Mode::Fail => return Ok(WorkerResponse::failure(format!("{} failed", self.id))),
            Mode::Error => {
                return Err(ensemble_core::EnsembleError::Config(format!(
                    "{} misconfigured",
                    self.id
                )))
            }
            Mode::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                WorkerResponse::success(json!(format!("{} slept", self.id)))
            }
        };

        if let Some(log) = &self.log {
            log.lock().push(format!("end:{phase}:{}", self.id));
        }

        let mut response = response.with_state(format!("{}-seen", self.id), json!(true));
        for key in &self.produces {
            response = response.with_state(key.clone(), json!(format!("from {}", self.id)));
        }
        Ok(response)
    }
}

/// Generator that answers with the first line of the system prompt.
struct StubGenerator;

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> EnsembleResult<String> {
        assert!(prompt.starts_with("TASK:"));
        Ok(format!(
            "[{}] done",
            system_prompt.lines().next().unwrap_or_default()
        ))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registry(workers: &[Arc<MockWorker>]) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for worker in workers {
        registry.register(worker.clone());
    }
    registry
}

fn plan(phases: Vec<Phase>, gates: Vec<QualityGate>, timeout_ms: u64) -> ExecutionPlan {
    ExecutionPlan {
        id: "plan-e2e".to_string(),
        tier: Tier::Complex,
        phases,
        quality_gates: gates,
        timeout_ms,
    }
}

fn register(orchestrator: &Orchestrator, plan: ExecutionPlan) -> Arc<CoordinationContext> {
    orchestrator
        .store()
        .register(CoordinationContext::new(
            "session-e2e",
            generate_task_id(),
            "e2e request",
            plan,
        ))
        .unwrap()
}

fn single_phase(mode: ExecutionMode, workers: &[&str]) -> ExecutionPlan {
    plan(
        vec![Phase::new("only", "Only", "", mode).with_workers(workers.iter().copied())],
        Vec::new(),
        60_000,
    )
}

fn worker_status(report: &CoordinationReport, worker_id: &str) -> WorkerStatus {
    report
        .results()
        .unwrap()
        .worker_states
        .iter()
        .find(|w| w.worker_id == worker_id)
        .map(|w| w.status)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_default_profiles_pipeline() {
    let registry = WorkerRegistry::from_profiles(default_profiles(), Arc::new(StubGenerator));
    let orchestrator = Orchestrator::new(registry);

    let report = orchestrator
        .run(CoordinationRequest::new("session-1", "build a scalable web api"))
        .await;

    assert!(report.is_success(), "run failed: {:?}", report.error());
    let results = report.results().unwrap();
    let phases: Vec<&str> = results.phases.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(phases, vec!["analysis", "planning", "implementation", "validation"]);
    assert!(results
        .phases
        .iter()
        .all(|p| p.status == PhaseStatus::Completed));

    let implementation = &results.phases[2];
    assert_eq!(
        implementation.workers,
        vec![
            "full-stack-developer-agent",
            "front-end-developer-agent",
            "back-end-developer-agent"
        ]
    );
    assert_eq!(implementation.outputs.len(), 3);

    // enterprise: requirements gate after each phase, the other three after validation
    assert_eq!(results.gate_outcomes.len(), 7);
    assert!(results.gate_outcomes.iter().all(|g| g.passed));

    for key in [
        "user-request",
        "requirements",
        "success-criteria",
        "execution-strategy",
        "implementation-complete",
        "tests-passed",
        "security-validated",
        "performance-validated",
    ] {
        assert!(results.shared_state.contains_key(key), "missing {key}");
    }

    let CoordinationReport::Completed(completed) = &report else {
        panic!("expected a completed report");
    };
    assert_eq!(completed.workers_executed.len(), 8);
    let planning_order: Vec<&String> = completed
        .workers_executed
        .iter()
        .filter(|w| *w == "product-manager-agent" || *w == "full-stack-developer-agent")
        .collect();
    assert_eq!(
        planning_order,
        vec!["product-manager-agent", "full-stack-developer-agent"]
    );

    assert!(orchestrator.store().get(report.task_id()).is_err());
}

#[tokio::test]
async fn test_phases_never_overlap() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let workers = [
        MockWorker::logging("a", &log),
        MockWorker::logging("b", &log),
        MockWorker::logging("c", &log),
        MockWorker::logging("d", &log),
    ];
    let orchestrator = Orchestrator::new(registry(&workers));
    let ctx = register(
        &orchestrator,
        plan(
            vec![
                Phase::new("p1", "P1", "", ExecutionMode::Parallel).with_workers(["a", "b"]),
                Phase::new("p2", "P2", "", ExecutionMode::Sequential).with_workers(["c", "d"]),
                Phase::new("p3", "P3", "", ExecutionMode::Parallel).with_workers(["a", "d"]),
            ],
            Vec::new(),
            60_000,
        ),
    );

    let report = orchestrator.run_context(ctx).await;
    assert!(report.is_success());

    let log = log.lock().clone();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    let last_p1_end = position("end:p1:a").max(position("end:p1:b"));
    let first_p2_start = position("start:p2:c");
    assert!(last_p1_end < first_p2_start);
    // sequential: d starts only after c resolved
    assert!(position("end:p2:c") < position("start:p2:d"));
    assert!(position("end:p2:d") < position("start:p3:a").min(position("start:p3:d")));
}

#[tokio::test]
async fn test_parallel_phase_attempts_all_workers() {
    let a = MockWorker::new("a", Mode::Succeed);
    let b = MockWorker::new("b", Mode::Fail);
    let c = MockWorker::new("c", Mode::Succeed);
    let orchestrator = Orchestrator::new(registry(&[a.clone(), b.clone(), c.clone()]));
    let ctx = register(&orchestrator, single_phase(ExecutionMode::Parallel, &["a", "b", "c"]));

    let report = orchestrator.run_context(ctx).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_phase_id(), Some("only"));
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    assert_eq!(worker_status(&report, "a"), WorkerStatus::Completed);
    assert_eq!(worker_status(&report, "b"), WorkerStatus::Failed);
    assert_eq!(worker_status(&report, "c"), WorkerStatus::Completed);

    let phase = &report.results().unwrap().phases[0];
    assert_eq!(phase.status, PhaseStatus::Failed);
    assert_eq!(phase.failed_workers, vec!["b"]);
    assert_eq!(phase.outputs.len(), 2);
}

#[tokio::test]
async fn test_sequential_phase_short_circuits() {
    let a = MockWorker::new("a", Mode::Succeed);
    let b = MockWorker::new("b", Mode::Error);
    let c = MockWorker::new("c", Mode::Succeed);
    let orchestrator = Orchestrator::new(registry(&[a.clone(), b.clone(), c.clone()]));
    let ctx = register(&orchestrator, single_phase(ExecutionMode::Sequential, &["a", "b", "c"]));

    let report = orchestrator.run_context(ctx).await;

    assert!(!report.is_success());
    assert_eq!(c.calls(), 0);
    assert_eq!(worker_status(&report, "b"), WorkerStatus::Failed);
    assert_eq!(worker_status(&report, "c"), WorkerStatus::Waiting);
    assert!(report.error().unwrap().contains("b misconfigured"));
}

#[tokio::test]
async fn test_gate_failure_after_second_phase_aborts() {
    let workers: Vec<Arc<MockWorker>> = ["w1", "w2", "w3", "w4"]
        .iter()
        .map(|id| MockWorker::new(id, Mode::Succeed))
        .collect();
    let orchestrator = Orchestrator::new(registry(&workers));
    let gate = QualityGate::requiring_keys(
        "needs-design",
        "A design document must exist",
        &["Design documented"],
        &["design-doc"],
    )
    .armed_after("p2");
    let ctx = register(
        &orchestrator,
        plan(
            vec![
                Phase::new("p1", "P1", "", ExecutionMode::Parallel).with_workers(["w1"]),
                Phase::new("p2", "P2", "", ExecutionMode::Sequential).with_workers(["w2"]),
                Phase::new("p3", "P3", "", ExecutionMode::Parallel).with_workers(["w3"]),
                Phase::new("p4", "P4", "", ExecutionMode::Parallel).with_workers(["w4"]),
            ],
            vec![gate],
            60_000,
        ),
    );
    let task_id = ctx.task_id().to_string();

    let report = orchestrator.run_context(ctx).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_phase_id(), Some("p2"));
    assert!(report.error().unwrap().contains("needs-design"));

    let results = report.results().unwrap();
    let phases: Vec<&str> = results.phases.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(phases, vec!["p1", "p2"]);
    assert_eq!(results.phases[1].status, PhaseStatus::Failed);
    assert_eq!(
        results.gate_outcomes,
        vec![GateOutcome {
            gate_id: "needs-design".to_string(),
            phase_id: "p2".to_string(),
            passed: false,
        }]
    );
    assert_eq!(workers[2].calls(), 0);
    assert_eq!(workers[3].calls(), 0);
    assert!(orchestrator.store().get(&task_id).is_err());
}

#[tokio::test]
async fn test_gate_passes_on_present_key() {
    let writer = MockWorker::producing("writer", Mode::Succeed, &["design-doc"]);
    let orchestrator = Orchestrator::new(registry(&[writer]));
    let gate = QualityGate::requiring_keys("needs-design", "Design exists", &[], &["design-doc"]);
    let ctx = register(
        &orchestrator,
        plan(
            vec![Phase::new("p1", "P1", "", ExecutionMode::Sequential).with_workers(["writer"])],
            vec![gate],
            60_000,
        ),
    );

    let report = orchestrator.run_context(ctx).await;
    assert!(report.is_success());
    assert!(report.results().unwrap().gate_outcomes[0].passed);
}

#[tokio::test]
async fn test_context_destroyed_after_success_and_failure() {
    let ok = MockWorker::new("ok", Mode::Succeed);
    let bad = MockWorker::new("bad", Mode::Fail);
    let orchestrator = Orchestrator::new(registry(&[ok, bad]));

    let ctx = register(&orchestrator, single_phase(ExecutionMode::Parallel, &["ok"]));
    let success = orchestrator.run_context(ctx).await;
    assert!(success.is_success());

    let ctx = register(&orchestrator, single_phase(ExecutionMode::Parallel, &["bad"]));
    let failure = orchestrator.run_context(ctx).await;
    assert!(!failure.is_success());

    for report in [&success, &failure] {
        assert!(matches!(
            orchestrator.store().get(report.task_id()),
            Err(ensemble_core::EnsembleError::ContextNotFound(_))
        ));
    }
    assert_eq!(orchestrator.store().active_count(), 0);
}

#[tokio::test]
async fn test_two_worker_parallel_success() {
    let orchestrator = Orchestrator::new(registry(&[
        MockWorker::new("x", Mode::Succeed),
        MockWorker::new("y", Mode::Succeed),
    ]));
    let ctx = register(&orchestrator, single_phase(ExecutionMode::Parallel, &["x", "y"]));

    let report = orchestrator.run_context(ctx).await;

    assert!(report.is_success());
    let phase = &report.results().unwrap().phases[0];
    assert_eq!(phase.status, PhaseStatus::Completed);
    assert!(phase.failed_workers.is_empty());
    assert_eq!(worker_status(&report, "x"), WorkerStatus::Completed);
    assert_eq!(worker_status(&report, "y"), WorkerStatus::Completed);
}

#[tokio::test]
async fn test_invalid_tier_yields_failure_report() {
    let orchestrator = Orchestrator::new(WorkerRegistry::new());
    let report = orchestrator
        .run(CoordinationRequest::new("s", "build it").with_tier("galactic"))
        .await;

    assert!(!report.is_success());
    assert!(report.task_id().starts_with("task-"));
    assert!(report.failed_phase_id().is_none());
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["success"], json!(false));
    assert_eq!(value["partial_results"], Value::Null);
}

#[tokio::test]
async fn test_timeout_enforced_when_enabled() {
    let slow = MockWorker::new("slow", Mode::Sleep(5_000));
    let config = OrchestratorConfig {
        enforce_timeout: true,
        ..OrchestratorConfig::default()
    };
    let orchestrator =
        Orchestrator::with_config(registry(&[slow]), config, TelemetryHub::default());
    let mut short = single_phase(ExecutionMode::Parallel, &["slow"]);
    short.timeout_ms = 50;
    let ctx = register(&orchestrator, short);

    let report = orchestrator.run_context(ctx).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_phase_id(), Some("only"));
    assert!(report.error().unwrap().contains("timeout budget"));
    let state = report
        .results()
        .unwrap()
        .worker_states
        .iter()
        .find(|w| w.worker_id == "slow")
        .cloned()
        .unwrap();
    assert_eq!(state.status, WorkerStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_worker_cannot_complete_late() {
    /// Blocks its thread, so aborting the task cannot stop it mid-poll.
    struct Blocking;

    #[async_trait]
    impl Worker for Blocking {
        fn id(&self) -> &str {
            "blocking"
        }

        async fn execute(&self, _request: WorkerRequest) -> EnsembleResult<WorkerResponse> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(WorkerResponse::success(json!("too late")).with_state("late-key", json!(1)))
        }
    }

    let monitor = Arc::new(WorkerMonitor::new());
    let config = OrchestratorConfig {
        enforce_timeout: true,
        ..OrchestratorConfig::default()
    };
    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(Blocking));
    let orchestrator = Orchestrator::with_config(
        registry,
        config,
        TelemetryHub::new().with_sink(monitor.clone()),
    );
    let mut short = single_phase(ExecutionMode::Parallel, &["blocking"]);
    short.timeout_ms = 50;
    let ctx = register(&orchestrator, short);

    let report = orchestrator.run_context(Arc::clone(&ctx)).await;
    assert!(!report.is_success());
    assert!(report.error().unwrap().contains("timeout budget"));

    // Let the blocked worker finish and try to report.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = ctx.worker_state("blocking").unwrap();
    assert_eq!(state.status, WorkerStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("timed out"));
    assert!(!ctx.has_shared("late-key"));
    let phase = ctx.phase("only").unwrap();
    assert!(phase.outputs.is_empty());
    assert_eq!(phase.failed_workers, vec!["blocking"]);
    assert!(ctx
        .events()
        .iter()
        .all(|e| e.event_type != EventType::Response));

    let metrics = monitor.get("blocking").unwrap();
    assert_eq!((metrics.failures, metrics.completions), (1, 0));
}

#[tokio::test]
async fn test_timeout_inert_by_default() {
    let slow = MockWorker::new("slow", Mode::Sleep(50));
    let orchestrator = Orchestrator::new(registry(&[slow]));
    let mut short = single_phase(ExecutionMode::Sequential, &["slow"]);
    short.timeout_ms = 1;
    let ctx = register(&orchestrator, short);

    let report = orchestrator.run_context(ctx).await;
    assert!(report.is_success());
}

#[tokio::test]
async fn test_telemetry_reaches_monitor_and_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let monitor = Arc::new(WorkerMonitor::new());
    let hub = TelemetryHub::new()
        .with_sink(monitor.clone())
        .with_sink(Arc::new(JsonlTelemetry::new(path.clone())));
    let orchestrator = Orchestrator::with_config(
        registry(&[
            MockWorker::new("a", Mode::Succeed),
            MockWorker::new("b", Mode::Fail),
        ]),
        OrchestratorConfig::default(),
        hub.clone(),
    );

    let ctx = register(
        &orchestrator,
        plan(
            vec![
                Phase::new("p1", "P1", "", ExecutionMode::Parallel).with_workers(["a"]),
                Phase::new("p2", "P2", "", ExecutionMode::Parallel).with_workers(["b"]),
            ],
            Vec::new(),
            60_000,
        ),
    );
    let report = orchestrator.run_context(ctx).await;
    assert!(!report.is_success());

    assert_eq!(monitor.event_count(EventType::Handoff), 2);
    assert_eq!(monitor.event_count(EventType::Request), 2);
    assert_eq!(monitor.event_count(EventType::Response), 1);
    assert_eq!(monitor.event_count(EventType::Error), 1);
    let a = monitor.get("a").unwrap();
    assert_eq!((a.dispatches, a.completions), (1, 1));
    assert_eq!(monitor.get("b").unwrap().failures, 1);
    assert_eq!(monitor.aggregate_metrics().runs_failed, 1);

    hub.shutdown().await;
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines.iter().all(|l| l["task_id"] == json!(report.task_id())));
    assert_eq!(lines.last().unwrap()["kind"], json!("run_finished"));
}

#[tokio::test]
async fn test_initial_state_visible_to_workers() {
    struct Reader;

    #[async_trait]
    impl Worker for Reader {
        fn id(&self) -> &str {
            "researcher-agent"
        }

        async fn execute(&self, request: WorkerRequest) -> EnsembleResult<WorkerResponse> {
            let budget = request.coordination.shared_state.get("budget").cloned();
            let input = request.phase_inputs.get("user-request").cloned();
            if budget == Some(json!(42)) && input == Some(json!("fix a typo")) {
                Ok(WorkerResponse::success(json!("seen")))
            } else {
                Ok(WorkerResponse::failure("seed missing"))
            }
        }
    }

    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(Reader));
    let orchestrator = Orchestrator::new(registry);

    let report = orchestrator
        .run(CoordinationRequest::new("s", "fix a typo").with_state("budget", json!(42)))
        .await;

    // project-coordinator-agent is not registered, so analysis fails either way
    assert_eq!(report.failed_phase_id(), Some("analysis"));
    let results = report.results().unwrap();
    assert_eq!(results.shared_state["budget"], json!(42));
    assert_eq!(
        results.phases[0].failed_workers,
        vec!["project-coordinator-agent"]
    );
    assert_eq!(worker_status(&report, "researcher-agent"), WorkerStatus::Completed);
}

#[tokio::test]
async fn test_parallel_workers_share_state_safely() {
    let ids: Vec<String> = (0..16).map(|i| format!("w{i}")).collect();
    let workers: Vec<Arc<MockWorker>> = ids
        .iter()
        .map(|id| MockWorker::new(id, Mode::Sleep(5)))
        .collect();
    let orchestrator = Orchestrator::new(registry(&workers));
    let ctx = register(
        &orchestrator,
        plan(
            vec![Phase::new("fan", "Fan out", "", ExecutionMode::Parallel).with_workers(ids.clone())],
            Vec::new(),
            60_000,
        ),
    );

    let report = orchestrator.run_context(ctx).await;

    assert!(report.is_success());
    let shared = &report.results().unwrap().shared_state;
    for id in &ids {
        assert_eq!(shared[&format!("{id}-seen")], json!(true));
    }
}

#[tokio::test]
async fn test_concurrent_runs_share_one_store() {
    let registry = WorkerRegistry::from_profiles(default_profiles(), Arc::new(StubGenerator));
    let orchestrator = Arc::new(Orchestrator::new(registry));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .run(CoordinationRequest::new(format!("session-{i}"), "create a data report"))
                    .await
            })
        })
        .collect();

    let mut task_ids = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.is_success(), "run failed: {:?}", report.error());
        task_ids.push(report.task_id().to_string());
    }
    task_ids.sort();
    task_ids.dedup();
    assert_eq!(task_ids.len(), 8);
    assert_eq!(orchestrator.store().active_count(), 0);
}
