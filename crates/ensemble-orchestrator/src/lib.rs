//! Coordination engine that runs a pool of workers through a phased plan.
//!
//! A request is classified into a complexity tier, turned into a four-phase
//! execution plan (analysis, planning, implementation, validation), and run
//! one phase at a time. Parallel phases attempt every worker; sequential
//! phases stop at the first failure. Quality gates are checked after each
//! completed phase, and the outcome is folded into a single report.
//!
//! # Main types
//!
//! - [`Orchestrator`]: entry point; runs a request and returns a [`CoordinationReport`].
//! - [`PlanBuilder`]: deterministic plan construction from request text and tier.
//! - [`ContextStore`]: explicit registry of live [`CoordinationContext`]s.
//! - [`PhaseExecutor`]: dispatches the workers of one phase.
//! - [`Worker`]: contract every worker implements; see also [`PromptWorker`].
//! - [`WorkerMonitor`]: telemetry sink with per-worker counters.

/// Result aggregation and report types.
pub mod aggregator;
/// Request classification into tiers and capability tags.
pub mod classifier;
/// Orchestrator configuration.
pub mod config;
/// Per-run coordination context and the context store.
pub mod context;
/// Top-level coordination engine.
pub mod engine;
/// Phase execution.
pub mod executor;
/// Quality gate catalog and validation.
pub mod gates;
/// Worker activity monitor.
pub mod monitor;
/// Execution plan construction.
pub mod plan;
/// Built-in worker profiles.
pub mod profiles;
/// Telemetry hook.
pub mod telemetry;
/// Plan, phase, worker-state and event types.
pub mod types;
/// Worker contract and registry.
pub mod worker;

pub use aggregator::{CoordinationReport, PhaseSummary, RunResults};
pub use classifier::{Classification, Classifier, KeywordClassifier};
pub use config::{OrchestratorConfig, TelemetryConfig};
pub use context::{ContextStore, CoordinationContext};
pub use engine::{CoordinationRequest, Orchestrator, RunStatus};
pub use executor::PhaseExecutor;
pub use gates::{GateOutcome, QualityGate};
pub use monitor::WorkerMonitor;
pub use plan::PlanBuilder;
pub use profiles::{default_profiles, WorkerProfile};
pub use telemetry::{JsonlTelemetry, TelemetryHub, TelemetrySink, TelemetryUpdate};
pub use types::{
    CommunicationEvent, EventType, ExecutionMode, ExecutionPlan, Phase, PhaseStatus, WorkerState,
    WorkerStatus,
};
pub use worker::{
    PromptWorker, TextGenerator, Worker, WorkerRegistry, WorkerRequest, WorkerResponse,
};
