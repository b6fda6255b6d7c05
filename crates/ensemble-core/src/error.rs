use thiserror::Error;

/// A convenience `Result` alias using [`EnsembleError`].
pub type EnsembleResult<T> = Result<T, EnsembleError>;

/// Top-level error type for the Ensemble coordination engine.
///
/// Worker-level failures are normally recovered by the phase executor and
/// folded into the final report; gate failures, plan-build failures and
/// timeouts abort the run. The orchestrator converts all of them into a
/// failure report before returning.
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// The requested complexity tier is not one of the built-in tiers.
    #[error("Invalid tier '{0}': expected one of simple, moderate, complex, enterprise")]
    InvalidTier(String),

    /// One or more workers of a phase failed.
    #[error("Worker execution failed in phase '{phase_id}' ({}): {reason}", .failed_workers.join(", "))]
    WorkerExecution {
        /// Phase in which the failure happened.
        phase_id: String,
        /// Workers that failed, in dispatch order.
        failed_workers: Vec<String>,
        /// Reason reported by the first failing worker.
        reason: String,
    },

    /// A quality gate predicate returned `false`.
    #[error("Quality gate failed: {gate_id} ({description})")]
    QualityGateFailure {
        /// Identifier of the failing gate.
        gate_id: String,
        /// Human-readable description of the gate.
        description: String,
    },

    /// No live coordination context is registered under this task ID.
    #[error("Coordination context {0} not found")]
    ContextNotFound(String),

    /// A context is already registered under this task ID.
    #[error("Coordination context {0} already exists")]
    DuplicateTask(String),

    /// The plan's timeout budget ran out (only raised when enforcement is enabled).
    #[error("Phase '{phase_id}' exceeded the remaining timeout budget of {budget_ms}ms")]
    Timeout {
        /// Phase that was running when the budget ran out.
        phase_id: String,
        /// Budget that was available to the phase.
        budget_ms: u64,
    },

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
