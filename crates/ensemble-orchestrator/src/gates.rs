use crate::context::CoordinationContext;
use crate::types::ExecutionPlan;
use ensemble_core::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Predicate evaluated against the coordination context after a phase.
pub type GatePredicate = Arc<dyn Fn(&CoordinationContext) -> bool + Send + Sync>;

/// A post-phase check over shared state that must hold for the run to continue.
#[derive(Clone, Serialize)]
pub struct QualityGate {
    pub id: String,
    pub description: String,
    /// Human-readable criteria; documentation only, handed to workers for self-checks.
    pub criteria: Vec<String>,
    /// Phase after which the gate starts being evaluated. `None` means after every phase.
    pub armed_after: Option<String>,
    #[serde(skip)]
    predicate: GatePredicate,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("criteria", &self.criteria)
            .field("armed_after", &self.armed_after)
            .finish_non_exhaustive()
    }
}

impl QualityGate {
    pub fn new<F>(
        id: impl Into<String>,
        description: impl Into<String>,
        criteria: Vec<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&CoordinationContext) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            criteria,
            armed_after: None,
            predicate: Arc::new(predicate),
        }
    }

    /// A gate that passes once every key in `keys` is present in shared state.
    /// Values are not inspected.
    pub fn requiring_keys(
        id: impl Into<String>,
        description: impl Into<String>,
        criteria: &[&str],
        keys: &[&str],
    ) -> Self {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        Self::new(
            id,
            description,
            criteria.iter().map(|c| (*c).to_string()).collect(),
            move |ctx| keys.iter().all(|k| ctx.has_shared(k)),
        )
    }

    pub fn armed_after(mut self, phase_id: impl Into<String>) -> Self {
        self.armed_after = Some(phase_id.into());
        self
    }

    /// Evaluate the predicate.
    pub fn check(&self, ctx: &CoordinationContext) -> bool {
        (self.predicate)(ctx)
    }

    /// Whether the gate applies after `phase_id` has run.
    ///
    /// A gate whose arming phase is not part of the plan applies after every phase.
    pub fn is_armed(&self, plan: &ExecutionPlan, phase_id: &str) -> bool {
        let Some(arming) = &self.armed_after else {
            return true;
        };
        let position = |id: &str| plan.phases.iter().position(|p| p.id == id);
        match (position(arming), position(phase_id)) {
            (Some(armed_at), Some(current)) => current >= armed_at,
            _ => true,
        }
    }
}

/// Result of evaluating one gate after one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate_id: String,
    pub phase_id: String,
    pub passed: bool,
}

/// The fixed gate catalog, in evaluation order.
pub fn gate_catalog() -> Vec<QualityGate> {
    vec![
        QualityGate::requiring_keys(
            "requirements-validation",
            "Validate that requirements are properly understood",
            &[
                "Requirements documented",
                "Stakeholders identified",
                "Success criteria defined",
            ],
            &["requirements", "success-criteria"],
        )
        .armed_after("analysis"),
        QualityGate::requiring_keys(
            "implementation-quality",
            "Validate implementation quality and completeness",
            &[
                "Code quality standards met",
                "Test coverage adequate",
                "Documentation complete",
            ],
            &["implementation-complete", "tests-passed"],
        )
        .armed_after("validation"),
        QualityGate::requiring_keys(
            "security-compliance",
            "Validate security and compliance requirements",
            &[
                "Security scan passed",
                "Privacy requirements met",
                "Compliance verified",
            ],
            &["security-validated"],
        )
        .armed_after("validation"),
        QualityGate::requiring_keys(
            "performance-validation",
            "Validate performance and scalability requirements",
            &[
                "Performance benchmarks met",
                "Scalability tested",
                "Resource usage optimized",
            ],
            &["performance-validated"],
        )
        .armed_after("validation"),
    ]
}

/// The first `count` gates of the catalog.
pub fn catalog_gates(count: usize) -> Vec<QualityGate> {
    gate_catalog().into_iter().take(count).collect()
}

/// Evaluate every armed gate after `phase_id`, in plan order.
///
/// All armed gates are evaluated and recorded on the context, even after a
/// failure; the first failing gate is returned as
/// [`EnsembleError::QualityGateFailure`].
pub fn validate_gates(
    ctx: &CoordinationContext,
    phase_id: &str,
) -> EnsembleResult<Vec<GateOutcome>> {
    let plan = ctx.plan();
    let mut outcomes = Vec::new();
    let mut first_failure: Option<&QualityGate> = None;

    for gate in &plan.quality_gates {
        if !gate.is_armed(plan, phase_id) {
            continue;
        }
        let passed = gate.check(ctx);
        let outcome = GateOutcome {
            gate_id: gate.id.clone(),
            phase_id: phase_id.to_string(),
            passed,
        };
        ctx.record_gate_outcome(outcome.clone());
        outcomes.push(outcome);

        if passed {
            info!(task_id = %ctx.task_id(), phase = %phase_id, gate = %gate.id, "Quality gate passed");
        } else {
            warn!(task_id = %ctx.task_id(), phase = %phase_id, gate = %gate.id, "Quality gate failed");
            first_failure.get_or_insert(gate);
        }
    }

    match first_failure {
        Some(gate) => Err(EnsembleError::QualityGateFailure {
            gate_id: gate.id.clone(),
            description: gate.description.clone(),
        }),
        None => Ok(outcomes),
    }
}
