use crate::classifier::{Classifier, KeywordClassifier};
use crate::gates::catalog_gates;
use crate::profiles::{
    FULL_STACK_DEVELOPER, PRODUCT_MANAGER, PROJECT_COORDINATOR, RESEARCHER, SECURITY_EXPERT,
    TEST_EXPERT,
};
use crate::types::{ExecutionMode, ExecutionPlan, Phase};
use ensemble_core::{CapabilityTag, EnsembleResult, Tier};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Default per-phase share of the plan's timeout budget.
pub const DEFAULT_PHASE_BUDGET_MS: u64 = 30_000;

/// Workers reserved for the three fixed phases; the remainder of a tier's
/// `max_workers` goes to implementation.
const RESERVED_WORKERS: usize = 4;

/// Builds execution plans. Pure: identical inputs yield identical phase and
/// worker structures.
#[derive(Clone)]
pub struct PlanBuilder {
    classifier: Arc<dyn Classifier>,
    phase_budget_ms: u64,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new(Arc::new(KeywordClassifier))
    }
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("phase_budget_ms", &self.phase_budget_ms)
            .finish_non_exhaustive()
    }
}

impl PlanBuilder {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            phase_budget_ms: DEFAULT_PHASE_BUDGET_MS,
        }
    }

    pub fn with_phase_budget_ms(mut self, budget_ms: u64) -> Self {
        self.phase_budget_ms = budget_ms;
        self
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    /// Build the four-phase plan for `request` at `tier`.
    pub fn build(&self, request: &str, tier: Tier) -> ExecutionPlan {
        let params = tier.params();
        let tags = self.classifier.tags(request);
        let implementers = select_implementation_workers(&tags, params.max_workers);

        let implementation_mode = if params.parallel_allowed {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };

        let phases = vec![
            Phase::new(
                "analysis",
                "Task Analysis",
                "Analyze the request and determine requirements",
                ExecutionMode::Parallel,
            )
            .with_workers([RESEARCHER, PROJECT_COORDINATOR])
            .with_inputs(["user-request"])
            .with_outputs(["requirements", "success-criteria"]),
            Phase::new(
                "planning",
                "Strategic Planning",
                "Create a detailed execution strategy and resource allocation",
                ExecutionMode::Sequential,
            )
            .with_workers([PROJECT_COORDINATOR, PRODUCT_MANAGER])
            .with_inputs(["requirements", "success-criteria"])
            .with_outputs(["execution-strategy"]),
            Phase::new(
                "implementation",
                "Core Implementation",
                "Execute the primary task requirements",
                implementation_mode,
            )
            .with_workers(implementers)
            .with_inputs(["requirements", "execution-strategy"])
            .with_outputs(["implementation-complete"]),
            Phase::new(
                "validation",
                "Quality Validation",
                "Validate outputs and ensure quality standards",
                ExecutionMode::Parallel,
            )
            .with_workers([TEST_EXPERT, SECURITY_EXPERT])
            .with_inputs(["implementation-complete"])
            .with_outputs(["tests-passed", "security-validated", "performance-validated"]),
        ];

        let plan = ExecutionPlan {
            id: format!("plan-{}", Uuid::new_v4()),
            tier,
            phases,
            quality_gates: catalog_gates(params.quality_gate_count),
            timeout_ms: params.max_phases as u64 * self.phase_budget_ms,
        };

        debug!(
            plan = %plan.id,
            tier = %tier,
            tags = ?tags,
            gates = plan.quality_gates.len(),
            "Execution plan built"
        );
        plan
    }

    /// Like [`build`](Self::build), parsing the tier name first.
    ///
    /// Fails with [`ensemble_core::EnsembleError::InvalidTier`] for unknown names.
    pub fn build_for_tier_name(&self, request: &str, tier: &str) -> EnsembleResult<ExecutionPlan> {
        let tier: Tier = tier.parse()?;
        Ok(self.build(request, tier))
    }
}

/// Pick the implementation workers for the matched capability tags.
///
/// Specialists follow tag order. The generalist is prepended when no tag or
/// more than one tag matched. The result never exceeds
/// `max(max_workers - 4, 1)` entries and is never empty.
pub fn select_implementation_workers(tags: &[CapabilityTag], max_workers: usize) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for tag in tags {
        let id = tag.specialist().to_string();
        if !selected.contains(&id) {
            selected.push(id);
        }
    }

    if selected.len() != 1 {
        selected.insert(0, FULL_STACK_DEVELOPER.to_string());
    }

    selected.truncate(max_workers.saturating_sub(RESERVED_WORKERS).max(1));
    selected
}
