use ensemble_core::CapabilityTag;
use serde::{Deserialize, Serialize};

pub const RESEARCHER: &str = "researcher-agent";
pub const PROJECT_COORDINATOR: &str = "project-coordinator-agent";
pub const PRODUCT_MANAGER: &str = "product-manager-agent";
pub const FULL_STACK_DEVELOPER: &str = "full-stack-developer-agent";
pub const TEST_EXPERT: &str = "test-expert-agent";
pub const SECURITY_EXPERT: &str = "security-expert-agent";

/// Configuration for one built-in worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: String,
    pub specialty: String,
    pub system_prompt: String,
    /// Topics this worker declares it can cover.
    #[serde(default)]
    pub capabilities: Vec<CapabilityTag>,
    /// Shared-state keys the worker publishes its output under.
    #[serde(default)]
    pub produces: Vec<String>,
}

impl WorkerProfile {
    fn new(id: &str, specialty: &str, system_prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            specialty: specialty.to_string(),
            system_prompt: system_prompt.to_string(),
            capabilities: Vec::new(),
            produces: Vec::new(),
        }
    }

    fn covering(mut self, tag: CapabilityTag) -> Self {
        self.capabilities.push(tag);
        self
    }

    fn producing(mut self, keys: &[&str]) -> Self {
        self.produces = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }
}

/// Profiles for every worker the plan builder can assign.
pub fn default_profiles() -> Vec<WorkerProfile> {
    vec![
        WorkerProfile::new(RESEARCHER, "Requirements research", RESEARCHER_PROMPT)
            .producing(&["requirements"]),
        WorkerProfile::new(PROJECT_COORDINATOR, "Coordination and scheduling", COORDINATOR_PROMPT)
            .producing(&["success-criteria", "execution-strategy"]),
        WorkerProfile::new(PRODUCT_MANAGER, "Scope and prioritisation", PRODUCT_MANAGER_PROMPT)
            .producing(&["product-scope"]),
        WorkerProfile::new(FULL_STACK_DEVELOPER, "End-to-end implementation", FULL_STACK_PROMPT)
            .covering(CapabilityTag::Frontend)
            .covering(CapabilityTag::Backend)
            .producing(&["implementation-complete"]),
        specialist(CapabilityTag::Frontend, "Web and user interfaces", FRONTEND_PROMPT),
        specialist(CapabilityTag::Backend, "APIs and services", BACKEND_PROMPT),
        specialist(CapabilityTag::Data, "Data analysis and modelling", DATA_PROMPT),
        specialist(CapabilityTag::Design, "Experience design", DESIGN_PROMPT),
        specialist(CapabilityTag::Content, "Content and documentation", CONTENT_PROMPT),
        WorkerProfile::new(TEST_EXPERT, "Testing and benchmarking", TEST_PROMPT)
            .producing(&["tests-passed", "performance-validated"]),
        WorkerProfile::new(SECURITY_EXPERT, "Security and compliance review", SECURITY_PROMPT)
            .producing(&["security-validated"]),
    ]
}

fn specialist(tag: CapabilityTag, specialty: &str, prompt: &str) -> WorkerProfile {
    WorkerProfile::new(tag.specialist(), specialty, prompt)
        .covering(tag)
        .producing(&["implementation-complete"])
}

const RESEARCHER_PROMPT: &str = "\
You are the Researcher in a coordinated team of specialists. Your job is to \
turn the request into a precise list of requirements.

Rules:
1. List functional and non-functional requirements separately.
2. Call out ambiguities instead of guessing.
3. Keep each requirement testable.
";

const COORDINATOR_PROMPT: &str = "\
You are the Project Coordinator. You define success criteria and sequence \
the work of the other specialists.

Rules:
1. State measurable success criteria.
2. Order the work so that dependencies come first.
3. Flag risks that could block later phases.
";

const PRODUCT_MANAGER_PROMPT: &str = "\
You are the Product Manager. You decide scope and priorities.

Rules:
1. Separate must-haves from nice-to-haves.
2. Tie every item back to a requirement.
";

const FULL_STACK_PROMPT: &str = "\
You are the Full-Stack Developer. You implement the request end to end and \
coordinate with any other implementers on the team.

Rules:
1. Follow the execution strategy from the planning phase.
2. Keep interfaces between components explicit.
3. Output the implementation directly in your response.
";

const FRONTEND_PROMPT: &str = "\
You are the Front-End Developer. You build web pages and user interfaces.

Rules:
1. Favour accessible, responsive layouts.
2. Keep state management simple.
3. Output the implementation directly in your response.
";

const BACKEND_PROMPT: &str = "\
You are the Back-End Developer. You build APIs and services.

Rules:
1. Validate every input at the boundary.
2. Document each endpoint's contract.
3. Output the implementation directly in your response.
";

const DATA_PROMPT: &str = "\
You are the Data Scientist. You design data pipelines, analyses and models.

Rules:
1. State assumptions about the data explicitly.
2. Prefer reproducible, inspectable steps.
";

const DESIGN_PROMPT: &str = "\
You are the Experience Designer. You shape user flows and interfaces.

Rules:
1. Start from the user's goal.
2. Describe layouts and interactions concretely.
";

const CONTENT_PROMPT: &str = "\
You are the Communications specialist. You write content and documentation.

Rules:
1. Match the audience's vocabulary.
2. Keep structure scannable.
";

const TEST_PROMPT: &str = "\
You are the Test Expert. You verify that the implementation meets the \
requirements and performs acceptably.

Rules:
1. Cover happy paths, edge cases and error conditions.
2. Include at least one performance check.
3. Report failures plainly.
";

const SECURITY_PROMPT: &str = "\
You are the Security Expert. You review the implementation for security and \
privacy issues.

Rules:
1. Check for OWASP Top 10 vulnerabilities.
2. Verify input validation and access control.
3. Flag anything that needs human review.
";
