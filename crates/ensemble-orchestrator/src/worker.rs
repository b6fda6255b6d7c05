use crate::profiles::WorkerProfile;
use async_trait::async_trait;
use ensemble_core::{CapabilityTag, EnsembleResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Coordination data handed to a worker alongside its task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEnvelope {
    pub task_id: String,
    pub phase_id: String,
    /// Snapshot of the shared store taken at dispatch time.
    pub shared_state: Map<String, Value>,
    pub channel_id: String,
}

/// Task payload for one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub coordination: CoordinationEnvelope,
    pub request_text: String,
    /// Values of the phase's declared input keys that exist in shared state.
    pub phase_inputs: Map<String, Value>,
    /// Criteria of every quality gate in the plan, for self-checks.
    pub quality_criteria: Vec<String>,
}

/// Result of one worker invocation.
///
/// `success = false` and an `Err` from [`Worker::execute`] are handled identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Entries to write into the shared store. Applied only on success.
    #[serde(default)]
    pub state_updates: Map<String, Value>,
}

impl WorkerResponse {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            state_updates: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            state_updates: Map::new(),
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_updates.insert(key.into(), value);
        self
    }
}

/// An independently invokable unit of execution.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Topics the worker covers. Empty for generalists and reviewers.
    fn capabilities(&self) -> &[CapabilityTag] {
        &[]
    }

    async fn execute(&self, request: WorkerRequest) -> EnsembleResult<WorkerResponse>;
}

/// Generative-text backend used by prompt-driven workers.
///
/// Retries and timeouts are the implementation's concern.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> EnsembleResult<String>;
}

/// Worker that runs a [`WorkerProfile`] through a [`TextGenerator`] and
/// publishes the generated text under each of the profile's produced keys.
pub struct PromptWorker {
    profile: WorkerProfile,
    generator: Arc<dyn TextGenerator>,
}

impl PromptWorker {
    pub fn new(profile: WorkerProfile, generator: Arc<dyn TextGenerator>) -> Self {
        Self { profile, generator }
    }

    pub fn profile(&self) -> &WorkerProfile {
        &self.profile
    }
}

/// Render the task prompt for a worker request.
pub fn render_prompt(specialty: &str, request: &WorkerRequest) -> String {
    let mut prompt = format!(
        "TASK:\n{}\n\nPHASE: {}\nROLE: {}\n",
        request.request_text, request.coordination.phase_id, specialty
    );

    if !request.phase_inputs.is_empty() {
        prompt.push_str("\nINPUTS:\n");
        for (key, value) in &request.phase_inputs {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            prompt.push_str(&format!("- {key}: {value}\n"));
        }
    }

    if !request.quality_criteria.is_empty() {
        prompt.push_str("\nQUALITY CRITERIA:\n");
        for criterion in &request.quality_criteria {
            prompt.push_str(&format!("- {criterion}\n"));
        }
    }
    prompt
}

#[async_trait]
impl Worker for PromptWorker {
    fn id(&self) -> &str {
        &self.profile.id
    }

    fn capabilities(&self) -> &[CapabilityTag] {
        &self.profile.capabilities
    }

    async fn execute(&self, request: WorkerRequest) -> EnsembleResult<WorkerResponse> {
        let prompt = render_prompt(&self.profile.specialty, &request);
        let text = self
            .generator
            .generate(&prompt, &self.profile.system_prompt)
            .await?;

        let mut response = WorkerResponse::success(Value::String(text.clone()));
        for key in &self.profile.produces {
            response = response.with_state(key.clone(), Value::String(text.clone()));
        }
        Ok(response)
    }
}

/// Lookup table from worker ID to worker.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`PromptWorker`] per profile, sharing a generator.
    pub fn from_profiles(profiles: Vec<WorkerProfile>, generator: Arc<dyn TextGenerator>) -> Self {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(Arc::new(PromptWorker::new(profile, Arc::clone(&generator))));
        }
        registry
    }

    /// Register a worker under its own ID, replacing any previous one.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.id().to_string(), worker);
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(worker_id).cloned()
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains_key(worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Registered IDs, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.ids())
            .finish()
    }
}
