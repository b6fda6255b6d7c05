use crate::context::CoordinationContext;
use crate::types::{ExecutionMode, Phase};
use crate::worker::{CoordinationEnvelope, WorkerRegistry, WorkerRequest, WorkerResponse};
use ensemble_core::{EnsembleError, EnsembleResult};
use futures_util::future::join_all;
use serde_json::Map;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

/// Runs the workers of one phase against a coordination context.
#[derive(Debug, Clone)]
pub struct PhaseExecutor {
    registry: Arc<WorkerRegistry>,
}

/// Aborts spawned workers that are still running when the phase future is
/// dropped (timeout or caller cancellation).
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl PhaseExecutor {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Execute every worker of `phase`.
    ///
    /// Parallel phases dispatch all workers concurrently and wait for every one
    /// of them, whatever the others do. Sequential phases dispatch in list
    /// order and stop at the first failure. Either way, any failed worker
    /// yields [`EnsembleError::WorkerExecution`].
    pub async fn execute(&self, ctx: &Arc<CoordinationContext>, phase: &Phase) -> EnsembleResult<()> {
        ctx.assign_workers(phase);

        info!(
            task_id = %ctx.task_id(),
            phase = %phase.id,
            mode = %phase.mode,
            workers = phase.worker_ids.len(),
            "Dispatching phase workers"
        );

        let first_error = match phase.mode {
            ExecutionMode::Parallel => self.run_parallel(ctx, phase).await,
            ExecutionMode::Sequential => self.run_sequential(ctx, phase).await,
        };

        let failed_workers = ctx
            .phase(&phase.id)
            .map(|p| p.failed_workers)
            .unwrap_or_default();

        match first_error {
            None if failed_workers.is_empty() => Ok(()),
            reason => Err(EnsembleError::WorkerExecution {
                phase_id: phase.id.clone(),
                failed_workers,
                reason: reason.unwrap_or_else(|| "worker failed".to_string()),
            }),
        }
    }

    async fn run_sequential(&self, ctx: &Arc<CoordinationContext>, phase: &Phase) -> Option<String> {
        for worker_id in &phase.worker_ids {
            if let Err(reason) =
                dispatch(self.registry.as_ref(), Arc::clone(ctx), phase, worker_id.clone()).await
            {
                return Some(reason);
            }
        }
        None
    }

    async fn run_parallel(&self, ctx: &Arc<CoordinationContext>, phase: &Phase) -> Option<String> {
        let mut handles = Vec::with_capacity(phase.worker_ids.len());
        for worker_id in &phase.worker_ids {
            let registry = Arc::clone(&self.registry);
            let ctx = Arc::clone(ctx);
            let phase = phase.clone();
            let id = worker_id.clone();
            handles.push(tokio::spawn(async move {
                dispatch(registry.as_ref(), ctx, &phase, id).await
            }));
        }
        let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        let results = join_all(handles).await;

        let mut first_error = None;
        for (worker_id, result) in phase.worker_ids.iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let reason = format!("worker task aborted: {join_err}");
                    ctx.fail_worker(&phase.id, worker_id, &reason);
                    Err(reason)
                }
            };
            if let Err(reason) = outcome {
                first_error.get_or_insert(reason);
            }
        }
        first_error
    }
}

/// Build the request a worker receives, snapshotting shared state now.
pub fn build_request(ctx: &CoordinationContext, phase: &Phase, worker_id: &str) -> WorkerRequest {
    let shared_state = ctx.shared_snapshot();
    let phase_inputs: Map<_, _> = phase
        .input_keys
        .iter()
        .filter_map(|key| shared_state.get(key).map(|v| (key.clone(), v.clone())))
        .collect();

    WorkerRequest {
        coordination: CoordinationEnvelope {
            task_id: ctx.task_id().to_string(),
            phase_id: phase.id.clone(),
            shared_state,
            channel_id: format!("{}-{}", ctx.task_id(), worker_id),
        },
        request_text: ctx.request().to_string(),
        phase_inputs,
        quality_criteria: ctx.plan().quality_criteria(),
    }
}

/// Run one worker and record its outcome on the context.
async fn dispatch(
    registry: &WorkerRegistry,
    ctx: Arc<CoordinationContext>,
    phase: &Phase,
    worker_id: String,
) -> Result<(), String> {
    if !ctx.mark_worker_busy(&phase.id, &worker_id) {
        return Err(format!("phase '{}' is closed", phase.id));
    }

    let Some(worker) = registry.get(&worker_id) else {
        let reason = format!("no worker registered as '{worker_id}'");
        warn!(task_id = %ctx.task_id(), phase = %phase.id, worker = %worker_id, "{reason}");
        ctx.fail_worker(&phase.id, &worker_id, &reason);
        return Err(reason);
    };

    let request = build_request(&ctx, phase, &worker_id);
    let outcome = match worker.execute(request).await {
        Ok(WorkerResponse {
            success: true,
            output,
            state_updates,
            ..
        }) => Ok((output, state_updates)),
        Ok(WorkerResponse { error, .. }) => {
            Err(error.unwrap_or_else(|| "worker reported failure".to_string()))
        }
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok((output, state_updates)) => {
            if !ctx.complete_worker(&phase.id, &worker_id, output, state_updates) {
                return Err(format!("result from '{worker_id}' arrived after the phase closed"));
            }
            info!(task_id = %ctx.task_id(), phase = %phase.id, worker = %worker_id, "Worker completed");
            Ok(())
        }
        Err(reason) => {
            warn!(
                task_id = %ctx.task_id(),
                phase = %phase.id,
                worker = %worker_id,
                error = %reason,
                "Worker failed"
            );
            ctx.fail_worker(&phase.id, &worker_id, &reason);
            Err(reason)
        }
    }
}
