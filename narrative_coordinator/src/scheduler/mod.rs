//! Scheduler - runs a task plan against the registered workers.
//!
//! Tasks run one at a time in plan order. Inside a task, parallel and
//! consensus modes fan out to every required worker and join; sequential and
//! reactive modes call workers in declared order. Each call goes through the
//! response cache first.
//!
//! Failures stay where they happen: a worker error becomes a failed
//! `WorkerResponse`, a dependency timeout or missed deadline becomes a failed
//! `TaskResult`, and the run moves on to the next task. Only cancellation
//! ends a run early.

mod ledger;
mod stats;

pub use ledger::*;
pub use stats::*;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use game_rules::{ActionKind, GameEvent, PlayerAction, SharedSessionState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::ResponseCache;
use crate::cascade::{CascadeReport, EventCascade};
use crate::config::SchedulerConfig;
use crate::context_assembler::{ContextAssembler, SharedContextView, WorkerContext};
use crate::error::{CoordinatorError, TaskError, WorkerError};
use crate::planning::{CoordinationTask, ExecutionMode, TaskPlan, TaskResult};
use crate::progress::{estimate_remaining, ProgressReporter};
use crate::workers::{Worker, WorkerId, WorkerRegistry, WorkerResponse};

/// Everything a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Completion order.
    pub results: Vec<TaskResult>,
    /// Events produced by the cascade across all tasks.
    pub cascade: CascadeReport,
}

impl RunOutcome {
    pub fn cascade_events(&self) -> &[GameEvent] {
        &self.cascade.events
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Executes task plans. Shared by every session.
pub struct Scheduler {
    registry: WorkerRegistry,
    cache: Arc<ResponseCache>,
    assembler: ContextAssembler,
    config: SchedulerConfig,
    timings: WorkerTimings,
}

impl Scheduler {
    pub fn new(
        registry: WorkerRegistry,
        cache: Arc<ResponseCache>,
        config: SchedulerConfig,
    ) -> Self {
        let timings = WorkerTimings::new(config.stats_window);
        Self {
            registry,
            cache,
            assembler: ContextAssembler::with_defaults(),
            config,
            timings,
        }
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn worker_stats(&self) -> Vec<WorkerStat> {
        self.timings.snapshot()
    }

    /// Run every task of `plan`, integrating each task's output into `state`
    /// before the next one starts.
    pub async fn run(
        &self,
        plan: &TaskPlan,
        action: &PlayerAction,
        state: &mut SharedSessionState,
        cascade: &EventCascade,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, CoordinatorError> {
        let ledger = ResultLedger::new();
        let mut report = CascadeReport::default();
        let total = plan.tasks.len();
        let total_weight: f64 = plan.tasks.iter().map(|t| t.progress_weight.max(0.0)).sum();
        let mut done_weight = 0.0;

        for (index, task) in plan.tasks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CoordinatorError::Cancelled);
            }

            let dependencies = ledger.wait_for(&task.depends_on, self.config.dependency_timeout());
            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                waited = dependencies => waited,
            };

            let result = match waited {
                Err(err) => {
                    warn!(task = %task.id, error = %err, "dependencies not met, task skipped");
                    TaskResult::failed(task.clone(), Vec::new(), 0.0, err)
                }
                Ok(()) => {
                    progress.task_started(task, index, total);
                    let view = self.assembler.shared_view(state);
                    let prior = ledger.responses();
                    let execution =
                        self.execute_task(task, action, plan.action_kind, &view, prior, progress);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                        result = execution => result,
                    }
                }
            };

            if let Some(err) = &result.error {
                progress.error(
                    format!("{} failed: {}", task.name, err),
                    Some(serde_json::json!({ "task": task.name })),
                );
            }

            report.absorb(cascade.integrate(&result.worker_responses, state));
            ledger.record(result);

            let done = index + 1;
            done_weight += task.progress_weight.max(0.0);
            let weighted = if total_weight > 0.0 {
                done_weight / total_weight
            } else {
                done as f64 / total as f64
            };
            let avg = self.timings.overall_average().unwrap_or(task.estimated_seconds);
            progress.progress(done, total, weighted, estimate_remaining(done, total, avg));
        }

        Ok(RunOutcome {
            results: ledger.into_results(),
            cascade: report,
        })
    }

    /// Run one task within its deadline.
    pub async fn execute_task(
        &self,
        task: &CoordinationTask,
        action: &PlayerAction,
        action_kind: ActionKind,
        view: &SharedContextView,
        prior: Vec<WorkerResponse>,
        progress: &ProgressReporter,
    ) -> TaskResult {
        let started = Instant::now();
        if task.required_workers.is_empty() {
            return TaskResult::failed(task.clone(), Vec::new(), 0.0, TaskError::NoWorkers);
        }

        let deadline = self.config.task_deadline();
        let calls = async {
            if task.mode.is_concurrent() {
                let context = self.assembler.assemble(&task.name, action, action_kind, view, prior);
                let calls = task
                    .required_workers
                    .iter()
                    .map(|&worker| self.call_worker(worker, &context, progress));
                join_all(calls).await
            } else {
                let mut responses = Vec::with_capacity(task.required_workers.len());
                for &worker in &task.required_workers {
                    let mut seen = prior.clone();
                    seen.extend(responses.iter().cloned());
                    let context =
                        self.assembler.assemble(&task.name, action, action_kind, view, seen);
                    responses.push(self.call_worker(worker, &context, progress).await);
                }
                responses
            }
        };

        let outcome = tokio::time::timeout(deadline, calls).await;
        let elapsed = started.elapsed().as_secs_f64();

        let responses = match outcome {
            Ok(responses) => responses,
            Err(_) => {
                warn!(task = %task.id, deadline = ?deadline, "task deadline exceeded");
                let err = TaskError::DeadlineExceeded(deadline);
                return TaskResult::failed(task.clone(), Vec::new(), elapsed, err);
            }
        };

        let total = responses.len();
        let succeeded = responses.iter().filter(|r| r.success).count();
        let verdict = match task.mode {
            ExecutionMode::Consensus if succeeded * 2 <= total => {
                Err(TaskError::NoConsensus { succeeded, total })
            }
            _ if succeeded == 0 => Err(TaskError::AllWorkersFailed),
            _ => Ok(()),
        };

        debug!(task = %task.id, succeeded, total, elapsed, "task finished");
        match verdict {
            Ok(()) => TaskResult::succeeded(task.clone(), responses, elapsed),
            Err(err) => TaskResult::failed(task.clone(), responses, elapsed, err),
        }
    }

    /// Cache first, then the worker itself.
    async fn call_worker(
        &self,
        worker: WorkerId,
        context: &WorkerContext,
        progress: &ProgressReporter,
    ) -> WorkerResponse {
        progress.worker_call_started(worker, &context.task_name);

        let Some(handle) = self.registry.get(worker) else {
            warn!(worker = %worker, "no worker registered");
            return WorkerResponse::failed(worker, &WorkerError::NotRegistered(worker));
        };

        self.cache
            .get_or_compute(worker, context, self.cache.default_ttl(), || {
                self.invoke(&handle, context)
            })
            .await
    }

    /// Call the worker, turning errors and panics into failed responses.
    async fn invoke(&self, worker: &Arc<dyn Worker>, context: &WorkerContext) -> WorkerResponse {
        let id = worker.id();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(worker.process(context)).catch_unwind().await;
        let elapsed = started.elapsed().as_secs_f64();
        self.timings.record(id, elapsed);

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(worker = %id, task = %context.task_name, error = %err, "worker failed");
                WorkerResponse::failed(id, &err)
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(
                    worker = %id,
                    task = %context.task_name,
                    panic = %message,
                    "worker panicked"
                );
                WorkerResponse::failed(id, &WorkerError::Panicked(message))
            }
        };
        response.worker_id = id;
        response.processing_seconds = elapsed;
        response
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
