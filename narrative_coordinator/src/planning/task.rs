//! Coordination tasks and their results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::workers::{WorkerId, WorkerResponse};

/// Identifier of a task within one action's graph. Tasks are named, and the
/// name is the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a task's workers are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All workers at once, joined.
    Parallel,
    /// One worker at a time, each seeing the ones before it.
    Sequential,
    /// Like sequential; workers react to everything recorded so far.
    Reactive,
    /// Like parallel; succeeds only on a strict majority.
    Consensus,
}

impl ExecutionMode {
    /// Whether the task's workers run concurrently.
    pub fn is_concurrent(&self) -> bool {
        matches!(self, ExecutionMode::Parallel | ExecutionMode::Consensus)
    }
}

/// A unit of scheduled work. Immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationTask {
    pub id: TaskId,
    pub name: String,
    pub required_workers: Vec<WorkerId>,
    pub mode: ExecutionMode,
    pub depends_on: Vec<TaskId>,
    pub estimated_seconds: f64,
    /// Relative share of the run's progress bar.
    pub progress_weight: f64,
    /// Higher runs earlier.
    pub priority: i32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CoordinationTask {
    pub fn new(name: &str, mode: ExecutionMode) -> Self {
        Self {
            id: TaskId::from(name),
            name: name.to_string(),
            required_workers: Vec::new(),
            mode,
            depends_on: Vec::new(),
            estimated_seconds: 1.0,
            progress_weight: 1.0,
            priority: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.required_workers.push(worker);
        self
    }

    pub fn with_workers(mut self, workers: &[WorkerId]) -> Self {
        self.required_workers.extend_from_slice(workers);
        self
    }

    pub fn depends_on(mut self, task: &str) -> Self {
        self.depends_on.push(TaskId::from(task));
        self
    }

    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.estimated_seconds = seconds;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.progress_weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: CoordinationTask,
    /// One entry per worker call, in completion order.
    pub worker_responses: Vec<WorkerResponse>,
    pub success: bool,
    pub execution_seconds: f64,
    pub error: Option<TaskError>,
}

impl TaskResult {
    pub fn succeeded(
        task: CoordinationTask,
        worker_responses: Vec<WorkerResponse>,
        execution_seconds: f64,
    ) -> Self {
        Self {
            task,
            worker_responses,
            success: true,
            execution_seconds,
            error: None,
        }
    }

    pub fn failed(
        task: CoordinationTask,
        worker_responses: Vec<WorkerResponse>,
        execution_seconds: f64,
        error: TaskError,
    ) -> Self {
        Self {
            task,
            worker_responses,
            success: false,
            execution_seconds,
            error: Some(error),
        }
    }

    /// The task's error message, if it failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn successful_responses(&self) -> impl Iterator<Item = &WorkerResponse> {
        self.worker_responses.iter().filter(|r| r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = CoordinationTask::new("combat_narrative", ExecutionMode::Sequential)
            .with_worker(WorkerId::NarrativeWriter)
            .depends_on("combat_resolution")
            .with_priority(1);

        assert_eq!(task.id, TaskId::from("combat_narrative"));
        assert_eq!(task.depends_on, vec![TaskId::from("combat_resolution")]);
        assert_eq!(task.required_workers, vec![WorkerId::NarrativeWriter]);
        assert_eq!(task.priority, 1);
    }

    #[test]
    fn test_failed_result_message() {
        let task = CoordinationTask::new("npc_dialogue", ExecutionMode::Sequential);
        let result = TaskResult::failed(task, Vec::new(), 0.5, TaskError::AllWorkersFailed);

        assert!(!result.success);
        assert_eq!(result.error_message().as_deref(), Some("all workers failed"));
    }

    #[test]
    fn test_concurrent_modes() {
        assert!(ExecutionMode::Parallel.is_concurrent());
        assert!(ExecutionMode::Consensus.is_concurrent());
        assert!(!ExecutionMode::Sequential.is_concurrent());
        assert!(!ExecutionMode::Reactive.is_concurrent());
    }
}
