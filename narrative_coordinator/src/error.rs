//! Error types for the coordination engine.
//!
//! Failures are contained where they happen: a worker error becomes a failed
//! `WorkerResponse`, a task error a failed `TaskResult`, a cascade error a
//! logged and counted miss. Only [`CoordinatorError`] reaches the caller.

use std::time::Duration;

use game_rules::SessionId;
use thiserror::Error;

use crate::planning::TaskId;
use crate::workers::WorkerId;

/// Errors a worker may return from `process`.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("worker failed: {0}")]
    Failed(String),
    #[error("worker unavailable: {0}")]
    Unavailable(String),
    #[error("worker timed out after {0:?}")]
    Timeout(Duration),
    #[error("no worker registered for {0}")]
    NotRegistered(WorkerId),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Reasons a whole task failed.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("dependencies not resolved within {timeout:?}: {missing:?}")]
    DependencyTimeout {
        missing: Vec<TaskId>,
        timeout: Duration,
    },
    #[error("task exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("all workers failed")]
    AllWorkersFailed,
    #[error("no consensus: {succeeded} of {total} workers succeeded")]
    NoConsensus { succeeded: usize, total: usize },
    #[error("task requires no workers")]
    NoWorkers,
}

/// Errors raised while processing a cascaded event.
#[derive(Debug, Clone, Error)]
pub enum CascadeError {
    #[error("malformed {event_type} payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },
    #[error("event processing failed: {0}")]
    Processing(String),
}

/// Errors a progress sink may report. Never fatal to a run.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("no subscribers")]
    NoSubscribers,
    #[error("sink closed")]
    Closed,
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Errors returned to callers of the coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("session {0} is not initialized")]
    UnknownSession(SessionId),
    #[error("session {0} is already initialized")]
    SessionExists(SessionId),
    #[error("coordination run was cancelled")]
    Cancelled,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
