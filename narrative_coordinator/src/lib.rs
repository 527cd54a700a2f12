//! # Narrative Coordinator (The Cortex)
//!
//! Turns one player action into one coherent game response by planning a small
//! graph of tasks, running specialised reasoning workers against a shared
//! context, folding each task's output back into the session through an event
//! cascade, and merging everything into a single [`FinalResponse`].
//!
//! ## Core Components
//!
//! - **planning**: Classifies the action and builds an ordered task plan
//! - **scheduler**: Runs tasks in order, workers in parallel or in sequence
//! - **context_assembler**: Builds the context every worker sees, and its fingerprint
//! - **cache**: Shared TTL response cache keyed by worker and fingerprint
//! - **cascade**: Derives events from worker output and applies them, depth-bounded
//! - **merger**: Folds every task result into the final response
//! - **progress**: Progress notifications for the client
//! - **coordinator**: Session registry and the `process_action` entry point
//!
//! ## Design Philosophy
//!
//! - **Contained failure**: A failing or panicking worker degrades the answer, never the run
//! - **Serialized sessions**: One action at a time per session, sessions independent of each other
//! - **Workers are opaque**: Anything implementing [`Worker`] can be scheduled

pub mod cache;
pub mod cascade;
pub mod config;
pub mod context_assembler;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod merger;
pub mod planning;
pub mod progress;
pub mod scheduler;
pub mod workers;

pub use cache::{CacheStats, ResponseCache};
pub use cascade::{CascadeReport, EventCascade, EventProcessor, WorldEventProcessor};
pub use config::CoordinatorConfig;
pub use context_assembler::{ContextAssembler, ContextFingerprint, WorkerContext};
pub use coordinator::Coordinator;
pub use error::{
    CascadeError, ConfigError, CoordinatorError, Result, SinkError, TaskError, WorkerError,
};
pub use logging::init_logging;
pub use merger::FinalResponse;
pub use planning::{CoordinationTask, ExecutionMode, TaskGraphBuilder, TaskPlan, TaskResult};
pub use progress::{BroadcastSink, NotificationKind, ProgressNotification, ProgressSink};
pub use scheduler::Scheduler;
pub use workers::{Choice, Worker, WorkerId, WorkerRegistry, WorkerResponse};
