//! Progress reporting - live notifications about a coordination run.
//!
//! Notifications go to an injected [`ProgressSink`]. Delivery is
//! fire-and-forget: a sink error is logged at debug level and the run goes on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use game_rules::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::planning::CoordinationTask;
use crate::workers::WorkerId;

/// Percent reported once planning is done and scheduling starts.
pub const SCHEDULING_FLOOR: f64 = 10.0;
/// Share of the bar covered by task execution.
pub const SCHEDULING_SPAN: f64 = 80.0;

/// Linear progress from `floor` (nothing done) to 100 (all done).
pub fn calculate_progress(done: usize, total: usize, floor: f64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let fraction = done.min(total) as f64 / total as f64;
    floor + (100.0 - floor) * fraction
}

/// Seconds left if each remaining unit takes `avg_seconds`.
pub fn estimate_remaining(done: usize, total: usize, avg_seconds: f64) -> f64 {
    avg_seconds * total.saturating_sub(done) as f64
}

/// Percent for a run with `weighted_completion` in `0.0..=1.0`.
pub fn scheduling_percent(weighted_completion: f64) -> f64 {
    SCHEDULING_FLOOR + weighted_completion.clamp(0.0, 1.0) * SCHEDULING_SPAN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Progress,
    WorkerCallStarted,
    TaskStarted,
    Completed,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Progress => "progress",
            NotificationKind::WorkerCallStarted => "worker-call-started",
            NotificationKind::TaskStarted => "task-started",
            NotificationKind::Completed => "completed",
            NotificationKind::Error => "error",
        }
    }
}

/// One progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotification {
    pub kind: NotificationKind,
    pub session_id: SessionId,
    pub message: String,
    pub percent: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressNotification {
    pub fn new(kind: NotificationKind, session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            kind,
            session_id,
            message: message.into(),
            percent: None,
            eta_seconds: None,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_eta(mut self, seconds: f64) -> Self {
        self.eta_seconds = Some(seconds);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Receiver of progress notifications.
pub trait ProgressSink: Send + Sync {
    fn send(&self, notification: ProgressNotification) -> Result<(), SinkError>;
}

/// Fans notifications out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ProgressNotification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressNotification> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn send(&self, notification: ProgressNotification) -> Result<(), SinkError> {
        self.sender
            .send(notification)
            .map(|_| ())
            .map_err(|_| SinkError::NoSubscribers)
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn send(&self, n: ProgressNotification) -> Result<(), SinkError> {
        match n.kind {
            NotificationKind::Error => {
                warn!(session = %n.session_id, percent = ?n.percent, "{}", n.message)
            }
            NotificationKind::Completed => info!(session = %n.session_id, "{}", n.message),
            _ => debug!(
                session = %n.session_id,
                kind = n.kind.as_str(),
                percent = ?n.percent,
                eta = ?n.eta_seconds,
                "{}",
                n.message
            ),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn send(&self, _notification: ProgressNotification) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Emits the notifications of one session's run.
#[derive(Clone)]
pub struct ProgressReporter {
    session_id: SessionId,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(session_id: SessionId, sink: Arc<dyn ProgressSink>) -> Self {
        Self { session_id, sink }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn emit(&self, notification: ProgressNotification) {
        let kind = notification.kind;
        if let Err(err) = self.sink.send(notification) {
            debug!(
                session = %self.session_id,
                kind = kind.as_str(),
                error = %err,
                "progress notification dropped"
            );
        }
    }

    pub fn task_started(&self, task: &CoordinationTask, index: usize, total: usize) {
        self.emit(
            ProgressNotification::new(
                NotificationKind::TaskStarted,
                self.session_id,
                format!("Starting {}", task.name),
            )
            .with_details(serde_json::json!({
                "task": task.name,
                "index": index,
                "total": total,
                "workers": task.required_workers,
            })),
        );
    }

    pub fn worker_call_started(&self, worker: WorkerId, task_name: &str) {
        self.emit(
            ProgressNotification::new(
                NotificationKind::WorkerCallStarted,
                self.session_id,
                format!("{} is working on {}", worker, task_name),
            )
            .with_details(serde_json::json!({ "worker": worker, "task": task_name })),
        );
    }

    /// Report overall progress after `done` of `total` tasks.
    pub fn progress(&self, done: usize, total: usize, weighted_completion: f64, eta_seconds: f64) {
        self.emit(
            ProgressNotification::new(
                NotificationKind::Progress,
                self.session_id,
                format!("{}/{} tasks done", done, total),
            )
            .with_percent(scheduling_percent(weighted_completion))
            .with_eta(eta_seconds)
            .with_details(serde_json::json!({
                "tasks_done": done,
                "tasks_total": total,
                "task_percent": calculate_progress(done, total, 0.0),
            })),
        );
    }

    pub fn completed(&self, message: impl Into<String>) {
        self.emit(
            ProgressNotification::new(NotificationKind::Completed, self.session_id, message)
                .with_percent(100.0)
                .with_eta(0.0),
        );
    }

    pub fn error(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        let mut notification =
            ProgressNotification::new(NotificationKind::Error, self.session_id, message);
        notification.details = details;
        self.emit(notification);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Collects notifications for inspection.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) seen: parking_lot::Mutex<Vec<ProgressNotification>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn kinds(&self) -> Vec<NotificationKind> {
        self.seen.lock().iter().map(|n| n.kind).collect()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingSink {
    fn send(&self, notification: ProgressNotification) -> Result<(), SinkError> {
        self.seen.lock().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn send(&self, _notification: ProgressNotification) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[test]
    fn test_calculate_progress() {
        assert_eq!(calculate_progress(0, 4, 10.0), 10.0);
        assert_eq!(calculate_progress(2, 4, 10.0), 55.0);
        assert_eq!(calculate_progress(4, 4, 10.0), 100.0);
        assert_eq!(calculate_progress(9, 4, 10.0), 100.0);
        assert_eq!(calculate_progress(0, 0, 10.0), 100.0);
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(1, 4, 2.5), 7.5);
        assert_eq!(estimate_remaining(4, 4, 2.5), 0.0);
        assert_eq!(estimate_remaining(5, 4, 2.5), 0.0);
    }

    #[test]
    fn test_scheduling_percent() {
        assert_eq!(scheduling_percent(0.0), 10.0);
        assert_eq!(scheduling_percent(0.5), 50.0);
        assert_eq!(scheduling_percent(1.0), 90.0);
    }

    #[test]
    fn test_failing_sink_does_not_panic() {
        let reporter = ProgressReporter::new(SessionId::new(), Arc::new(FailingSink));
        reporter.completed("done");
        reporter.error("boom", None);
    }

    #[test]
    fn test_broadcast_sink_delivers() {
        let sink = BroadcastSink::new(8);
        let without_subscriber =
            ProgressNotification::new(NotificationKind::Progress, SessionId::new(), "x");
        assert!(matches!(sink.send(without_subscriber), Err(SinkError::NoSubscribers)));

        let mut rx = sink.subscribe();
        let reporter = ProgressReporter::new(SessionId::new(), Arc::new(sink));
        reporter.progress(1, 2, 0.5, 3.0);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, NotificationKind::Progress);
        assert_eq!(received.percent, Some(50.0));
        assert_eq!(received.eta_seconds, Some(3.0));
        assert_eq!(received.details.unwrap()["task_percent"], serde_json::json!(50.0));
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let value = serde_json::to_value(NotificationKind::WorkerCallStarted).unwrap();
        assert_eq!(value, serde_json::json!("worker-call-started"));
        assert_eq!(NotificationKind::WorkerCallStarted.as_str(), "worker-call-started");
    }
}
