//! Per-run record of task results, with a completion signal for dependency waits.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::planning::{TaskId, TaskResult};
use crate::workers::WorkerResponse;

#[derive(Debug, Default)]
struct LedgerInner {
    /// Completion order.
    results: Vec<TaskResult>,
    index: HashMap<TaskId, usize>,
}

/// Results recorded so far in one coordination run.
///
/// Recording a result wakes every waiter, which then re-checks its own
/// dependency set.
#[derive(Debug, Default)]
pub struct ResultLedger {
    inner: Mutex<LedgerInner>,
    recorded: Notify,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: TaskResult) {
        {
            let mut inner = self.inner.lock();
            let position = inner.results.len();
            inner.index.insert(result.task.id.clone(), position);
            inner.results.push(result);
        }
        self.recorded.notify_waiters();
    }

    pub fn is_recorded(&self, id: &TaskId) -> bool {
        self.inner.lock().index.contains_key(id)
    }

    /// Dependencies without a recorded result.
    pub fn missing(&self, deps: &[TaskId]) -> Vec<TaskId> {
        let inner = self.inner.lock();
        deps.iter().filter(|d| !inner.index.contains_key(*d)).cloned().collect()
    }

    /// Wait until every dependency has a result, or fail once `timeout` passes.
    pub async fn wait_for(&self, deps: &[TaskId], timeout: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a result recorded in
            // between still wakes us.
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.missing(deps).is_empty() {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(TaskError::DependencyTimeout {
                    missing: self.missing(deps),
                    timeout,
                });
            }
        }
    }

    /// Every worker response recorded so far, in completion order.
    pub fn responses(&self) -> Vec<WorkerResponse> {
        self.inner
            .lock()
            .results
            .iter()
            .flat_map(|r| r.worker_responses.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_results(self) -> Vec<TaskResult> {
        self.inner.into_inner().results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::{CoordinationTask, ExecutionMode};
    use crate::workers::WorkerId;
    use std::sync::Arc;

    fn done(name: &str) -> TaskResult {
        TaskResult::succeeded(
            CoordinationTask::new(name, ExecutionMode::Sequential),
            vec![WorkerResponse::new(WorkerId::RulesAdjudicator).with_narrative(name)],
            0.1,
        )
    }

    #[tokio::test]
    async fn test_no_dependencies_returns_immediately() {
        let ledger = ResultLedger::new();
        assert!(ledger.wait_for(&[], Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_record() {
        let ledger = Arc::new(ResultLedger::new());
        let recorder = Arc::clone(&ledger);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            recorder.record(done("other"));
            tokio::time::sleep(Duration::from_secs(2)).await;
            recorder.record(done("check"));
        });
        let started = Instant::now();

        ledger
            .wait_for(&[TaskId::from("check")], Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let ledger = ResultLedger::new();
        ledger.record(done("a"));

        let err = ledger
            .wait_for(&[TaskId::from("a"), TaskId::from("b")], Duration::from_secs(30))
            .await
            .unwrap_err();

        match err {
            TaskError::DependencyTimeout { missing, timeout } => {
                assert_eq!(missing, vec![TaskId::from("b")]);
                assert_eq!(timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_responses_in_completion_order() {
        let ledger = ResultLedger::new();
        ledger.record(done("first"));
        ledger.record(done("second"));

        let texts: Vec<_> = ledger
            .responses()
            .iter()
            .filter_map(|r| r.narrative.clone())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(ledger.is_recorded(&TaskId::from("first")));
        assert_eq!(ledger.into_results().len(), 2);
    }
}
