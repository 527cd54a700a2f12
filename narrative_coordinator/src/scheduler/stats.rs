//! Sliding-window worker timings used for averages and ETAs.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::workers::WorkerId;

/// Timing summary for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStat {
    pub worker_id: WorkerId,
    pub samples: usize,
    pub average_seconds: f64,
    pub last_seconds: f64,
}

/// The last `window` call durations per worker.
#[derive(Debug)]
pub struct WorkerTimings {
    window: usize,
    samples: Mutex<HashMap<WorkerId, VecDeque<f64>>>,
}

impl WorkerTimings {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, worker: WorkerId, seconds: f64) {
        let mut samples = self.samples.lock();
        let window = samples.entry(worker).or_default();
        if window.len() == self.window {
            window.pop_front();
        }
        window.push_back(seconds);
    }

    pub fn average(&self, worker: WorkerId) -> Option<f64> {
        self.samples.lock().get(&worker).and_then(|w| mean(w.iter()))
    }

    /// Mean over every retained sample of every worker.
    pub fn overall_average(&self) -> Option<f64> {
        mean(self.samples.lock().values().flatten())
    }

    /// One entry per worker with samples, ordered by worker id.
    pub fn snapshot(&self) -> Vec<WorkerStat> {
        let samples = self.samples.lock();
        let mut stats: Vec<_> = samples
            .iter()
            .filter_map(|(worker, window)| {
                Some(WorkerStat {
                    worker_id: *worker,
                    samples: window.len(),
                    average_seconds: mean(window.iter())?,
                    last_seconds: *window.back()?,
                })
            })
            .collect();
        stats.sort_by_key(|s| s.worker_id);
        stats
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
