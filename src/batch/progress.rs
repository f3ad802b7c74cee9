//! Live progress accounting for a single run.
//!
//! A [`ProgressTracker`] is created per `run` invocation and updated after
//! every item completion; snapshots are pushed to a [`ProgressSink`] as
//! [`ProgressEvent`]s so the terminal (or a test) can follow along.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::item::RunResult;

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub estimated_seconds_remaining: u64,
}

/// Events emitted while a run advances.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A wave is about to be dispatched. `wave` is 1-based.
    WaveStarted { wave: usize, waves: usize, size: usize },
    /// One item finished, successfully or not.
    ItemCompleted {
        progress: RunProgress,
        result: RunResult,
    },
    /// Pause between two waves.
    Cooldown { delay: Duration },
    /// The run returned.
    Finished { progress: RunProgress, cancelled: bool },
}

/// Receives progress events.
pub trait ProgressSink {
    fn on_event(&self, event: &ProgressEvent);
}

/// Counters owned by one run.
pub(crate) struct ProgressTracker {
    started: Instant,
    progress: RunProgress,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            progress: RunProgress {
                total,
                processed: 0,
                succeeded: 0,
                failed: 0,
                estimated_seconds_remaining: 0,
            },
        }
    }

    /// Records one completion and returns the updated snapshot.
    pub fn record(&mut self, ok: bool) -> RunProgress {
        let p = &mut self.progress;
        p.processed += 1;
        if ok {
            p.succeeded += 1;
        } else {
            p.failed += 1;
        }
        p.estimated_seconds_remaining =
            estimate_remaining(self.started.elapsed(), p.processed, p.total);
        *p
    }

    pub fn snapshot(&self) -> RunProgress {
        self.progress
    }
}

/// Linear projection: average time per processed item times items left,
/// rounded up. Zero once everything is processed or no rate is known yet.
pub fn estimate_remaining(elapsed: Duration, processed: usize, total: usize) -> u64 {
    if processed == 0 || processed >= total {
        return 0;
    }
    let rate = elapsed.as_secs_f64() / processed as f64;
    if rate <= 0.0 {
        return 0;
    }
    (rate * (total - processed) as f64).ceil() as u64
}
