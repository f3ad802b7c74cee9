use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::sleep;

use super::item::{CredentialPool, ItemStatus, Outcome, RunResult, RunSummary, WorkItem};
use super::progress::{ProgressEvent, ProgressSink, ProgressTracker};
use crate::analysis::Analyzer;
use crate::error::BatchError;
use crate::workflow::BatchProfile;

/// Wave size and cooldown. Both values are explicit; there are no defaults here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchConfig {
    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::Config("batch_size must be at least 1".into()));
        }
        Ok(Self {
            batch_size,
            inter_batch_delay,
        })
    }

    pub fn from_profile(profile: &BatchProfile) -> Result<Self, BatchError> {
        Self::new(profile.batch_size, profile.inter_batch_delay())
    }
}

/// Which items a run processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every item, whatever its status.
    All,
    /// Only items whose last attempt failed.
    RetryFailed,
}

impl RunMode {
    fn includes(self, item: &WorkItem) -> bool {
        match self {
            RunMode::All => true,
            RunMode::RetryFailed => item.status == ItemStatus::Failed,
        }
    }
}

/// Checks a run's preconditions without touching any item and returns the
/// number of items the run would process.
pub fn preflight(
    items: &[WorkItem],
    credentials: &CredentialPool,
    mode: RunMode,
) -> Result<usize, BatchError> {
    if credentials.is_empty() {
        return Err(BatchError::NoCredentials);
    }
    if items.is_empty() {
        return Err(BatchError::NoWork);
    }
    match items.iter().filter(|item| mode.includes(item)).count() {
        0 => Err(BatchError::NothingToRetry),
        count => Ok(count),
    }
}

/// Cooperative stop flag. Checked at wave boundaries and before each dispatch.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives work items through an [`Analyzer`] in rate-limited waves.
pub struct BatchProcessor<A> {
    analyzer: A,
    config: BatchConfig,
    stop: StopSignal,
}

impl<A: Analyzer> BatchProcessor<A> {
    pub fn new(analyzer: A, config: BatchConfig) -> Self {
        Self {
            analyzer,
            config,
            stop: StopSignal::new(),
        }
    }

    /// Handle that stops this processor's runs when triggered.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Processes `items` and returns the run's summary.
    ///
    /// Items are split into consecutive waves of `batch_size`; each wave is
    /// awaited in full before the cooldown and the next wave. Item `i` of the
    /// processing list always uses `credentials.for_index(i)`. Per-item
    /// failures are recorded on the item and in the summary and never abort
    /// the run.
    pub async fn run(
        &self,
        items: &mut [WorkItem],
        credentials: &CredentialPool,
        mode: RunMode,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, BatchError> {
        preflight(items, credentials, mode)?;
        let mut targets: Vec<&mut WorkItem> = items
            .iter_mut()
            .filter(|item| mode.includes(item))
            .collect();

        let batch_size = self.config.batch_size;
        let total = targets.len();
        let waves = total.div_ceil(batch_size);
        let tracker = Mutex::new(ProgressTracker::new(total));
        let results = Mutex::new(Vec::with_capacity(total));
        let mut cancelled = false;

        tracing::info!(
            total,
            waves,
            batch_size,
            keys = credentials.len(),
            ?mode,
            "starting batch run"
        );

        for (wave_index, wave) in targets.chunks_mut(batch_size).enumerate() {
            if self.stop.is_stopped() {
                cancelled = true;
                break;
            }

            sink.on_event(&ProgressEvent::WaveStarted {
                wave: wave_index + 1,
                waves,
                size: wave.len(),
            });

            let offset = wave_index * batch_size;
            let tasks = wave.iter_mut().enumerate().map(|(i, item)| {
                self.process_item(&mut **item, offset + i, credentials, &tracker, &results, sink)
            });
            let dispatched = join_all(tasks).await;

            if dispatched.contains(&false) {
                cancelled = true;
                break;
            }

            if wave_index + 1 < waves {
                let delay = self.config.inter_batch_delay;
                sink.on_event(&ProgressEvent::Cooldown { delay });
                tracing::debug!(delay_ms = delay.as_millis() as u64, "cooling down between waves");
                sleep(delay).await;
            }
        }

        let progress = tracker
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);

        if cancelled {
            tracing::warn!(
                processed = progress.processed,
                total,
                "batch run stopped before completion"
            );
        }
        tracing::info!(
            succeeded = progress.succeeded,
            failed = progress.failed,
            "batch run finished"
        );
        sink.on_event(&ProgressEvent::Finished {
            progress,
            cancelled,
        });

        Ok(RunSummary {
            total,
            succeeded: progress.succeeded,
            failed: progress.failed,
            cancelled,
            results,
        })
    }

    /// Runs one item. Returns `false` if the stop signal prevented dispatch.
    async fn process_item(
        &self,
        item: &mut WorkItem,
        index: usize,
        credentials: &CredentialPool,
        tracker: &Mutex<ProgressTracker>,
        results: &Mutex<Vec<RunResult>>,
        sink: &dyn ProgressSink,
    ) -> bool {
        if self.stop.is_stopped() {
            return false;
        }

        let credential = credentials.for_index(index);
        let result = self.analyzer.analyze(&item.payload, credential).await;

        match &result {
            Ok(_) => item.mark_success(),
            Err(err) => {
                tracing::warn!(item = %item.source, kind = %err.kind, "analysis failed");
                item.mark_failed(err.classification());
            }
        }

        let outcome = Outcome::from(result);
        let ok = outcome.is_ok();
        let run_result = RunResult {
            item_id: item.id.clone(),
            source: item.source.clone(),
            outcome,
            completed_at: Utc::now(),
        };

        let progress = tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(ok);
        results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run_result.clone());

        tracing::debug!(
            item = %item.source,
            processed = progress.processed,
            total = progress.total,
            ok,
            "item completed"
        );
        sink.on_event(&ProgressEvent::ItemCompleted {
            progress,
            result: run_result,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;
    use crate::analysis::error::ErrorKind;
    use crate::analysis::{AnalysisError, AnalysisResult, Payload};
    use crate::batch::progress::RunProgress;

    struct NoopSink;

    impl ProgressSink for NoopSink {
        fn on_event(&self, _event: &ProgressEvent) {}
    }

    /// Succeeds unless the payload data is scripted to fail; records every call.
    #[derive(Default)]
    struct ScriptedAnalyzer {
        failures: Mutex<HashMap<String, ErrorKind>>,
        calls: Mutex<Vec<(String, String)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
        stop_on: Option<(String, StopSignal)>,
    }

    impl ScriptedAnalyzer {
        fn failing(pairs: &[(&str, ErrorKind)]) -> Self {
            let analyzer = Self::default();
            {
                let mut failures = analyzer.failures.lock().unwrap();
                for (data, kind) in pairs {
                    failures.insert(data.to_string(), kind.clone());
                }
            }
            analyzer
        }

        fn heal(&self) {
            self.failures.lock().unwrap().clear();
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(
            &self,
            payload: &Payload,
            credential: &str,
        ) -> Result<AnalysisResult, AnalysisError> {
            self.calls
                .lock()
                .unwrap()
                .push((payload.data.clone(), credential.to_string()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some((data, signal)) = &self.stop_on {
                if *data == payload.data {
                    signal.stop();
                }
            }

            let failure = self.failures.lock().unwrap().get(&payload.data).cloned();
            match failure {
                Some(kind) => Err(AnalysisError::new(kind, "scripted failure")),
                None => Ok(AnalysisResult::Text(format!("motion for {}", payload.data))),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl RecordingSink {
        fn cooldowns(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, ProgressEvent::Cooldown { .. }))
                .count()
        }

        fn wave_sizes(&self) -> Vec<usize> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::WaveStarted { size, .. } => Some(*size),
                    _ => None,
                })
                .collect()
        }

        fn progress_snapshots(&self) -> Vec<RunProgress> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::ItemCompleted { progress, .. } => Some(*progress),
                    _ => None,
                })
                .collect()
        }
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .map(|n| WorkItem::new(format!("{n}.jpg"), Payload::jpeg(n.to_string())))
            .collect()
    }

    fn keys(keys: &[&str]) -> CredentialPool {
        CredentialPool::new(keys.iter().map(|k| k.to_string()))
    }

    fn config(batch_size: usize, delay_ms: u64) -> BatchConfig {
        BatchConfig::new(batch_size, Duration::from_millis(delay_ms)).unwrap()
    }

    const SEVEN: [&str; 7] = ["i0", "i1", "i2", "i3", "i4", "i5", "i6"];

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = BatchConfig::new(0, Duration::ZERO).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn preflight_counts_targets_per_mode() {
        let mut work = items(&["a", "b", "c"]);
        work[0].mark_failed("HTTP_503".into());
        work[2].mark_failed("NETWORK_ERROR".into());
        let pool = keys(&["k1"]);

        assert_eq!(preflight(&work, &pool, RunMode::All), Ok(3));
        assert_eq!(preflight(&work, &pool, RunMode::RetryFailed), Ok(2));
    }

    #[test]
    fn preflight_reports_each_precondition() {
        let mut work = items(&["a"]);
        assert_eq!(
            preflight(&work, &keys(&[]), RunMode::All),
            Err(BatchError::NoCredentials)
        );
        assert_eq!(
            preflight(&[], &keys(&["k1"]), RunMode::All),
            Err(BatchError::NoWork)
        );
        assert_eq!(
            preflight(&work, &keys(&["k1"]), RunMode::RetryFailed),
            Err(BatchError::NothingToRetry)
        );
        work[0].mark_success();
        assert_eq!(
            preflight(&work, &keys(&["k1"]), RunMode::RetryFailed),
            Err(BatchError::NothingToRetry)
        );
        assert_eq!(work[0].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn finished_event_carries_final_progress() {
        let analyzer = ScriptedAnalyzer::failing(&[("b", ErrorKind::Network)]);
        let processor = BatchProcessor::new(&analyzer, config(2, 0));
        let sink = RecordingSink::default();
        let mut work = items(&["a", "b", "c"]);

        processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &sink)
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        match events.last() {
            Some(ProgressEvent::Finished {
                progress,
                cancelled,
            }) => {
                assert!(!cancelled);
                assert_eq!((progress.total, progress.processed), (3, 3));
                assert_eq!((progress.succeeded, progress.failed), (2, 1));
            }
            other => panic!("expected Finished last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_credentials_fail_before_any_call() {
        let analyzer = ScriptedAnalyzer::default();
        let processor = BatchProcessor::new(&analyzer, config(2, 0));
        let mut work = items(&["a"]);

        let err = processor
            .run(&mut work, &keys(&[]), RunMode::All, &NoopSink)
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::NoCredentials);
        assert!(analyzer.calls().is_empty());
        assert_eq!(work[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn empty_items_fail_with_no_work() {
        let analyzer = ScriptedAnalyzer::default();
        let processor = BatchProcessor::new(&analyzer, config(2, 0));
        let err = processor
            .run(&mut [], &keys(&["k1"]), RunMode::All, &NoopSink)
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::NoWork);
    }

    #[tokio::test]
    async fn one_result_per_item_and_counts_add_up() {
        let analyzer = ScriptedAnalyzer::failing(&[("i3", ErrorKind::Network)]);
        let processor = BatchProcessor::new(&analyzer, config(4, 0));
        let mut work = items(&SEVEN);

        let summary = processor
            .run(&mut work, &keys(&["k1", "k2"]), RunMode::All, &NoopSink)
            .await
            .unwrap();

        assert_eq!(summary.total, 7);
        assert_eq!(summary.results.len(), 7);
        assert_eq!(summary.succeeded + summary.failed, summary.total);
        assert!(!summary.cancelled);
        for item in &work {
            let matching = summary.results.iter().filter(|r| r.item_id == item.id).count();
            assert_eq!(matching, 1);
        }
    }

    #[tokio::test]
    async fn credentials_rotate_by_global_index_for_any_batch_size() {
        for batch_size in [1, 2, 3, 5, 10] {
            let analyzer = ScriptedAnalyzer::default();
            let processor = BatchProcessor::new(&analyzer, config(batch_size, 0));
            let mut work = items(&SEVEN);

            processor
                .run(&mut work, &keys(&["k1", "k2", "k3"]), RunMode::All, &NoopSink)
                .await
                .unwrap();

            let mut calls = analyzer.calls();
            calls.sort();
            let expected: Vec<(String, String)> = (0..7)
                .map(|i| (format!("i{i}"), format!("k{}", i % 3 + 1)))
                .collect();
            assert_eq!(calls, expected, "batch_size = {batch_size}");
        }
    }

    #[tokio::test]
    async fn seven_items_in_waves_of_three() {
        let analyzer = ScriptedAnalyzer::default();
        let processor = BatchProcessor::new(&analyzer, config(3, 0));
        let sink = RecordingSink::default();
        let mut work = items(&SEVEN);

        processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &sink)
            .await
            .unwrap();

        assert_eq!(sink.wave_sizes(), vec![3, 3, 1]);
        assert_eq!(sink.cooldowns(), 2);
    }

    #[tokio::test]
    async fn single_wave_has_no_cooldown() {
        let analyzer = ScriptedAnalyzer::default();
        let processor = BatchProcessor::new(&analyzer, config(10, 5_000));
        let sink = RecordingSink::default();
        let mut work = items(&["a", "b"]);

        let started = Instant::now();
        processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &sink)
            .await
            .unwrap();

        assert_eq!(sink.cooldowns(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_batch_size() {
        let analyzer = ScriptedAnalyzer {
            latency: Duration::from_millis(20),
            ..Default::default()
        };
        let processor = BatchProcessor::new(&analyzer, config(3, 0));
        let mut work = items(&SEVEN);

        processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &NoopSink)
            .await
            .unwrap();

        assert_eq!(analyzer.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_reaches_total() {
        let analyzer = ScriptedAnalyzer::failing(&[("i1", ErrorKind::EmptyResponse)]);
        let processor = BatchProcessor::new(&analyzer, config(2, 0));
        let sink = RecordingSink::default();
        let mut work = items(&SEVEN);

        processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &sink)
            .await
            .unwrap();

        let snapshots = sink.progress_snapshots();
        assert_eq!(snapshots.len(), 7);
        for pair in snapshots.windows(2) {
            assert!(pair[1].processed > pair[0].processed);
        }
        let last = snapshots.last().unwrap();
        assert_eq!(last.processed, 7);
        assert_eq!(last.succeeded, 6);
        assert_eq!(last.failed, 1);
        assert_eq!(last.estimated_seconds_remaining, 0);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_retry_targets_only_them() {
        let analyzer = ScriptedAnalyzer::failing(&[
            ("i2", ErrorKind::Http(500)),
            ("i5", ErrorKind::JsonParse),
        ]);
        let processor = BatchProcessor::new(&analyzer, config(3, 0));
        let mut work = items(&SEVEN);
        let pool = keys(&["k1", "k2"]);

        let summary = processor
            .run(&mut work, &pool, RunMode::All, &NoopSink)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(work[2].status, ItemStatus::Failed);
        assert_eq!(work[2].last_error_kind.as_deref(), Some("HTTP_500"));
        assert_eq!(work[5].status, ItemStatus::Failed);
        assert_eq!(work[5].last_error_kind.as_deref(), Some("JSON_PARSE_ERROR"));

        analyzer.heal();
        analyzer.calls.lock().unwrap().clear();

        let retry = processor
            .run(&mut work, &pool, RunMode::RetryFailed, &NoopSink)
            .await
            .unwrap();

        assert_eq!(retry.total, 2);
        assert_eq!(retry.succeeded, 2);
        let mut retried: Vec<String> = analyzer.calls().into_iter().map(|(d, _)| d).collect();
        retried.sort();
        assert_eq!(retried, vec!["i2", "i5"]);
        // Retry list indices restart at zero: i2 -> k1, i5 -> k2.
        assert_eq!(
            analyzer.calls(),
            vec![("i2".into(), "k1".into()), ("i5".into(), "k2".into())]
        );
        assert!(work.iter().all(|i| i.status == ItemStatus::Success));
        assert!(work[2].last_error_kind.is_none());
    }

    #[tokio::test]
    async fn retry_with_nothing_failed_touches_nothing() {
        let analyzer = ScriptedAnalyzer::default();
        let processor = BatchProcessor::new(&analyzer, config(3, 0));
        let sink = RecordingSink::default();
        let mut work = items(&["a", "b"]);
        work[0].mark_success();

        let err = processor
            .run(&mut work, &keys(&["k1"]), RunMode::RetryFailed, &sink)
            .await
            .unwrap_err();

        assert_eq!(err, BatchError::NothingToRetry);
        assert!(analyzer.calls().is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
        assert_eq!(work[0].status, ItemStatus::Success);
        assert_eq!(work[1].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn end_to_end_four_items_two_keys() {
        let analyzer = ScriptedAnalyzer::failing(&[("C", ErrorKind::Http(500))]);
        let processor = BatchProcessor::new(&analyzer, config(2, 100));
        let sink = RecordingSink::default();
        let mut work = items(&["A", "B", "C", "D"]);

        let started = Instant::now();
        let summary = processor
            .run(&mut work, &keys(&["k1", "k2"]), RunMode::All, &sink)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(sink.cooldowns(), 1);
        assert_eq!(
            analyzer.calls(),
            vec![
                ("A".into(), "k1".into()),
                ("B".into(), "k2".into()),
                ("C".into(), "k1".into()),
                ("D".into(), "k2".into()),
            ]
        );
        assert_eq!(
            (summary.total, summary.succeeded, summary.failed),
            (4, 3, 1)
        );
        assert_eq!(work[2].status, ItemStatus::Failed);
        assert_eq!(work[2].last_error_kind.as_deref(), Some("HTTP_500"));
        let latest = summary.results_most_recent_first().next().unwrap();
        assert_eq!(latest.item_id, summary.results[3].item_id);
    }

    #[tokio::test]
    async fn stop_at_wave_boundary_leaves_rest_pending() {
        let signal = StopSignal::new();
        let analyzer = ScriptedAnalyzer {
            stop_on: Some(("B".into(), signal.clone())),
            ..Default::default()
        };
        let processor = BatchProcessor {
            analyzer: &analyzer,
            config: config(2, 0),
            stop: signal,
        };
        let mut work = items(&["A", "B", "C", "D"]);

        let summary = processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &NoopSink)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(work[1].status, ItemStatus::Success);
        assert_eq!(work[2].status, ItemStatus::Pending);
        assert_eq!(work[3].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn stop_inside_wave_skips_undispatched_items() {
        let signal = StopSignal::new();
        let analyzer = ScriptedAnalyzer {
            stop_on: Some(("A".into(), signal.clone())),
            ..Default::default()
        };
        let processor = BatchProcessor {
            analyzer: &analyzer,
            config: config(3, 0),
            stop: signal,
        };
        let mut work = items(&["A", "B", "C"]);

        let summary = processor
            .run(&mut work, &keys(&["k1"]), RunMode::All, &NoopSink)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(analyzer.calls().len(), 1);
        assert_eq!(work[1].status, ItemStatus::Pending);
    }
}
