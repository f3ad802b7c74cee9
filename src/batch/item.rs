use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{AnalysisError, AnalysisResult, Payload};

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Success,
    Failed,
}

/// One image queued for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// Where the payload came from; only used for display.
    pub source: String,
    pub payload: Payload,
    pub status: ItemStatus,
    pub last_error_kind: Option<String>,
}

impl WorkItem {
    pub fn new(source: String, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            payload,
            status: ItemStatus::Pending,
            last_error_kind: None,
        }
    }

    pub(crate) fn mark_success(&mut self) {
        self.status = ItemStatus::Success;
        self.last_error_kind = None;
    }

    pub(crate) fn mark_failed(&mut self, kind: String) {
        self.status = ItemStatus::Failed;
        self.last_error_kind = Some(kind);
    }
}

/// Ordered API keys shared by a run. Never mutated while a run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    /// Builds a pool, dropping blank entries.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Round-robin by absolute position in the processing list.
    ///
    /// Panics if the pool is empty; callers check [`is_empty`](Self::is_empty) first.
    pub fn for_index(&self, index: usize) -> &str {
        &self.keys[index % self.keys.len()]
    }
}

/// Outcome of one attempt on one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { output: AnalysisResult },
    Error { kind: String, message: String },
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }
}

impl From<Result<AnalysisResult, AnalysisError>> for Outcome {
    fn from(result: Result<AnalysisResult, AnalysisError>) -> Self {
        match result {
            Ok(output) => Outcome::Ok { output },
            Err(err) => Outcome::Error {
                kind: err.classification(),
                message: err.message,
            },
        }
    }
}

/// Record produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub item_id: String,
    pub source: String,
    pub outcome: Outcome,
    pub completed_at: DateTime<Utc>,
}

/// Totals and per-item results of one `run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when a stop signal left items undispatched.
    pub cancelled: bool,
    /// Results in completion order.
    pub results: Vec<RunResult>,
}

impl RunSummary {
    pub fn results_most_recent_first(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().rev()
    }
}

/// Merged results across runs: newest result per item, most recent first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsView {
    entries: Vec<RunResult>,
}

impl ResultsView {
    /// Folds a run's results in, superseding older results for the same items.
    pub fn merge(&mut self, summary: &RunSummary) {
        let fresh: Vec<RunResult> = summary.results_most_recent_first().cloned().collect();
        let replaced: HashSet<&str> = fresh.iter().map(|r| r.item_id.as_str()).collect();
        self.entries.retain(|r| !replaced.contains(r.item_id.as_str()));

        let mut merged = fresh;
        merged.append(&mut self.entries);
        self.entries = merged;
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunResult> {
        self.entries.iter()
    }
}
