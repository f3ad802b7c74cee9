//! JSON state file shared by `run`, `retry` and `status`.
//!
//! Holds the items with their last status and the merged results view. No
//! cursor is kept: a later full run processes everything again.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{ItemStatus, ResultsView, RunSummary, WorkItem};
use crate::workflow::Workflow;

pub const DEFAULT_STATE_FILE: &str = "framebatch-state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state file at {0}. Run `framebatch run` first.")]
    Missing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub workflow: Workflow,
    pub items: Vec<WorkItem>,
    #[serde(default)]
    pub results: ResultsView,
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
}

impl BatchState {
    pub fn new(workflow: Workflow, items: Vec<WorkItem>) -> Self {
        Self {
            workflow,
            items,
            results: ResultsView::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Err(StateError::Missing(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes to a sibling temp file first, then renames over the target.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn record(&mut self, summary: &RunSummary) {
        self.results.merge(summary);
    }

    pub fn counts(&self) -> StatusCounts {
        self.items
            .iter()
            .fold(StatusCounts::default(), |mut acc, item| {
                match item.status {
                    ItemStatus::Pending => acc.pending += 1,
                    ItemStatus::Success => acc.success += 1,
                    ItemStatus::Failed => acc.failed += 1,
                }
                acc
            })
    }
}
