mod item;
mod processor;
mod progress;

pub use item::{CredentialPool, ItemStatus, Outcome, ResultsView, RunResult, RunSummary, WorkItem};
pub use processor::{BatchConfig, BatchProcessor, RunMode, StopSignal, preflight};
pub use progress::{ProgressEvent, ProgressSink, RunProgress};
