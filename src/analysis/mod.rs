pub mod client;
pub mod error;
pub mod types;

pub use client::{Analyzer, RemoteClient, RetryPolicy};
pub use error::AnalysisError;
pub use types::{AnalysisResult, OutputMode, Payload};
