use thiserror::Error;

/// Precondition failures of a batch run. Raised before any item is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("No API keys configured. Set FRAMEBATCH_API_KEYS or api_keys in framebatch.toml.")]
    NoCredentials,

    #[error("No work items to process.")]
    NoWork,

    #[error("No failed items to retry.")]
    NothingToRetry,

    #[error("Invalid batch configuration: {0}")]
    Config(String),
}
