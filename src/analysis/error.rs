//! Error types for the remote analysis client.
//!
//! Every failure is reduced to an [`ErrorKind`] whose `Display` form is a
//! short tag (`HTTP_429`, `EMPTY_RESPONSE`, ...). The tag drives the retry
//! decisions in [`RemoteClient`](super::RemoteClient) and is what the batch
//! processor stores on a failed item.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed analysis attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Non-2xx HTTP status.
    Http(u16),
    /// 2xx response without any text.
    EmptyResponse,
    /// 2xx response whose text is not the expected JSON object.
    JsonParse,
    /// Transport failure (DNS, connection refused, timeout).
    Network,
    /// Anything else, carried as its raw message.
    Other(String),
}

impl ErrorKind {
    /// Rate limit or overload signals that deserve exponential backoff.
    pub fn is_throttle(&self) -> bool {
        matches!(self, ErrorKind::Http(429) | ErrorKind::Http(503))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Http(status) => write!(f, "HTTP_{status}"),
            ErrorKind::EmptyResponse => write!(f, "EMPTY_RESPONSE"),
            ErrorKind::JsonParse => write!(f, "JSON_PARSE_ERROR"),
            ErrorKind::Network => write!(f, "NETWORK_ERROR"),
            ErrorKind::Other(message) => write!(f, "{message}"),
        }
    }
}

/// A classified failure returned by an [`Analyzer`](super::Analyzer).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AnalysisError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AnalysisError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http(status), body)
    }

    /// The short tag stored as an item's `last_error_kind`.
    pub fn classification(&self) -> String {
        self.kind.to_string()
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::new(ErrorKind::Other(err.to_string()), err.to_string())
        } else {
            Self::new(ErrorKind::Network, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags() {
        assert_eq!(ErrorKind::Http(500).to_string(), "HTTP_500");
        assert_eq!(ErrorKind::EmptyResponse.to_string(), "EMPTY_RESPONSE");
        assert_eq!(ErrorKind::JsonParse.to_string(), "JSON_PARSE_ERROR");
        assert_eq!(ErrorKind::Network.to_string(), "NETWORK_ERROR");
        assert_eq!(
            ErrorKind::Other("socket hang up".into()).to_string(),
            "socket hang up"
        );
    }

    #[test]
    fn only_429_and_503_throttle() {
        assert!(ErrorKind::Http(429).is_throttle());
        assert!(ErrorKind::Http(503).is_throttle());
        assert!(!ErrorKind::Http(500).is_throttle());
        assert!(!ErrorKind::Network.is_throttle());
    }

    #[test]
    fn error_display_includes_tag_and_message() {
        let err = AnalysisError::http(401, "invalid x-api-key");
        assert_eq!(err.to_string(), "HTTP_401: invalid x-api-key");
        assert_eq!(err.classification(), "HTTP_401");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnalysisError>();
    }
}
