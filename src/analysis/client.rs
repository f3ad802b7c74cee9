use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::error::{AnalysisError, ErrorKind};
use super::types::{AnalysisResult, MessagesRequest, MessagesResponse, OutputMode, Payload};
use crate::workflow::Workflow;

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Performs one analysis of an encoded image with the given credential.
///
/// Implemented by [`RemoteClient`] for real API calls and by scripted mocks
/// in tests.
pub trait Analyzer {
    async fn analyze(
        &self,
        payload: &Payload,
        credential: &str,
    ) -> Result<AnalysisResult, AnalysisError>;
}

impl<T: Analyzer> Analyzer for &T {
    async fn analyze(
        &self,
        payload: &Payload,
        credential: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        (**self).analyze(payload, credential).await
    }
}

/// Transient-failure retry settings for a single `analyze` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base for the exponential backoff after HTTP 429/503.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound of the random jitter added to each backoff.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Pause before retrying parse, empty-response and network failures.
    #[serde(default = "default_flat_delay_ms")]
    pub flat_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_jitter_ms() -> u64 {
    1000
}

fn default_flat_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            flat_delay_ms: default_flat_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the backoff: `2^attempt * base`, attempt zero-based.
    pub fn backoff_floor(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Backoff after a throttling response, with jitter in `0..=max_jitter_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.max_jitter_ms);
        self.backoff_floor(attempt) + Duration::from_millis(jitter)
    }

    pub fn flat_delay(&self) -> Duration {
        Duration::from_millis(self.flat_delay_ms)
    }

    /// Wait before the next attempt after `failed_attempts` attempts ended in
    /// `kind`, or `None` when the call must give up.
    ///
    /// Throttling backs off exponentially from the zero-based index of the
    /// failed attempt; other HTTP statuses are final; everything else waits the
    /// flat delay.
    pub fn delay_for(&self, kind: &ErrorKind, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts >= self.max_attempts {
            return None;
        }
        match kind {
            ErrorKind::Http(_) if kind.is_throttle() => {
                Some(self.backoff_delay(failed_attempts.saturating_sub(1)))
            }
            ErrorKind::Http(_) => None,
            _ => Some(self.flat_delay()),
        }
    }
}

/// HTTP client for the Messages API bound to one workflow.
pub struct RemoteClient {
    client: Client,
    base_url: String,
    model: String,
    workflow: Workflow,
    retry: RetryPolicy,
}

impl RemoteClient {
    /// Client for the Messages endpoint at `base_url` (normally [`API_URL`]).
    pub fn with_base_url(
        base_url: String,
        model: String,
        workflow: Workflow,
        retry: RetryPolicy,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model,
            workflow,
            retry,
        })
    }

    /// One HTTP round trip, classified.
    async fn attempt(
        &self,
        payload: &Payload,
        credential: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let req = MessagesRequest::vision(
            &self.model,
            self.workflow.max_tokens(),
            payload,
            self.workflow.instruction(),
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", credential)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnalysisError::http(status.as_u16(), body));
        }

        let body = response.json::<MessagesResponse>().await?;
        parse_output(&body.text(), self.workflow.output_mode())
    }
}

impl Analyzer for RemoteClient {
    async fn analyze(
        &self,
        payload: &Payload,
        credential: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut attempt = 0;
        loop {
            let err = match self.attempt(payload, credential).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            attempt += 1;

            let Some(delay) = self.retry.delay_for(&err.kind, attempt) else {
                return Err(err);
            };
            tracing::warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                kind = %err.kind,
                delay_ms = delay.as_millis() as u64,
                "analysis attempt failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

/// Interprets the response text according to the output mode.
pub fn parse_output(text: &str, mode: OutputMode) -> Result<AnalysisResult, AnalysisError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AnalysisError::new(
            ErrorKind::EmptyResponse,
            "response contained no text",
        ));
    }

    match mode {
        OutputMode::Text => Ok(AnalysisResult::Text(text.to_string())),
        OutputMode::Structured => {
            match serde_json::from_str::<serde_json::Value>(strip_code_fences(text)) {
                Ok(value @ serde_json::Value::Object(_)) => Ok(AnalysisResult::Structured(value)),
                Ok(_) => Err(AnalysisError::new(
                    ErrorKind::JsonParse,
                    "expected a JSON object",
                )),
                Err(e) => Err(AnalysisError::new(ErrorKind::JsonParse, e.to_string())),
            }
        }
    }
}

/// Removes a surrounding markdown fence (```json ... ```).
fn strip_code_fences(text: &str) -> &str {
    let s = text.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```JSON"))
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}
