//! Shared plumbing for calls to third-party HTTP APIs: error type, status
//! checking and the best-effort retry wrapper used for media uploads.

use reqwest::{Response, StatusCode};
use std::{future::Future, io, time::Duration};
use thiserror::Error;
use tracing::warn;

/// Longest error body kept for logs and client messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {service} failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} responded with {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{service} returned an unexpected response: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },
    #[error("failed to read staged asset: {0}")]
    Io(#[from] io::Error),
}

impl UpstreamError {
    pub fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { service, source }
    }

    /// Transport errors, throttling and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Decode { .. } | Self::Io(_) => false,
        }
    }
}

/// Turn a non-2xx response into [`UpstreamError::Status`], keeping a bounded slice of the body.
pub async fn ensure_success(service: &'static str, response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(UpstreamError::Status {
        service,
        status,
        body,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay before attempt `attempt + 1`: `backoff * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        self.backoff.saturating_mul(1 << exp)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.attempts` is exhausted. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && err.is_retryable() => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name, attempt, policy.attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
