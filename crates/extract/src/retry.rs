use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::llm::{ChatRequest, ChatResponse, LlmTransport};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Time spent sleeping between attempts when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut backoff = self.initial_backoff;
        for _ in 0..self.max_retries {
            total += backoff;
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
        total
    }

    /// Run `f` until it succeeds, with exponential backoff between attempts.
    /// Gives up at once on errors for which `should_retry` is false.
    pub async fn retry_if<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        mut f: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !should_retry(&e) {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;

                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

impl TransportError {
    /// Network failures, rate limiting and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::EmptyResponse | Self::Other(_) => false,
        }
    }
}

/// Wraps a transport with a [`RetryPolicy`].
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: LlmTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: LlmTransport> LlmTransport for RetryingTransport<T> {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
        self.policy
            .retry_if(
                "llm_complete",
                || self.inner.complete(request.clone()),
                TransportError::is_retryable,
            )
            .await
    }
}
