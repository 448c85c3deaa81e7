use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{ExtractError, Result};
use crate::llm::{ChatRequest, ModelEndpoint};

/// Exponential backoff for callers that want to retry model calls.
/// The extraction functions themselves never retry.
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

    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Run `f` until it succeeds, `is_retryable` rejects its error, or the
    /// retry budget is spent. Backoff doubles per attempt up to the cap.
    pub async fn retry<F, Fut, T, E, R>(
        &self,
        operation_name: &str,
        is_retryable: R,
        mut f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            let e = match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(operation = operation_name, retries = attempt, "succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !is_retryable(&e) {
                return Err(e);
            }
            if attempt >= self.max_retries {
                if self.max_retries > 0 {
                    warn!(operation = operation_name, retries = attempt, error = %e, "giving up");
                }
                return Err(e);
            }

            warn!(
                operation = operation_name,
                retry = attempt + 1,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "retrying"
            );
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
            attempt += 1;
        }
    }
}

/// Wraps an endpoint so every completion goes through a [`RetryPolicy`].
pub struct RetryingEndpoint<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> RetryingEndpoint<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<E: ModelEndpoint> ModelEndpoint for RetryingEndpoint<E> {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let operation = format!("complete:{}", request.model);
        self.policy
            .retry(&operation, ExtractError::is_retryable, || self.inner.complete(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyEndpoint {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelEndpoint for FlakyEndpoint {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ExtractError::Invocation("503".to_string()));
            }
            Ok("ok".to_string())
        }
    }

    fn flaky(failures: usize) -> FlakyEndpoint {
        FlakyEndpoint {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let endpoint = RetryingEndpoint::new(flaky(2), RetryPolicy::new(3, 1, 2));
        let request = ChatRequest::new("m", vec![]);

        assert_eq!(endpoint.complete(&request).await.unwrap(), "ok");
        assert_eq!(endpoint.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy_calls_once() {
        let endpoint = RetryingEndpoint::new(flaky(1), RetryPolicy::none());
        let request = ChatRequest::new("m", vec![]);

        let err = endpoint.complete(&request).await.unwrap_err();
        assert!(matches!(err, ExtractError::Invocation(_)));
        assert_eq!(endpoint.inner.calls.load(Ordering::SeqCst), 1);
    }

    struct MisconfiguredEndpoint {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelEndpoint for MisconfiguredEndpoint {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExtractError::Configuration("no model".to_string()))
        }
    }

    #[tokio::test]
    async fn test_non_invocation_errors_are_not_retried() {
        let endpoint = RetryingEndpoint::new(
            MisconfiguredEndpoint {
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::new(3, 1, 2),
        );

        let err = endpoint.complete(&ChatRequest::new("m", vec![])).await.unwrap_err();
        assert!(matches!(err, ExtractError::Configuration(_)));
        assert_eq!(endpoint.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let endpoint = RetryingEndpoint::new(flaky(10), RetryPolicy::new(2, 1, 2));

        let err = endpoint.complete(&ChatRequest::new("m", vec![])).await.unwrap_err();
        assert!(matches!(err, ExtractError::Invocation(_)));
        assert_eq!(endpoint.inner.calls.load(Ordering::SeqCst), 3);
    }
}
