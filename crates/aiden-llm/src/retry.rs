use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use aiden_core::config::RetryConfig;
use aiden_core::error::{AidenError, Result};
use aiden_core::traits::{ChatModel, ChatRequest, ChatResponse};

/// A chat model that retries transient failures with exponential backoff.
pub struct RetryingModel {
    inner: Arc<dyn ChatModel>,
    retry_config: RetryConfig,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn ChatModel>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &AidenError) -> bool {
    match e {
        AidenError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ChatModel for RetryingModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.complete(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            model = %self.inner.name(),
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> AidenError,
    }

    impl ChatModel for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn complete(&self, _request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if n < self.failures {
                Err((self.error)())
            } else {
                Ok(ChatResponse {
                    text: "ok".into(),
                    ..Default::default()
                })
            };
            Box::pin(async move { result })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        };
        let d = calculate_backoff(20, &config);
        assert!(d <= Duration::from_millis(36_000));
        let first = calculate_backoff(0, &config);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(is_retryable(&AidenError::LlmRequest("HTTP 429: slow down".into())));
        assert!(is_retryable(&AidenError::LlmRequest("connection reset".into())));
        assert!(!is_retryable(&AidenError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&AidenError::LlmParse("bad json".into())));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: || AidenError::LlmRequest("HTTP 503: busy".into()),
        });
        let model = RetryingModel::new(flaky.clone(), fast_retry(3));
        let out = model.complete(ChatRequest::new("s", "u")).await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: || AidenError::LlmRequest("HTTP 500".into()),
        });
        let model = RetryingModel::new(flaky.clone(), fast_retry(2));
        assert!(model.complete(ChatRequest::new("s", "u")).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: || AidenError::LlmParse("bad".into()),
        });
        let model = RetryingModel::new(flaky.clone(), fast_retry(5));
        assert!(model.complete(ChatRequest::new("s", "u")).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
