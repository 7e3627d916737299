use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use specsmith_core::config::RetryConfig;
use specsmith_core::error::{Result, SpecsmithError};
use specsmith_core::traits::Oracle;

/// An oracle that retries transient transport failures and falls back to
/// alternative providers.
///
/// This only smooths over network trouble. A reply that arrives but cannot be
/// used is the edit orchestrator's business, not this wrapper's.
pub struct RetryingOracle {
    primary: Box<dyn Oracle>,
    fallbacks: Vec<Box<dyn Oracle>>,
    retry_config: RetryConfig,
}

impl RetryingOracle {
    pub fn new(
        primary: Box<dyn Oracle>,
        fallbacks: Vec<Box<dyn Oracle>>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &SpecsmithError) -> bool {
    match e {
        SpecsmithError::OracleRequest(msg) => {
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
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl Oracle for RetryingOracle {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.complete(&prompt).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying oracle request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary oracle exhausted, trying fallback models");
            }
            for fallback in &self.fallbacks {
                match fallback.complete(&prompt).await {
                    Ok(text) => {
                        info!(oracle = fallback.name(), "Fell back to alternative model");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(oracle = fallback.name(), error = %e, "Fallback model also failed");
                        continue;
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| SpecsmithError::OracleRequest("All providers failed".into())))
        })
    }

    fn name(&self) -> &str {
        "retrying"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails with the given message `failures` times, then succeeds.
    struct Flaky {
        failures: usize,
        message: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Oracle for Flaky {
        fn complete(&self, _prompt: &str) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(SpecsmithError::OracleRequest(self.message.to_string()))
                } else {
                    Ok("ok".to_string())
                }
            })
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
    fn test_backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &cfg);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&SpecsmithError::OracleRequest("HTTP 503: busy".into())));
        assert!(is_retryable(&SpecsmithError::OracleRequest("connection reset".into())));
        assert!(!is_retryable(&SpecsmithError::OracleRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&SpecsmithError::OracleResponse("HTTP 500".into())));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let primary = Flaky {
            failures: 2,
            message: "HTTP 429: slow down",
            calls: calls.clone(),
        };
        let oracle = RetryingOracle::new(Box::new(primary), vec![], fast_retry(3));
        assert_eq!(oracle.complete("p").await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_goes_to_fallback() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let primary = Flaky {
            failures: usize::MAX,
            message: "HTTP 401: unauthorized",
            calls: primary_calls.clone(),
        };
        let fallback = Flaky {
            failures: 0,
            message: "",
            calls: fallback_calls.clone(),
        };
        let oracle =
            RetryingOracle::new(Box::new(primary), vec![Box::new(fallback)], fast_retry(3));
        assert_eq!(oracle.complete("p").await.unwrap(), "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failures_surface_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let primary = Flaky {
            failures: usize::MAX,
            message: "HTTP 500: boom",
            calls: calls.clone(),
        };
        let oracle = RetryingOracle::new(Box::new(primary), vec![], fast_retry(2));
        let err = oracle.complete("p").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
