use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, Bytes},
};
use log::warn;
use std::{future::Future, sync::Arc, time::Duration};

use crate::classifier::CodeReader;
use crate::errors::{DistributionError, Result};

/// Exponential backoff for throttled RPC requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Run `operation` until it succeeds, fails with a non rate-limit error,
    /// or the attempt budget is spent.
    pub async fn retry_with_backoff<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_rate_limited() => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(DistributionError::RateLimitExceeded {
                            attempts,
                            message: e.to_string(),
                        });
                    }

                    let backoff = self.backoff_base * 2u32.saturating_pow(attempts - 1);
                    warn!("Rate limited (attempt {}), backing off {:?}", attempts, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a provider error message onto the typed taxonomy
pub fn classify_rpc_error(message: String) -> DistributionError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        DistributionError::RateLimitExceeded {
            attempts: 1,
            message,
        }
    } else {
        DistributionError::Rpc(message)
    }
}

/// `eth_getCode` against a live JSON-RPC endpoint
pub struct ProviderCodeReader {
    provider: Arc<Provider<Http>>,
    retry: RetryPolicy,
}

impl ProviderCodeReader {
    pub fn new(provider: Arc<Provider<Http>>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

#[async_trait]
impl CodeReader for ProviderCodeReader {
    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.retry
            .retry_with_backoff(|| async move {
                self.provider
                    .get_code(address, None)
                    .await
                    .map_err(|e| classify_rpc_error(e.to_string()))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttled() -> DistributionError {
        classify_rpc_error("HTTP 429 Too Many Requests".to_string())
    }

    #[test]
    fn test_classify_rpc_error() {
        assert!(throttled().is_rate_limited());
        assert!(classify_rpc_error("exceeded rate limit".to_string()).is_rate_limited());
        assert!(matches!(
            classify_rpc_error("connection refused".to_string()),
            DistributionError::Rpc(_)
        ));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_throttling() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result = policy
            .retry_with_backoff(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(throttled())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_reported() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let err = policy
            .retry_with_backoff(|| async { Err::<(), _>(throttled()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DistributionError::RateLimitExceeded { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let err = policy
            .retry_with_backoff(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DistributionError::Rpc("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DistributionError::Rpc(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
