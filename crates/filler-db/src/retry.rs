use crate::classify::ErrorClass;
use crate::Result;
use filler_core::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Bounded exponential backoff for transactional operations.
///
/// Waits are deterministic (`backoff_base * 2^attempt`, no jitter) so runs
/// are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.backoff_base())
    }

    /// Wait before retry number `attempt + 1` (attempt counts from zero)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        run_with_retries(self, operation, op).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` until it succeeds, fails fatally, or runs out of retries.
///
/// The error returned is always the one produced by the last attempt,
/// unchanged.
pub async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, retries = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        match err.classify() {
            ErrorClass::Retryable(reason) if attempt < policy.max_retries => {
                let wait = policy.backoff(attempt);
                warn!(
                    operation,
                    reason = %reason,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Retryable database error, backing off"
                );
                filler_metrics::counters::retries(reason.as_str());
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            ErrorClass::Retryable(reason) => {
                error!(
                    operation,
                    reason = %reason,
                    retries = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                filler_metrics::counters::retries_exhausted(operation);
                return Err(err);
            }
            ErrorClass::Fatal => {
                debug!(operation, error = %err, "Fatal database error, not retrying");
                return Err(err);
            }
        }
    }
}
