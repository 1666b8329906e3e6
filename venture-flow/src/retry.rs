use std::{future::Future, time::Duration};
use tracing::warn;

use crate::error::{AnalysisError, MalformedOutput, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    /// Sleep before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Value produced by a successful retried call, with the number of calls it took.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `call`, then `parse` its output; retry transient and malformed-output failures
/// with linear backoff.
///
/// Any failure that ends the loop is wrapped in [`AnalysisError::RetriesExhausted`]
/// carrying the number of calls made, so the message reaching the user names both the
/// attempt count and the underlying cause.
pub async fn execute_with_retry<T, R, Call, Fut, Parse>(
    policy: &RetryPolicy,
    mut call: Call,
    parse: Parse,
) -> Result<Attempted<T>>
where
    Call: FnMut() -> Fut,
    Fut: Future<Output = Result<R>>,
    Parse: Fn(&R) -> std::result::Result<T, MalformedOutput>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = match call().await {
            Ok(raw) => parse(&raw).map_err(AnalysisError::from),
            Err(e) => Err(e),
        };

        let error = match outcome {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => error,
        };

        let kind = error.kind();
        if !kind.is_retryable() || attempt > policy.max_retries {
            return Err(AnalysisError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(error),
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt,
            max_attempts = policy.max_retries + 1,
            delay_ms = delay.as_millis() as u64,
            kind = ?kind,
            error = %error,
            "AI analysis attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
