//! Retry with exponential backoff for transient provider failures.

use flow_core::{FlowError, FlowResult};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget runs
/// out. Exhausting the budget on transient errors yields
/// `FlowError::ProviderUnavailable`.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> FlowResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FlowResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error: Option<FlowError> = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt + 1 < attempts {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        "{}: {} - retrying in {:.1}s ({}/{})",
                        label,
                        e,
                        delay.as_secs_f64(),
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(FlowError::ProviderUnavailable(format!(
        "{} failed after {} attempts: {}",
        label,
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
