//! Backoff policy for opening a completion.
//!
//! A completion may be retried only while it has produced nothing: the
//! opening request is repeated on a transient [`ProviderError`], but a
//! stream that has yielded a fragment is never restarted.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::ProviderError;

/// Per-attempt scale factors applied when jitter is on.
const JITTER: [f64; 4] = [0.75, 0.9, 0.6, 0.85];

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Scale each wait by a per-attempt factor below 1.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Wait before retry number `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            JITTER[attempt as usize % JITTER.len()]
        } else {
            1.0
        };
        Duration::from_secs_f64(secs * factor)
    }

    /// Whether `err` on attempt `attempt` (0-indexed) earns another try.
    pub fn allows_retry(&self, err: &ProviderError, attempt: u32) -> bool {
        err.is_transient() && attempt < self.max_retries
    }
}

/// Call `open` until it succeeds, fails permanently, or runs out of retries.
/// The last error is returned as-is.
pub(crate) async fn with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut open: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match open().await {
            Err(err) if config.allows_retry(&err, attempt) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Completion request failed ({err}); retry {}/{} in {:.1}s",
                    attempt + 1,
                    config.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
