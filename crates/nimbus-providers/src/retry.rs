//! Exponential backoff for retryable `ProviderError`s (spec.md §4.1, §7).
//!
//! Generalizes the apt-lock/mirror-fallback retry wrapper of spec.md §4.4 to
//! cloud API calls: retryable failures (rate-limit, 5xx, transient auth)
//! back off exponentially up to a bounded attempt count; non-retryable
//! failures (quota, invalid region) return immediately so the caller can
//! abort just that graph node.

use std::thread::sleep;
use std::time::Duration;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy { max_attempts: 5, base_delay_ms: 250, max_delay_ms: 8_000 }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Runs `f`, retrying on retryable `ProviderError`s per `policy`. Checks
/// `cancelled` between attempts so a `stacks cancel` can interrupt the
/// backoff sleep (spec.md §5).
pub fn with_retry<T>(
    policy: BackoffPolicy,
    cancelled: &dyn Fn() -> bool,
    mut f: impl FnMut() -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.retryable && attempt + 1 < policy.max_attempts && !cancelled() => {
                log::warn!(
                    "retryable provider error on attempt {}/{}: {}",
                    attempt + 1,
                    policy.max_attempts,
                    e
                );
                sleep(policy.delay_for(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use std::cell::Cell;

    #[test]
    fn retries_retryable_errors_until_success() {
        let calls = Cell::new(0);
        let policy = BackoffPolicy { max_attempts: 5, base_delay_ms: 1, max_delay_ms: 2 };
        let result = with_retry(policy, &|| false, || {
            let n = calls.get() + 1;
            calls.set(n);
            if n < 3 {
                Err(ProviderError::retryable(ProviderErrorKind::RateLimited, "slow down"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn non_retryable_errors_abort_immediately() {
        let calls = Cell::new(0);
        let policy = BackoffPolicy::default();
        let result: Result<(), ProviderError> = with_retry(policy, &|| false, || {
            calls.set(calls.get() + 1);
            Err(ProviderError::retryable(ProviderErrorKind::QuotaExceeded, "over quota"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
