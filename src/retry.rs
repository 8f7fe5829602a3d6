use std::time::Duration;

use crate::error::FetchError;

/// Decides whether a failed attempt is retried and after how long.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` counts failures so far, starting at 1.
    fn next_delay(&self, attempt: u32, error: &FetchError) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &FetchError) -> Option<Duration> {
        None
    }
}

/// Doubles the delay after every transient failure, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, error: &FetchError) -> Option<Duration> {
        if attempt > self.max_retries || !error.kind.is_transient() {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.base.saturating_mul(factor).min(self.max_delay))
    }
}

/// `NoRetry` for zero retries, exponential backoff otherwise.
pub fn policy_for(retries: u32) -> Box<dyn RetryPolicy> {
    if retries == 0 {
        Box::new(NoRetry)
    } else {
        Box::new(ExponentialBackoff::new(retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    #[test]
    fn no_retry_never_retries() {
        let err = FetchError::new(FetchErrorKind::Timeout, "slow");
        assert_eq!(NoRetry.next_delay(1, &err), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ExponentialBackoff {
            max_retries: 10,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        let err = FetchError::new(FetchErrorKind::Status(503), "busy");
        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2, &err), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3, &err), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(4, &err), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(11, &err), None);
    }

    #[test]
    fn backoff_skips_permanent_failures() {
        let policy = ExponentialBackoff::new(3);
        let err = FetchError::new(FetchErrorKind::Status(404), "missing");
        assert_eq!(policy.next_delay(1, &err), None);
    }
}
