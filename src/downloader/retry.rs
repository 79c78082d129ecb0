use crate::common::model::{BackoffConfig, DownloadConfig, Request};
use std::collections::HashSet;
use std::time::Duration;

/// Generic bounded retry for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_retries: u32,
    retry_http_codes: HashSet<u16>,
    priority_adjust: i32,
    backoff: BackoffConfig,
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            enabled: config.retry_enabled,
            max_retries: config.max_retries,
            retry_http_codes: config.retry_http_codes.iter().copied().collect(),
            priority_adjust: config.retry_priority_adjust,
            backoff: config.backoff.clone(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_http_codes.contains(&status)
    }

    /// Delay before the `attempt`-th retry (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffConfig::Fixed { secs } => Duration::from_secs(secs),
            BackoffConfig::Exponential { base_ms, max_ms } => {
                let factor = 1u64 << attempt.saturating_sub(1).min(32);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }

    /// The next attempt of `request` and its delay, or `None` once retries
    /// are disabled or used up.
    pub fn retry(&self, request: &Request) -> Option<(Request, Duration)> {
        if !self.enabled || request.retry_times >= self.max_retries {
            return None;
        }
        let mut next = request.retry_copy();
        next.retry_times += 1;
        next.priority = request.priority.saturating_add(self.priority_adjust);
        let delay = self.delay(next.retry_times);
        Some((next, delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_are_bounded() {
        let policy = RetryPolicy::default();
        let first = Request::new("http://x/list?p=2").with_priority(3);
        let (second, delay) = policy.retry(&first).unwrap();
        assert_eq!(second.retry_times, 1);
        assert_eq!(second.priority, 2);
        assert!(second.dont_filter);
        assert_eq!(second.url, first.url);
        assert_ne!(second.id, first.id);
        assert_eq!(delay, Duration::ZERO);

        let (third, _) = policy.retry(&second).unwrap();
        assert!(policy.retry(&third).is_none());
    }

    #[test]
    fn test_default_codes() {
        let policy = RetryPolicy::default();
        for code in [500, 502, 503, 504, 400, 408, 478, 510] {
            assert!(policy.is_retryable_status(code));
        }
        assert!(!policy.is_retryable_status(403));
        assert!(!policy.is_retryable_status(200));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let policy = RetryPolicy::from(&DownloadConfig {
            backoff: BackoffConfig::Exponential {
                base_ms: 500,
                max_ms: 3_000,
            },
            ..DownloadConfig::default()
        });
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay(4), Duration::from_millis(3_000));
        assert_eq!(policy.delay(60), Duration::from_millis(3_000));
    }

    #[test]
    fn test_disabled() {
        let policy = RetryPolicy::from(&DownloadConfig {
            retry_enabled: false,
            ..DownloadConfig::default()
        });
        assert!(policy.retry(&Request::new("http://x/")).is_none());
    }
}
