//! Retry policy for vendor requests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::config::VendorClientConfig;
use crate::connectors::error::RETRYABLE_STATUSES;

/// Upper bound on how long a server-directed `Retry-After` may stall a request.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&VendorClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &VendorClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.retry_base_ms),
            factor: config.retry_factor,
            max_delay: Duration::from_millis(config.retry_max_ms),
            jitter_factor: config.retry_jitter_factor,
        }
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// `base * factor^attempt`, capped at `max_delay`, then jittered by `±jitter_factor`.
    ///
    /// `attempt` is zero-based: the delay before the first retry uses `attempt = 0`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = if self.jitter_factor > 0.0 {
            let spread = capped_ms * self.jitter_factor;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped_ms + offset).clamp(0.0, self.max_delay.as_millis() as f64)
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.round() as u64)
    }

    /// Delay before retry `attempt`, preferring a server `Retry-After` header.
    pub fn delay_for(&self, attempt: u32, headers: Option<&HeaderMap>) -> Duration {
        headers
            .and_then(parse_retry_after)
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP-date, capped at five minutes.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    let delay = if let Ok(seconds) = raw.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    };

    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(3),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
        assert_eq!(policy.backoff(30), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..policy()
        };
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn retry_after_seconds_wins_over_backoff() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(policy().delay_for(0, Some(&headers)), Duration::from_secs(5));
        assert_eq!(policy().delay_for(0, None), Duration::from_millis(500));
    }

    #[test]
    fn retry_after_http_date_is_parsed() {
        let at = Utc::now() + chrono::Duration::seconds(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).unwrap(),
        );
        let delay = parse_retry_after(&headers).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(28));
    }

    #[test]
    fn retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(parse_retry_after(&headers), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(RetryPolicy::is_retryable_status(status));
        }
        assert!(!RetryPolicy::is_retryable_status(404));
        assert!(!RetryPolicy::is_retryable_status(401));
    }
}
