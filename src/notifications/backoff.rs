//! # Delivery Backoff
//!
//! Classifies webhook responses and picks the delay before the next attempt.
//! A server-requested delay (`Retry-After`, as integer seconds or an HTTP
//! date) wins over the exponential schedule; both are capped by the policy's
//! maximum interval.

use crate::execution::RetryPolicy;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    RateLimited { retry_after: Option<Duration> },
    /// 4xx other than 429
    ClientError,
    ServerError,
}

impl ResponseClass {
    pub fn classify(status: u16, headers: &HashMap<String, String>) -> Self {
        match status {
            0..=399 => Self::Success,
            429 => Self::RateLimited {
                retry_after: extract_retry_after(headers),
            },
            400..=499 => Self::ClientError,
            _ => Self::ServerError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServerError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffType {
    ServerRequested,
    Exponential,
}

/// Find a `Retry-After` header (case-insensitive) and parse it
pub fn extract_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    let value = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value.trim())?;

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        let diff = date.signed_duration_since(Utc::now());
        if diff.num_seconds() > 0 {
            return Some(Duration::from_secs(diff.num_seconds() as u64));
        }
    }

    None
}

/// Delay after a failed `attempt` (1-based)
pub fn next_delay(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> (Duration, BackoffType) {
    match retry_after {
        Some(requested) => (requested.min(policy.max_interval), BackoffType::ServerRequested),
        None => (policy.delay_for_attempt(attempt), BackoffType::Exponential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_classification() {
        let none = HashMap::new();
        assert_eq!(ResponseClass::classify(200, &none), ResponseClass::Success);
        assert_eq!(ResponseClass::classify(302, &none), ResponseClass::Success);
        assert_eq!(ResponseClass::classify(404, &none), ResponseClass::ClientError);
        assert_eq!(ResponseClass::classify(503, &none), ResponseClass::ServerError);
        assert_eq!(
            ResponseClass::classify(429, &headers(&[("Retry-After", "7")])),
            ResponseClass::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert!(!ResponseClass::ClientError.is_retryable());
    }

    #[test]
    fn test_retry_after_http_date() {
        let future = (Utc::now() + chrono::Duration::seconds(120)).to_rfc2822();
        let parsed = extract_retry_after(&headers(&[("retry-after", &future)])).unwrap();
        assert!(parsed > Duration::from_secs(100) && parsed <= Duration::from_secs(120));

        let past = (Utc::now() - chrono::Duration::seconds(120)).to_rfc2822();
        assert_eq!(extract_retry_after(&headers(&[("retry-after", &past)])), None);
        assert_eq!(extract_retry_after(&headers(&[("retry-after", "soon")])), None);
    }

    #[test]
    fn test_next_delay_caps_server_request() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 3);
        assert_eq!(
            next_delay(&policy, 2, None),
            (Duration::from_secs(2), BackoffType::Exponential)
        );
        assert_eq!(
            next_delay(&policy, 1, Some(Duration::from_secs(3600))),
            (Duration::from_secs(60), BackoffType::ServerRequested)
        );
    }
}
