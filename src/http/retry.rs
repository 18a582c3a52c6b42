//! Provider-specific throttling rules
//!
//! `RetryPolicy` decides how long to wait after a 429 or 5xx response.
//! `HeaderPause` reads rate-limit budget headers from successful responses
//! and pauses before the budget runs out.

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// How long to wait after throttling or server errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait used on 429 when neither the header nor the body says how long
    pub rate_limit_fallback: Duration,
    /// Regex applied to a 429 body; the first capture group is seconds
    pub body_hint: Option<Regex>,
    /// Fixed wait on retryable 5xx instead of the client backoff
    pub server_error_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_fallback: Duration::from_secs(60),
            body_hint: None,
            server_error_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with a specific 429 fallback wait
    pub fn with_fallback(fallback: Duration) -> Self {
        Self {
            rate_limit_fallback: fallback,
            ..Self::default()
        }
    }

    /// Look for a wait hint in the 429 body
    #[must_use]
    pub fn body_hint(mut self, pattern: Regex) -> Self {
        self.body_hint = Some(pattern);
        self
    }

    /// Use a fixed wait for server errors
    #[must_use]
    pub fn server_error_delay(mut self, delay: Duration) -> Self {
        self.server_error_delay = Some(delay);
        self
    }

    /// Resolve the wait for a 429: `Retry-After` header, then body hint, then fallback
    pub fn rate_limit_wait(&self, headers: &HeaderMap, body: &str) -> Duration {
        if let Some(secs) = retry_after_seconds(headers) {
            return Duration::from_secs(secs);
        }
        if let Some(secs) = self
            .body_hint
            .as_ref()
            .and_then(|re| re.captures(body))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            return Duration::from_secs(secs);
        }
        self.rate_limit_fallback
    }
}

/// Parse a numeric `Retry-After` header
pub fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|secs| secs.max(0.0).ceil() as u64)
}

/// Pause when a remaining-budget header drops below a threshold
#[derive(Debug, Clone)]
pub struct HeaderPause {
    pub remaining_header: String,
    pub reset_header: String,
    pub threshold: i64,
    /// Upper bound on a single pause
    pub max_pause: Duration,
}

impl Default for HeaderPause {
    fn default() -> Self {
        Self {
            remaining_header: "x-ratelimit-remaining".to_string(),
            reset_header: "x-ratelimit-reset".to_string(),
            threshold: 10,
            max_pause: Duration::from_secs(300),
        }
    }
}

impl HeaderPause {
    /// How long to sleep given the response headers, if at all
    pub fn pause_for(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
        let remaining: i64 = headers
            .get(self.remaining_header.as_str())?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        if remaining >= self.threshold {
            return None;
        }

        let reset = headers.get(self.reset_header.as_str())?.to_str().ok()?.trim();
        let reset_at = parse_reset(reset)?;
        let wait = (reset_at - now).to_std().ok()?;
        Some(wait.min(self.max_pause))
    }
}

fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let epoch = value.parse::<f64>().ok()?;
    DateTime::from_timestamp(epoch as i64, 0)
}

#[cfg(test)]
mod retry_tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_retry_after_header_wins() {
        let policy = RetryPolicy::with_fallback(Duration::from_secs(10))
            .body_hint(Regex::new(r"please wait (\d+) second").unwrap());
        let wait = policy.rate_limit_wait(&headers(&[("retry-after", "3")]), "please wait 7 seconds");
        assert_eq!(wait, Duration::from_secs(3));
    }

    #[test]
    fn test_body_hint_then_fallback() {
        let policy = RetryPolicy::with_fallback(Duration::from_secs(10))
            .body_hint(Regex::new(r"please wait (\d+) second").unwrap());
        assert_eq!(
            policy.rate_limit_wait(&HeaderMap::new(), "Too many: please wait 7 seconds"),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.rate_limit_wait(&HeaderMap::new(), "slow down"),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_default_fallback_is_sixty_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.rate_limit_wait(&HeaderMap::new(), ""),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_header_pause_below_threshold() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let pause = HeaderPause::default();
        let h = headers(&[
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-reset", "2024-05-01T10:00:30.000Z"),
        ]);
        assert_eq!(pause.pause_for(&h, now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_header_pause_not_needed() {
        let now = Utc::now();
        let pause = HeaderPause::default();
        let h = headers(&[("x-ratelimit-remaining", "250")]);
        assert_eq!(pause.pause_for(&h, now), None);
        assert_eq!(pause.pause_for(&HeaderMap::new(), now), None);
    }

    #[test]
    fn test_header_pause_epoch_reset_is_capped() {
        let now = DateTime::from_timestamp(1_000, 0).unwrap();
        let pause = HeaderPause {
            max_pause: Duration::from_secs(5),
            ..HeaderPause::default()
        };
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "2000")]);
        assert_eq!(pause.pause_for(&h, now), Some(Duration::from_secs(5)));
    }
}
