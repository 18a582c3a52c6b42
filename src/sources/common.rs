//! Helpers shared by the connectors

use crate::auth::AuthConfig;
use crate::connector::CheckResult;
use crate::engine::{fetch_json, PageRequest};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfigBuilder, RateLimiterConfig};
use crate::types::value_at;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Connection overrides every connector config accepts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpOverrides {
    /// Replace the provider's base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Replace the provider's fixed delay between requests
    #[serde(default)]
    pub request_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Replace the provider's minimum spacing between requests; 0 disables it
    #[serde(default)]
    pub min_interval_ms: Option<u64>,
}

impl HttpOverrides {
    /// Base URL, falling back to the provider default
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    /// Point `builder` at the base URL and apply the delay and retry overrides
    pub fn apply(
        &self,
        builder: HttpClientConfigBuilder,
        default_base: &str,
    ) -> HttpClientConfigBuilder {
        let mut builder = builder.base_url(self.base_url_or(default_base));
        if let Some(ms) = self.request_delay_ms {
            builder = builder.request_delay(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            builder = builder.max_retries(retries);
        }
        match self.min_interval_ms {
            Some(0) => builder = builder.no_rate_limit(),
            Some(ms) => {
                builder = builder.rate_limit(RateLimiterConfig::min_interval(Duration::from_millis(ms)));
            }
            None => {}
        }
        builder
    }
}

/// Build a shared client
pub fn client(builder: HttpClientConfigBuilder, auth: AuthConfig) -> Result<Arc<HttpClient>> {
    Ok(Arc::new(HttpClient::with_auth(builder.build(), auth)?))
}

/// One request; success if it returns 2xx
pub async fn probe(client: &HttpClient, request: &PageRequest) -> CheckResult {
    CheckResult::from_probe(fetch_json(client, request).await)
}

/// Copy selected dotted paths into a flat object keyed by the last path segment
pub fn select(record: &Value, paths: &[&str]) -> Value {
    let mut out = Map::new();
    for path in paths {
        let key = path.rsplit('.').next().unwrap_or(path);
        out.insert(
            key.to_string(),
            value_at(record, path).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

/// Set `key` on an object record
pub fn tag(mut record: Value, key: &str, value: impl Into<Value>) -> Value {
    if let Value::Object(obj) = &mut record {
        obj.insert(key.to_string(), value.into());
    }
    record
}

/// Oldest instant kept by a window of `days` ending on `today`.
///
/// `days <= 0` means no window; a window reaching past the calendar's range
/// is an invalid `days` value.
pub fn window_start(today: NaiveDate, days: i64) -> Result<Option<DateTime<Utc>>> {
    if days <= 0 {
        return Ok(None);
    }
    let first_day = TimeDelta::try_days(days - 1)
        .and_then(|span| today.checked_sub_signed(span))
        .ok_or_else(|| Error::invalid_value("days", format!("{days} days is out of range")))?;
    Ok(Some(first_day.and_time(NaiveTime::MIN).and_utc()))
}

/// Percent-encode `raw` as one URL path segment
pub fn path_segment(raw: &str) -> Result<String> {
    let mut url = Url::parse("http://localhost/")?;
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(raw);
    }
    Ok(url.path().trim_start_matches('/').to_string())
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
