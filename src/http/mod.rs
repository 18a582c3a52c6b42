//! HTTP client module
//!
//! Provides the HTTP client every connector uses.
//!
//! # Features
//!
//! - **Automatic Retries**: configurable retry logic with backoff
//! - **Throttling**: `Retry-After`, body hints and per-provider fallbacks on 429
//! - **Rate Limiting**: governor token bucket or fixed request spacing
//! - **Authentication**: integration with the auth module

mod client;
mod rate_limit;
mod retry;

pub use client::{HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{retry_after_seconds, HeaderPause, RetryPolicy};
