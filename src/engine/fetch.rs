//! Paginated fetch loop shared by every connector
//!
//! `fetch_pages` issues one request per page and stops on the first of:
//! paginator exhausted, empty page, repeated continuation, boundary crossed,
//! page cap, record cap.

use crate::decode::RecordDecoder;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::pagination::{NextPage, PaginationState, Paginator};
use crate::partition::parse_datetime;
use crate::types::{lenient_i64, value_at, Method};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Default cap on pages per loop
pub const DEFAULT_MAX_PAGES: usize = 1000;

// ============================================================================
// Request
// ============================================================================

/// The request repeated for every page
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub method: Method,
    /// Path relative to the client's base URL, or an absolute URL
    pub url: String,
    /// Query parameters sent on every page; pagination params are merged on top
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl PageRequest {
    /// GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// POST request with a JSON body
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            ..Self::default()
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key.into(), value.to_string());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    fn request_config(&self, page_params: &HashMap<String, String>) -> RequestConfig {
        let mut config = RequestConfig::new().queries(&self.query).queries(page_params);
        for (key, value) in &self.headers {
            config = config.header(key, value);
        }
        if let Some(body) = &self.body {
            config = config.json(body.clone());
        }
        config
    }
}

// ============================================================================
// Boundary
// ============================================================================

/// A lower bound on records; the first record outside it ends the loop
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Boundary {
    #[default]
    None,
    /// Keep records whose `field` is strictly greater than `floor`
    Block { field: String, floor: i64 },
    /// Keep records whose `field` is at or after `floor`
    Timestamp { field: String, floor: DateTime<Utc> },
}

impl Boundary {
    /// Block-height boundary
    pub fn block(field: impl Into<String>, floor: i64) -> Self {
        Self::Block {
            field: field.into(),
            floor,
        }
    }

    /// Timestamp boundary
    pub fn timestamp(field: impl Into<String>, floor: DateTime<Utc>) -> Self {
        Self::Timestamp {
            field: field.into(),
            floor,
        }
    }

    /// Whether a record falls inside the boundary.
    ///
    /// Records without a readable value for the field are kept.
    pub fn admits(&self, record: &Value) -> bool {
        match self {
            Self::None => true,
            Self::Block { field, floor } => {
                lenient_i64(value_at(record, field)).map_or(true, |height| height > *floor)
            }
            Self::Timestamp { field, floor } => {
                record_time(value_at(record, field)).map_or(true, |ts| ts >= *floor)
            }
        }
    }
}

/// Read a timestamp that may be RFC 3339, a naive date/time, or unix seconds
pub fn record_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
            Utc.timestamp_opt(secs, 0).single()
        }
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
            Err(_) => parse_datetime(s).ok(),
        },
        _ => None,
    }
}

// ============================================================================
// Options and outcome
// ============================================================================

/// Knobs for one fetch loop
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Stop after this many pages (`None` = unlimited)
    pub max_pages: Option<usize>,
    pub boundary: Boundary,
    /// Stop on a page with no records
    pub stop_on_empty: bool,
    /// Stop once this many records are collected
    pub max_records: Option<usize>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_pages: Some(DEFAULT_MAX_PAGES),
            boundary: Boundary::None,
            stop_on_empty: true,
            max_records: None,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_pages(mut self, max: Option<usize>) -> Self {
        self.max_pages = max;
        self
    }

    #[must_use]
    pub fn boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    #[must_use]
    pub fn stop_on_empty(mut self, stop: bool) -> Self {
        self.stop_on_empty = stop;
        self
    }

    #[must_use]
    pub fn max_records(mut self, max: Option<usize>) -> Self {
        self.max_records = max;
        self
    }
}

/// Why a fetch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The paginator reported no further pages
    Exhausted,
    EmptyPage,
    /// The paginator handed back a continuation already used in this loop
    RepeatedCursor,
    BoundaryReached,
    MaxPages,
    MaxRecords,
}

/// Records collected by one loop
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<Value>,
    pub pages: usize,
    pub stop_reason: StopReason,
}

// ============================================================================
// Loop
// ============================================================================

/// Fetch every page of `request` until a stop condition fires
pub async fn fetch_pages(
    client: &HttpClient,
    request: &PageRequest,
    decoder: &dyn RecordDecoder,
    paginator: &dyn Paginator,
    options: &FetchOptions,
) -> Result<FetchOutcome> {
    let mut state = PaginationState::new();
    let mut page_params = paginator.initial_params(&state);
    let mut seen = HashSet::new();
    if let Some(first) = NextPage::with_params(page_params.clone()).fingerprint() {
        if !first.is_empty() {
            seen.insert(first);
        }
    }

    let mut records = Vec::new();
    let mut pages = 0;

    let stop_reason = loop {
        let response = client
            .request(
                request.method.into(),
                &request.url,
                request.request_config(&page_params),
            )
            .await?;
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| Error::decode(format!("Failed to read response body: {e}")))?;
        pages += 1;

        let raw = decoder.decode_raw(&body)?;
        let mut page = decoder.extract(&raw)?;
        let count = page.len();
        debug!(url = %request.url, page = pages, records = count, "Fetched page");

        if count == 0 && options.stop_on_empty {
            break StopReason::EmptyPage;
        }

        page.retain(|record| options.boundary.admits(record));
        let crossed = page.len() < count;
        records.extend(page);
        if crossed {
            break StopReason::BoundaryReached;
        }

        match paginator.process_response(&raw, &headers, count, &mut state) {
            NextPage::Done => break StopReason::Exhausted,
            next @ NextPage::Continue { .. } => {
                if let Some(fingerprint) = next.fingerprint() {
                    if !seen.insert(fingerprint.clone()) {
                        warn!(
                            url = %request.url,
                            continuation = %fingerprint,
                            "Pagination returned a continuation already used, stopping"
                        );
                        break StopReason::RepeatedCursor;
                    }
                }
                if let NextPage::Continue { query_params } = next {
                    page_params = query_params;
                }
            }
        }

        if options.max_pages.is_some_and(|max| pages >= max) {
            break StopReason::MaxPages;
        }
        if options.max_records.is_some_and(|max| records.len() >= max) {
            break StopReason::MaxRecords;
        }
    };

    if let Some(max) = options.max_records {
        records.truncate(max);
    }

    debug!(
        url = %request.url,
        pages,
        records = records.len(),
        reason = ?stop_reason,
        "Fetch loop finished"
    );

    Ok(FetchOutcome {
        records,
        pages,
        stop_reason,
    })
}

/// Fetch a single page and decode it
pub async fn fetch_one(
    client: &HttpClient,
    request: &PageRequest,
    decoder: &dyn RecordDecoder,
) -> Result<Vec<Value>> {
    let response = client
        .request(
            request.method.into(),
            &request.url,
            request.request_config(&HashMap::new()),
        )
        .await?;
    let body = response
        .text()
        .await
        .map_err(|e| Error::decode(format!("Failed to read response body: {e}")))?;
    decoder.decode(&body)
}

/// Fetch a single page as raw JSON
pub async fn fetch_json(client: &HttpClient, request: &PageRequest) -> Result<Value> {
    let response = client
        .request(
            request.method.into(),
            &request.url,
            request.request_config(&HashMap::new()),
        )
        .await?;
    let body = response
        .text()
        .await
        .map_err(|e| Error::decode(format!("Failed to read response body: {e}")))?;
    serde_json::from_str(&body).map_err(|e| Error::decode(format!("Failed to parse JSON: {e}")))
}
