//! Pagination strategy implementations
//!
//! Each strategy handles a specific pagination pattern.

use super::types::{should_stop, NextPage, PaginationState, Paginator, StopCondition};
use crate::types::{value_at, value_to_string};
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Cursor Pagination
// ============================================================================

/// Cursor-based pagination
///
/// Uses a token from the response to fetch the next page:
/// - Luma: `cursor` from `next_cursor`
/// - Reddit: `after` from `data.after`
/// - Twitter: `pagination_token` from `meta.next_token`
/// - YouTube: `pageToken` from `nextPageToken`
#[derive(Debug, Clone)]
pub struct CursorPaginator {
    /// Query parameter name for cursor
    pub cursor_param: String,
    /// Dotted path to the cursor in the response
    pub cursor_path: String,
    /// Stop condition
    pub stop_condition: StopCondition,
}

impl CursorPaginator {
    /// Create a new cursor paginator
    pub fn new(cursor_param: impl Into<String>, cursor_path: impl Into<String>) -> Self {
        Self {
            cursor_param: cursor_param.into(),
            cursor_path: cursor_path.into(),
            stop_condition: StopCondition::EmptyPage,
        }
    }

    /// Set stop condition
    #[must_use]
    pub fn with_stop_condition(mut self, condition: StopCondition) -> Self {
        self.stop_condition = condition;
        self
    }
}

impl Paginator for CursorPaginator {
    fn initial_params(&self, state: &PaginationState) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(cursor) = &state.cursor {
            params.insert(self.cursor_param.clone(), cursor.clone());
        }
        params
    }

    fn process_response(
        &self,
        body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);

        if should_stop(&self.stop_condition, body, records_count, state) {
            state.mark_done();
            return NextPage::Done;
        }

        match value_at(body, &self.cursor_path).and_then(value_to_string) {
            Some(cursor) if !cursor.is_empty() => {
                state.set_cursor(cursor.clone());
                NextPage::with_param(&self.cursor_param, cursor)
            }
            _ => {
                state.mark_done();
                NextPage::Done
            }
        }
    }
}

// ============================================================================
// Offset Pagination
// ============================================================================

/// Offset-based pagination (`?offset=100&limit=100`)
#[derive(Debug, Clone)]
pub struct OffsetPaginator {
    /// Query parameter name for offset
    pub offset_param: String,
    /// Query parameter name for limit
    pub limit_param: String,
    /// Number of records per page
    pub limit_value: u32,
    /// Stop condition
    pub stop_condition: StopCondition,
}

impl OffsetPaginator {
    /// Create a new offset paginator
    pub fn new(
        offset_param: impl Into<String>,
        limit_param: impl Into<String>,
        limit_value: u32,
        stop_condition: StopCondition,
    ) -> Self {
        Self {
            offset_param: offset_param.into(),
            limit_param: limit_param.into(),
            limit_value,
            stop_condition,
        }
    }

    fn params(&self, offset: u32) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert(self.offset_param.clone(), offset.to_string());
        params.insert(self.limit_param.clone(), self.limit_value.to_string());
        params
    }
}

impl Paginator for OffsetPaginator {
    fn initial_params(&self, state: &PaginationState) -> HashMap<String, String> {
        self.params(state.offset)
    }

    fn process_response(
        &self,
        body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);

        if should_stop(&self.stop_condition, body, records_count, state)
            || records_count < self.limit_value as usize
        {
            state.mark_done();
            return NextPage::Done;
        }

        state.add_offset(self.limit_value);
        NextPage::with_params(self.params(state.offset))
    }
}

// ============================================================================
// Page Number Pagination
// ============================================================================

/// Page number pagination (`?page=2&offset=10000` on Etherscan)
#[derive(Debug, Clone)]
pub struct PageNumberPaginator {
    /// Query parameter name for page number
    pub page_param: String,
    /// First page number (usually 0 or 1)
    pub start_page: u32,
    /// Optional page size parameter name
    pub page_size_param: Option<String>,
    /// Page size value
    pub page_size: Option<u32>,
    /// Stop condition
    pub stop_condition: StopCondition,
}

impl PageNumberPaginator {
    /// Create a new page number paginator
    pub fn new(page_param: impl Into<String>, start_page: u32) -> Self {
        Self {
            page_param: page_param.into(),
            start_page,
            page_size_param: None,
            page_size: None,
            stop_condition: StopCondition::EmptyPage,
        }
    }

    /// Set page size parameter
    #[must_use]
    pub fn with_page_size(mut self, param: impl Into<String>, size: u32) -> Self {
        self.page_size_param = Some(param.into());
        self.page_size = Some(size);
        self
    }

    fn params(&self, page: u32) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert(self.page_param.clone(), page.to_string());
        if let (Some(param), Some(size)) = (&self.page_size_param, self.page_size) {
            params.insert(param.clone(), size.to_string());
        }
        params
    }
}

impl Paginator for PageNumberPaginator {
    fn initial_params(&self, state: &PaginationState) -> HashMap<String, String> {
        self.params(state.page.max(self.start_page))
    }

    fn process_response(
        &self,
        body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);
        if state.page < self.start_page {
            state.page = self.start_page;
        }

        if should_stop(&self.stop_condition, body, records_count, state) {
            state.mark_done();
            return NextPage::Done;
        }

        if let Some(size) = self.page_size {
            if records_count < size as usize {
                state.mark_done();
                return NextPage::Done;
            }
        }

        state.next_page();
        NextPage::with_params(self.params(state.page))
    }
}

// ============================================================================
// Params Object Pagination
// ============================================================================

/// Copies every key of a response object into the next request's query.
///
/// Blockscout returns `"next_page_params": {"block_number": 99, "items_count": 50}`
/// and expects those exact keys back; `null` means the last page.
#[derive(Debug, Clone)]
pub struct ParamsPaginator {
    /// Dotted path to the params object
    pub path: String,
}

impl ParamsPaginator {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Paginator for ParamsPaginator {
    fn initial_params(&self, _state: &PaginationState) -> HashMap<String, String> {
        HashMap::new()
    }

    fn process_response(
        &self,
        body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);

        let Some(Value::Object(map)) = value_at(body, &self.path) else {
            state.mark_done();
            return NextPage::Done;
        };

        let params: HashMap<String, String> = map
            .iter()
            .filter_map(|(k, v)| value_to_string(v).map(|s| (k.clone(), s)))
            .collect();

        if params.is_empty() {
            state.mark_done();
            return NextPage::Done;
        }

        state.next_page();
        NextPage::with_params(params)
    }
}

// ============================================================================
// Last Record Pagination
// ============================================================================

/// Next page keyed off the last record of the current page.
///
/// Mastodon timelines page backwards with `max_id=<id of last status>`.
#[derive(Debug, Clone)]
pub struct LastRecordPaginator {
    /// Query parameter to set
    pub param: String,
    /// Dotted path to the records array (empty for a top-level array)
    pub records_path: String,
    /// Field of the last record to use
    pub field: String,
}

impl LastRecordPaginator {
    pub fn new(
        param: impl Into<String>,
        records_path: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            param: param.into(),
            records_path: records_path.into(),
            field: field.into(),
        }
    }
}

impl Paginator for LastRecordPaginator {
    fn initial_params(&self, _state: &PaginationState) -> HashMap<String, String> {
        HashMap::new()
    }

    fn process_response(
        &self,
        body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);

        let last = value_at(body, &self.records_path)
            .and_then(Value::as_array)
            .and_then(|arr| arr.last())
            .and_then(|rec| rec.get(&self.field))
            .and_then(value_to_string);

        match last {
            Some(id) if records_count > 0 => {
                state.set_cursor(id.clone());
                NextPage::with_param(&self.param, id)
            }
            _ => {
                state.mark_done();
                NextPage::Done
            }
        }
    }
}

// ============================================================================
// No Pagination
// ============================================================================

/// No pagination - single request
#[derive(Debug, Clone, Default)]
pub struct NoPaginator;

impl Paginator for NoPaginator {
    fn initial_params(&self, _state: &PaginationState) -> HashMap<String, String> {
        HashMap::new()
    }

    fn process_response(
        &self,
        _body: &Value,
        _headers: &HeaderMap,
        records_count: usize,
        state: &mut PaginationState,
    ) -> NextPage {
        state.add_fetched(records_count as u64);
        state.mark_done();
        NextPage::Done
    }
}
