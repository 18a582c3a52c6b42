//! Tests for engine module

use super::*;
use crate::decode::JsonDecoder;
use crate::error::Error;
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::{
    CursorPaginator, LastRecordPaginator, NoPaginator, OffsetPaginator, ParamsPaginator,
    StopCondition,
};
use crate::state::State;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpClient {
    HttpClient::with_config(
        HttpClientConfig::builder()
            .base_url(server.uri())
            .max_retries(0)
            .no_rate_limit()
            .build(),
    )
    .unwrap()
}

// ============================================================================
// Message Tests
// ============================================================================

#[test]
fn test_message_kinds() {
    assert!(Message::record("events", json!({"id": 1})).is_record());
    assert!(Message::state("events", json!({})).is_state());
    assert!(Message::info("hi").is_log());
    assert!(Message::warn("careful").is_log());
    assert!(!Message::error("boom").is_record());
}

#[test]
fn test_message_protocol_record() {
    let msg = Message::Record {
        stream: "events".to_string(),
        data: json!({"api_id": "evt-1"}),
        emitted_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    };
    assert_eq!(
        msg.to_protocol(),
        json!({
            "type": "RECORD",
            "record": {"stream": "events", "data": {"api_id": "evt-1"}, "emitted_at": 1_704_067_200_000_i64}
        })
    );
}

#[test]
fn test_message_protocol_state_and_log() {
    let state = Message::state("blocks", json!({"cursor": 10})).to_protocol();
    assert_eq!(state["type"], "STATE");
    assert_eq!(state["state"]["stream"]["stream_descriptor"]["name"], "blocks");
    assert_eq!(state["state"]["stream"]["stream_state"]["cursor"], 10);

    let log = Message::warn("cursor loop").to_protocol();
    assert_eq!(log, json!({"type": "LOG", "log": {"level": "WARN", "message": "cursor loop"}}));
}

// ============================================================================
// SyncConfig / SyncStats Tests
// ============================================================================

#[test]
fn test_sync_config_builder() {
    let config = SyncConfig::new()
        .with_batch_size(0)
        .with_state_per_page(true)
        .with_max_records(10)
        .with_fail_fast(false);

    assert_eq!(config.batch_size, 1);
    assert!(config.emit_state_per_page);
    assert_eq!(config.max_records, 10);
    assert!(!config.fail_fast);
    assert!(SyncConfig::default().fail_fast);
}

#[test]
fn test_sync_stats_accumulate() {
    let mut stats = SyncStats::new();
    stats.add_records(5);
    stats.add_pages(2);
    stats.add_stream();
    stats.add_partitions(3);
    stats.add_error();
    stats.set_duration(12);

    assert_eq!(
        stats,
        SyncStats {
            records_synced: 5,
            pages_fetched: 2,
            streams_synced: 1,
            partitions_synced: 3,
            errors: 1,
            duration_ms: 12,
        }
    );
}

// ============================================================================
// Boundary Tests
// ============================================================================

#[test]
fn test_block_boundary_is_strict() {
    let boundary = Boundary::block("height", 100);
    assert!(boundary.admits(&json!({"height": 101})));
    assert!(!boundary.admits(&json!({"height": 100})));
    assert!(boundary.admits(&json!({"height": "150"})));
    assert!(boundary.admits(&json!({"hash": "0x"})));
}

#[test]
fn test_timestamp_boundary_is_inclusive() {
    let floor = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let boundary = Boundary::timestamp("created_at", floor);

    assert!(boundary.admits(&json!({"created_at": "2024-05-01T00:00:00Z"})));
    assert!(boundary.admits(&json!({"created_at": "2024-05-01T00:00:00.000+00:00"})));
    assert!(!boundary.admits(&json!({"created_at": "2024-04-30T23:59:59Z"})));
    assert!(boundary.admits(&json!({"created_at": 1_714_521_600})));
    assert!(!boundary.admits(&json!({"created_at": "1714521599"})));
    assert!(boundary.admits(&json!({"created_at": "2024-05-02 10:00:00"})));
}

#[test]
fn test_record_time_variants() {
    let expected = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    assert_eq!(record_time(Some(&json!(1_714_521_600))), Some(expected));
    assert_eq!(record_time(Some(&json!("2024-05-01"))), Some(expected));
    assert_eq!(record_time(Some(&json!(null))), None);
    assert_eq!(record_time(None), None);
}

// ============================================================================
// Fetch Loop Tests
// ============================================================================

#[tokio::test]
async fn test_fetch_pages_cursor_until_has_more_false() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/list-events"))
        .and(query_param_is_missing("pagination_cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{"api_id": "a"}, {"api_id": "b"}],
            "has_more": true,
            "next_cursor": "c1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendar/list-events"))
        .and(query_param("pagination_cursor", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{"api_id": "c"}],
            "has_more": false,
            "next_cursor": "c2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let paginator = CursorPaginator::new("pagination_cursor", "next_cursor")
        .with_stop_condition(StopCondition::field("has_more", false));
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("calendar/list-events"),
        &JsonDecoder::with_path("entries"),
        &paginator,
        &FetchOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.stop_reason, StopReason::Exhausted);
}

#[tokio::test]
async fn test_fetch_pages_repeated_cursor_stops() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event/get-guests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{"api_id": "g1"}],
            "has_more": true,
            "next_cursor": "same"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("event/get-guests").query("event_api_id", "evt-1"),
        &JsonDecoder::with_path("entries"),
        &CursorPaginator::new("pagination_cursor", "next_cursor"),
        &FetchOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::RepeatedCursor);
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn test_fetch_pages_empty_page_stops() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/tag/rust"))
        .and(query_param_is_missing("max_id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "30"}, {"id": "29"}])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/tag/rust"))
        .and(query_param("max_id", "29"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("api/v1/timelines/tag/rust").query("limit", 40),
        &JsonDecoder::new(),
        &LastRecordPaginator::new("max_id", "", "id"),
        &FetchOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::EmptyPage);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.pages, 2);
}

#[tokio::test]
async fn test_fetch_pages_block_boundary_keeps_passing_records() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/blocks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"height": 12}, {"height": 11}, {"height": 10}, {"height": 9}],
            "next_page_params": {"block_number": 9, "items_count": 50}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("api/v2/blocks"),
        &JsonDecoder::with_path("items"),
        &ParamsPaginator::new("next_page_params"),
        &FetchOptions::default().boundary(Boundary::block("height", 10)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::BoundaryReached);
    assert_eq!(
        outcome.records,
        vec![json!({"height": 12}), json!({"height": 11})]
    );
}

#[tokio::test]
async fn test_fetch_pages_max_pages_cap() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rawaddr/bc1q"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "n_tx": 10_000,
            "txs": [{"hash": "h1"}, {"hash": "h2"}]
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("rawaddr/bc1q"),
        &JsonDecoder::with_path("txs"),
        &OffsetPaginator::new("offset", "limit", 2, StopCondition::total_count("n_tx")),
        &FetchOptions::default().max_pages(Some(3)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxPages);
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.records.len(), 6);
}

#[tokio::test]
async fn test_fetch_pages_max_records_truncates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"after": "t3_next", "children": [{"id": 1}, {"id": 2}, {"id": 3}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = fetch_pages(
        &client,
        &PageRequest::get("r/rust/new"),
        &JsonDecoder::with_path("data.children"),
        &CursorPaginator::new("after", "data.after"),
        &FetchOptions::default().max_records(Some(2)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxRecords);
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn test_fetch_pages_propagates_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = fetch_pages(
        &client,
        &PageRequest::get("stats"),
        &JsonDecoder::new(),
        &NoPaginator,
        &FetchOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 403, .. }));
}

#[tokio::test]
async fn test_fetch_pages_post_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/prices/v1/key/tokens/historical"))
        .and(wiremock::matchers::body_partial_json(json!({"symbol": "ETH"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"value": "3000.1", "timestamp": "2024-01-01T00:00:00Z"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = fetch_one(
        &client,
        &PageRequest::post("prices/v1/key/tokens/historical", json!({"symbol": "ETH"})),
        &JsonDecoder::with_path("data"),
    )
    .await
    .unwrap();

    assert_eq!(records.len(), 1);
}

// ============================================================================
// Cursor helpers
// ============================================================================

#[test]
fn test_max_cursor_numeric_not_lexicographic() {
    let records = vec![
        json!({"blockNumber": "9"}),
        json!({"blockNumber": "10"}),
        json!({"blockNumber": "100"}),
    ];
    assert_eq!(max_cursor(&records, "blockNumber"), Some(json!("100")));

    let records = vec![json!({"update_id": 9}), json!({"update_id": 11})];
    assert_eq!(max_cursor(&records, "update_id"), Some(json!(11)));
}

#[test]
fn test_max_cursor_timestamps_and_missing() {
    let records = vec![
        json!({"published_at": "2024-02-01T00:00:00Z"}),
        json!({"published_at": null}),
        json!({"published_at": "2024-03-01T00:00:00Z"}),
        json!({}),
    ];
    assert_eq!(
        max_cursor(&records, "published_at"),
        Some(json!("2024-03-01T00:00:00Z"))
    );
    assert_eq!(max_cursor(&[], "published_at"), None);
}

// ============================================================================
// SyncEngine Tests
// ============================================================================

struct FixedStream {
    name: &'static str,
    cursor: Option<&'static str>,
    records: Vec<Value>,
    fail: bool,
}

#[async_trait]
impl SourceStream for FixedStream {
    fn name(&self) -> &str {
        self.name
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        self.cursor
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        if self.fail {
            return Err(Error::api("Fixed", "upstream down"));
        }
        ctx.add_pages(1);
        ctx.update_partition(self.name, "wallet-a", json!(42));
        if self.records.is_empty() {
            ctx.warn(format!("{} returned nothing", self.name));
        }
        Ok(self.records.clone())
    }
}

fn fixed(name: &'static str, cursor: Option<&'static str>, n: i64) -> FixedStream {
    FixedStream {
        name,
        cursor,
        records: (1..=n).map(|i| json!({"id": i, "seq": i * 10})).collect(),
        fail: false,
    }
}

#[tokio::test]
async fn test_sync_stream_emits_records_and_state() {
    let mut engine = SyncEngine::new(StateManager::in_memory());
    let stream = fixed("messages", Some("seq"), 3);

    let messages = engine
        .sync_stream(&stream, SyncMode::Incremental)
        .await
        .unwrap();

    let records: Vec<_> = messages.iter().filter(|m| m.is_record()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(engine.state().get_cursor("messages").await, Some(json!(30)));
    assert_eq!(
        engine
            .state()
            .get_partition_cursor("messages", "wallet-a")
            .await,
        Some(json!(42))
    );

    let state_msg = messages.iter().find(|m| m.is_state()).unwrap();
    match state_msg {
        Message::State { stream, data } => {
            assert_eq!(stream, "messages");
            assert_eq!(data["cursor"], 30);
            assert_eq!(data["partitions"]["wallet-a"]["cursor"], 42);
        }
        _ => unreachable!(),
    }

    assert_eq!(engine.stats().records_synced, 3);
    assert_eq!(engine.stats().pages_fetched, 1);
    assert_eq!(engine.stats().streams_synced, 1);
}

#[tokio::test]
async fn test_sync_stream_cursor_never_moves_backwards() {
    let state: State =
        serde_json::from_str(r#"{"streams": {"messages": {"cursor": 500}}}"#).unwrap();
    let mut engine = SyncEngine::new(StateManager::from_state(state));

    engine
        .sync_stream(&fixed("messages", Some("seq"), 2), SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(engine.state().get_cursor("messages").await, Some(json!(500)));
}

#[tokio::test]
async fn test_sync_stream_max_records_and_state_per_chunk() {
    let mut engine = SyncEngine::new(StateManager::in_memory()).with_config(
        SyncConfig::new()
            .with_batch_size(2)
            .with_max_records(5)
            .with_state_per_page(true),
    );

    let messages = engine
        .sync_stream(&fixed("posts", Some("seq"), 9), SyncMode::FullRefresh)
        .await
        .unwrap();

    assert_eq!(messages.iter().filter(|m| m.is_record()).count(), 5);
    // three chunks plus the final state
    assert_eq!(messages.iter().filter(|m| m.is_state()).count(), 4);
    assert_eq!(engine.state().get_cursor("posts").await, Some(json!(50)));
}

struct AdvancingStream;

#[async_trait]
impl SourceStream for AdvancingStream {
    fn name(&self) -> &str {
        "updates"
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("seq")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        ctx.advance_cursor(json!(90));
        ctx.advance_cursor(json!(70));
        Ok(vec![json!({"id": 1, "seq": 20})])
    }
}

#[tokio::test]
async fn test_sync_stream_keeps_advanced_cursor() {
    let mut engine = SyncEngine::new(StateManager::in_memory());

    let messages = engine
        .sync_stream(&AdvancingStream, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(messages.iter().filter(|m| m.is_record()).count(), 1);
    assert_eq!(engine.state().get_cursor("updates").await, Some(json!(90)));
}

#[test]
fn test_take_cursor_advance_keeps_highest() {
    let ctx = StreamContext::full_refresh();
    assert_eq!(ctx.take_cursor_advance(), None);
    ctx.advance_cursor(json!("2024-01-02"));
    ctx.advance_cursor(json!("2024-01-01"));
    assert_eq!(ctx.take_cursor_advance(), Some(json!("2024-01-02")));
    assert_eq!(ctx.take_cursor_advance(), None);
}

#[tokio::test]
async fn test_sync_stream_without_cursor_field_keeps_no_cursor() {
    let mut engine = SyncEngine::new(StateManager::in_memory());
    engine
        .sync_stream(&fixed("guild", None, 1), SyncMode::FullRefresh)
        .await
        .unwrap();
    assert!(engine.state().get_cursor("guild").await.is_none());
}

#[tokio::test]
async fn test_sync_streams_continues_when_not_fail_fast() {
    let mut engine = SyncEngine::new(StateManager::in_memory())
        .with_config(SyncConfig::new().with_fail_fast(false));
    let broken = FixedStream {
        fail: true,
        ..fixed("broken", None, 0)
    };
    let healthy = fixed("healthy", None, 2);

    let messages = engine
        .sync_streams(&[
            (&broken as &dyn SourceStream, SyncMode::FullRefresh),
            (&healthy as &dyn SourceStream, SyncMode::FullRefresh),
        ])
        .await
        .unwrap();

    assert_eq!(messages.iter().filter(|m| m.is_record()).count(), 2);
    assert!(messages.iter().any(|m| matches!(
        m,
        Message::Log { level: LogLevel::Error, message } if message.contains("broken")
    )));
    assert_eq!(engine.stats().errors, 1);
}

#[tokio::test]
async fn test_sync_streams_fail_fast_returns_error() {
    let mut engine = SyncEngine::new(StateManager::in_memory());
    let broken = FixedStream {
        fail: true,
        ..fixed("broken", None, 0)
    };
    let healthy = fixed("healthy", None, 2);

    let err = engine
        .sync_streams(&[
            (&broken as &dyn SourceStream, SyncMode::FullRefresh),
            (&healthy as &dyn SourceStream, SyncMode::FullRefresh),
        ])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("upstream down"));
    assert_eq!(engine.stats().streams_synced, 0);
}

#[test]
fn test_catalog_entry_from_stream() {
    let entry = fixed("messages", Some("seq"), 0).catalog_entry();
    assert_eq!(entry.name, "messages");
    assert_eq!(
        entry.supported_sync_modes,
        vec![SyncMode::FullRefresh, SyncMode::Incremental]
    );
    assert_eq!(entry.default_cursor_field, Some(vec!["seq".to_string()]));
    assert_eq!(
        entry.source_defined_primary_key,
        Some(vec![vec!["id".to_string()]])
    );
}

#[tokio::test]
async fn test_sync_stream_forwards_context_logs() {
    let mut engine = SyncEngine::new(StateManager::in_memory());
    let stream = fixed("quiet", None, 0);

    let messages = engine
        .sync_stream(&stream, SyncMode::FullRefresh)
        .await
        .unwrap();

    assert!(messages.iter().any(|m| matches!(
        m,
        Message::Log { level: LogLevel::Warn, message } if message == "quiet returned nothing"
    )));
}

#[test]
fn test_record_fetch_logs_repeated_cursor() {
    let ctx = StreamContext::full_refresh();
    ctx.record_fetch(
        &FetchOutcome {
            records: vec![],
            pages: 4,
            stop_reason: StopReason::RepeatedCursor,
        },
        "event evt-1",
    );
    ctx.record_fetch(
        &FetchOutcome {
            records: vec![],
            pages: 1,
            stop_reason: StopReason::Exhausted,
        },
        "event evt-2",
    );

    assert_eq!(ctx.pages(), 5);
    let logs = ctx.drain_logs();
    assert_eq!(logs.len(), 1);
    assert!(matches!(&logs[0], Message::Log { message, .. } if message.contains("evt-1")));
    assert!(ctx.drain_logs().is_empty());
}
