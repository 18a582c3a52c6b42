//! Luma events and guests
//!
//! Guests are fetched per event; the event list is read once per sync and
//! each distinct event id gets its own page loop.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::JsonDecoder;
use crate::engine::{fetch_pages, FetchOptions, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig, RetryPolicy};
use crate::pagination::{CursorPaginator, StopCondition};
use crate::partition::ParentRouter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const BASE_URL: &str = "https://public-api.luma.com/v1/";

#[derive(Debug, Clone, Deserialize)]
pub struct LumaConfig {
    pub api_key: String,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

fn client(config: &LumaConfig) -> Result<Arc<HttpClient>> {
    let builder = HttpClientConfig::builder()
        .max_retries(5)
        .retry_policy(RetryPolicy::with_fallback(Duration::from_secs(30)))
        .request_delay(Duration::from_secs(2))
        .header("accept", "application/json");
    common::client(
        config.http.apply(builder, BASE_URL),
        AuthConfig::header_key("x-luma-api-key", None, &config.api_key),
    )
}

fn paginator() -> CursorPaginator {
    CursorPaginator::new("cursor", "next_cursor")
        .with_stop_condition(StopCondition::field("has_more", false))
}

// ============================================================================
// Streams
// ============================================================================

struct EventsStream {
    client: Arc<HttpClient>,
    fetched: OnceCell<Vec<Value>>,
}

impl EventsStream {
    async fn fetch(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let outcome = fetch_pages(
            &self.client,
            &PageRequest::get("calendar/list-events"),
            &JsonDecoder::with_path("entries"),
            &paginator(),
            &FetchOptions::new(),
        )
        .await?;
        ctx.record_fetch(&outcome, "events");
        Ok(outcome.records)
    }
}

#[async_trait]
impl SourceStream for EventsStream {
    fn name(&self) -> &str {
        "events"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["api_id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        self.fetched
            .get_or_try_init(|| self.fetch(ctx))
            .await
            .cloned()
    }
}

struct GuestsStream {
    client: Arc<HttpClient>,
    events: Arc<EventsStream>,
}

#[async_trait]
impl SourceStream for GuestsStream {
    fn name(&self) -> &str {
        "luma_guests_stream"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["api_id".to_string(), "event_api_id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let events = self.events.read(ctx).await?;
        let event_ids = ParentRouter::new(events, "api_id", "event_api_id").keys();
        ctx.info(format!("Reading guests for {} events", event_ids.len()));

        let mut guests = Vec::new();
        for event_id in &event_ids {
            let request = PageRequest::get("event/get-guests").query("event_api_id", event_id);
            let outcome = fetch_pages(
                &self.client,
                &request,
                &JsonDecoder::with_path("entries"),
                &paginator(),
                &FetchOptions::new(),
            )
            .await?;
            ctx.record_fetch(&outcome, &format!("event {event_id}"));

            let mut seen = HashSet::new();
            for guest in outcome.records {
                let key = guest.get("api_id").map(Value::to_string);
                if key.is_some_and(|k| !seen.insert(k)) {
                    continue;
                }
                guests.push(common::tag(guest, "event_api_id", event_id.as_str()));
            }
        }
        Ok(guests)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Luma;

#[async_trait]
impl Connector for Luma {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("luma", "Luma")
            .description("Luma calendar events and their guests")
            .property("api_key", PropertyConfig::string("Luma API key").required().secret())
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: LumaConfig = parse_config("luma", config)?;
        let client = client(&config)?;
        Ok(common::probe(&client, &PageRequest::get("calendar/list-events")).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: LumaConfig = parse_config("luma", config)?;
        let client = client(&config)?;
        let events = Arc::new(EventsStream {
            client: Arc::clone(&client),
            fetched: OnceCell::new(),
        });
        Ok(vec![
            Arc::clone(&events) as StreamRef,
            Arc::new(GuestsStream { client, events }),
        ])
    }
}
