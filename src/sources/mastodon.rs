//! Mastodon tag and account timelines
//!
//! Timelines page backwards with `max_id` set to the last status id. Reading
//! stops on an empty page or at the first status older than the window of
//! `days` (today included). `days <= 0` reads the whole timeline.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::JsonDecoder;
use crate::engine::{
    fetch_json, fetch_pages, record_time, Boundary, FetchOptions, PageRequest, SourceStream,
    StreamContext,
};
use crate::error::{Error, Result};
use crate::http::{HeaderPause, HttpClient, HttpClientConfig};
use crate::pagination::LastRecordPaginator;
use crate::types::value_to_string;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const PAGE_LIMIT: u32 = 40;

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonConfig {
    /// Instance root, e.g. `https://mastodon.social`
    pub url_base: String,
    pub access_token: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Account handles resolved through `accounts/lookup`
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub days: i64,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

/// Shared timeline reader
struct Timeline {
    client: Arc<HttpClient>,
    days: i64,
}

impl Timeline {
    fn boundary(&self, ctx: &StreamContext, stream: &str) -> Result<Boundary> {
        let window = common::window_start(Utc::now().date_naive(), self.days)?;
        let synced = ctx
            .is_incremental()
            .then(|| record_time(ctx.stream_cursor(stream)))
            .flatten();
        Ok(match window.into_iter().chain(synced).max() {
            Some(floor) => Boundary::timestamp("created_at", floor),
            None => Boundary::None,
        })
    }

    async fn read(
        &self,
        ctx: &StreamContext,
        stream: &str,
        path: &str,
        what: &str,
    ) -> Result<Vec<Value>> {
        let outcome = fetch_pages(
            &self.client,
            &PageRequest::get(path).query("limit", PAGE_LIMIT),
            &JsonDecoder::new(),
            &LastRecordPaginator::new("max_id", "", "id"),
            &FetchOptions::new().boundary(self.boundary(ctx, stream)?),
        )
        .await?;
        ctx.record_fetch(&outcome, what);
        Ok(outcome
            .records
            .into_iter()
            .map(|post| common::tag(post, "timezone", "UTC"))
            .collect())
    }
}

// ============================================================================
// Streams
// ============================================================================

struct TagFeed {
    timeline: Arc<Timeline>,
    tags: Vec<String>,
}

#[async_trait]
impl SourceStream for TagFeed {
    fn name(&self) -> &str {
        "tag_feed"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("created_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for tag in &self.tags {
            let path = format!("api/v1/timelines/tag/{}", common::path_segment(tag)?);
            let posts = self
                .timeline
                .read(ctx, self.name(), &path, &format!("tag {tag}"))
                .await?;
            rows.extend(posts.into_iter().map(|post| common::tag(post, "api_tag", tag.as_str())));
        }
        Ok(rows)
    }
}

struct AccountFeed {
    timeline: Arc<Timeline>,
    accounts: Vec<String>,
}

impl AccountFeed {
    async fn lookup(&self, ctx: &StreamContext, account: &str) -> Result<String> {
        let request = PageRequest::get("api/v1/accounts/lookup").query("acct", account);
        let found = fetch_json(&self.timeline.client, &request).await?;
        ctx.add_pages(1);
        found
            .get("id")
            .and_then(value_to_string)
            .ok_or_else(|| Error::api("Mastodon", format!("No account id for {account}")))
    }
}

#[async_trait]
impl SourceStream for AccountFeed {
    fn name(&self) -> &str {
        "account_feed"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("created_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for account in &self.accounts {
            let id = self.lookup(ctx, account).await?;
            let path = format!("api/v1/accounts/{}/statuses", common::path_segment(&id)?);
            rows.extend(
                self.timeline
                    .read(ctx, self.name(), &path, &format!("account {account}"))
                    .await?,
            );
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

fn client(config: &MastodonConfig) -> Result<Arc<HttpClient>> {
    let builder = HttpClientConfig::builder().header_pause(HeaderPause::default());
    common::client(
        config.http.apply(builder, &config.url_base),
        AuthConfig::bearer(&config.access_token),
    )
}

pub struct Mastodon;

#[async_trait]
impl Connector for Mastodon {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("mastodon", "Mastodon")
            .description("Statuses from Mastodon tag and account timelines")
            .property("url_base", PropertyConfig::string("Instance root URL").required())
            .property(
                "access_token",
                PropertyConfig::string("Access token").required().secret(),
            )
            .property("tags", PropertyConfig::array("Hashtags", PropertyConfig::string("Tag")))
            .property(
                "accounts",
                PropertyConfig::array("Account handles", PropertyConfig::string("Handle")),
            )
            .property(
                "days",
                PropertyConfig::integer("Days of history to keep, 0 for all").default_value(0),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: MastodonConfig = parse_config("mastodon", config)?;
        let client = client(&config)?;
        Ok(common::probe(&client, &PageRequest::get("api/v1/announcements")).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: MastodonConfig = parse_config("mastodon", config)?;
        let timeline = Arc::new(Timeline {
            client: client(&config)?,
            days: config.days,
        });
        Ok(vec![
            Arc::new(TagFeed {
                timeline: Arc::clone(&timeline),
                tags: config.tags,
            }),
            Arc::new(AccountFeed {
                timeline,
                accounts: config.accounts,
            }),
        ])
    }
}
