//! X (Twitter) API v2 account, tweets, tag searches and spaces

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::JsonDecoder;
use crate::engine::{
    fetch_json, fetch_pages, record_time, FetchOptions, PageRequest, SourceStream, StreamContext,
};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::CursorPaginator;
use crate::types::value_to_string;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const BASE_URL: &str = "https://api.x.com/2/";
const TWEET_FIELDS: &str = "text,public_metrics,author_id,referenced_tweets,created_at";
const USER_FIELDS: &str = "public_metrics,protected,description,url,most_recent_tweet_id,pinned_tweet_id,created_at,verified_type";
const SPACE_FIELDS: &str = "id,state,created_at,ended_at,host_ids,lang,is_ticketed,participant_count,speaker_ids,started_at,subscriber_count,title,topic_ids,updated_at,creator_id,invited_user_ids,scheduled_start";
const SPACE_EXPANSIONS: &str = "invited_user_ids,speaker_ids,creator_id,host_ids,topic_ids";
const SPACE_USER_FIELDS: &str = "id,name,username,created_at,description,entities,location,pinned_tweet_id,profile_image_url,protected,public_metrics,url,verified,verified_type,withheld";
const SPACE_LIST_FIELDS: [&str; 4] = ["topics", "host_ids", "invited_user_ids", "speaker_ids"];
const SPACE_INCLUDES: [&str; 6] = ["users", "topics", "tweets", "media", "places", "polls"];
const DEFAULT_LOOKBACK_DAYS: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    /// App bearer token
    pub api_key: String,
    /// Numeric account id; looked up through `users/me` when absent
    #[serde(default)]
    pub account_id: Option<String>,
    /// Earliest tweet time, RFC3339 or a date; five days ago by default
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub space_ids: Vec<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl TwitterConfig {
    fn start_time(&self) -> Result<DateTime<Utc>> {
        match &self.start_time {
            Some(raw) => record_time(Some(&json!(raw)))
                .ok_or_else(|| Error::config(format!("Invalid start_time: {raw}"))),
            None => Ok(Utc::now() - Duration::days(DEFAULT_LOOKBACK_DAYS)),
        }
    }
}

fn client(config: &TwitterConfig) -> Result<Arc<HttpClient>> {
    let builder = HttpClientConfig::builder().request_delay(std::time::Duration::from_secs(2));
    common::client(
        config.http.apply(builder, BASE_URL),
        AuthConfig::bearer(&config.api_key),
    )
}

fn api_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

async fn me(client: &HttpClient) -> Result<Value> {
    let request = PageRequest::get("users/me").query("user.fields", USER_FIELDS);
    let body = fetch_json(client, &request).await?;
    body.get("data")
        .cloned()
        .ok_or_else(|| Error::api("Twitter", format!("users/me returned no data: {body}")))
}

/// Flatten a space lookup: list fields and expansions become JSON strings
pub fn space_row(body: &Value, space_id: &str) -> Option<Value> {
    let mut space = body.get("data").filter(|d| !d.is_null())?.clone();
    let obj = space.as_object_mut()?;
    obj.insert("space_id".to_string(), json!(space_id));
    for field in SPACE_LIST_FIELDS {
        if let Some(list @ Value::Array(_)) = obj.get(field) {
            let encoded = list.to_string();
            obj.insert(field.to_string(), Value::String(encoded));
        }
    }
    if let Some(includes) = body.get("includes") {
        for key in SPACE_INCLUDES {
            if let Some(expanded) = includes.get(key) {
                obj.insert(format!("expanded_{key}"), Value::String(expanded.to_string()));
            }
        }
    }
    Some(space)
}

// ============================================================================
// Streams
// ============================================================================

struct Account {
    client: Arc<HttpClient>,
}

#[async_trait]
impl SourceStream for Account {
    fn name(&self) -> &str {
        "account"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let account = me(&self.client).await?;
        ctx.add_pages(1);
        Ok(vec![account])
    }
}

struct Tweets {
    client: Arc<HttpClient>,
    account_id: Option<String>,
    start_time: DateTime<Utc>,
}

impl Tweets {
    async fn account_id(&self, ctx: &StreamContext) -> Result<String> {
        if let Some(id) = &self.account_id {
            return Ok(id.clone());
        }
        let account = me(&self.client).await?;
        ctx.add_pages(1);
        account
            .get("id")
            .and_then(value_to_string)
            .ok_or_else(|| Error::api("Twitter", "users/me returned no account id"))
    }
}

#[async_trait]
impl SourceStream for Tweets {
    fn name(&self) -> &str {
        "tweet"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("created_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let account_id = self.account_id(ctx).await?;
        let synced = ctx
            .is_incremental()
            .then(|| record_time(ctx.stream_cursor(self.name())))
            .flatten();
        let start = synced.map_or(self.start_time, |s| s.max(self.start_time));

        let path = format!("users/{}/tweets", common::path_segment(&account_id)?);
        let request = PageRequest::get(path)
            .query("tweet.fields", TWEET_FIELDS)
            .query("max_results", 100)
            .query("start_time", api_time(start));
        let outcome = fetch_pages(
            &self.client,
            &request,
            &JsonDecoder::with_path("data"),
            &CursorPaginator::new("pagination_token", "meta.next_token"),
            &FetchOptions::new(),
        )
        .await?;
        ctx.record_fetch(&outcome, &format!("tweets of {account_id}"));
        Ok(outcome.records)
    }
}

struct TagTweets {
    client: Arc<HttpClient>,
    tags: Vec<String>,
    start_time: DateTime<Utc>,
}

#[async_trait]
impl SourceStream for TagTweets {
    fn name(&self) -> &str {
        "tag_tweet"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string(), "matched_tag".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        // Recent search only reaches back seven days
        let floor = Utc::now() - Duration::days(7) + Duration::minutes(1);
        let start = self.start_time.max(floor);

        let mut rows = Vec::new();
        for tag in &self.tags {
            let request = PageRequest::get("tweets/search/recent")
                .query("query", tag)
                .query("tweet.fields", TWEET_FIELDS)
                .query("max_results", 100)
                .query("start_time", api_time(start));
            let outcome = fetch_pages(
                &self.client,
                &request,
                &JsonDecoder::with_path("data"),
                &CursorPaginator::new("next_token", "meta.next_token"),
                &FetchOptions::new(),
            )
            .await?;
            ctx.record_fetch(&outcome, &format!("tag {tag}"));
            rows.extend(
                outcome
                    .records
                    .into_iter()
                    .map(|tweet| common::tag(tweet, "matched_tag", tag.as_str())),
            );
        }
        Ok(rows)
    }
}

struct Spaces {
    client: Arc<HttpClient>,
    space_ids: Vec<String>,
}

#[async_trait]
impl SourceStream for Spaces {
    fn name(&self) -> &str {
        "space"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for space_id in &self.space_ids {
            let request = PageRequest::get(format!("spaces/{}", common::path_segment(space_id)?))
                .query("space.fields", SPACE_FIELDS)
                .query("expansions", SPACE_EXPANSIONS)
                .query("user.fields", SPACE_USER_FIELDS)
                .query("topic.fields", "id,name,description");
            let body = fetch_json(&self.client, &request).await?;
            ctx.add_pages(1);

            if let Some(errors) = body.get("errors") {
                ctx.warn(format!("Spaces API errors for {space_id}: {errors}"));
            }
            rows.extend(space_row(&body, space_id));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Twitter;

#[async_trait]
impl Connector for Twitter {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("twitter", "X (Twitter)")
            .description("Account, tweets, tag searches and spaces from the X API v2")
            .property("api_key", PropertyConfig::string("Bearer token").required().secret())
            .property("account_id", PropertyConfig::string("Account id"))
            .property(
                "start_time",
                PropertyConfig::string("Earliest tweet time, defaults to five days ago"),
            )
            .property("tags", PropertyConfig::array("Search queries", PropertyConfig::string("Query")))
            .property(
                "space_ids",
                PropertyConfig::array("Spaces to look up", PropertyConfig::string("Space id")),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: TwitterConfig = parse_config("twitter", config)?;
        let client = client(&config)?;
        Ok(CheckResult::from_probe(me(&client).await))
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: TwitterConfig = parse_config("twitter", config)?;
        let client = client(&config)?;
        let start_time = config.start_time()?;
        Ok(vec![
            Arc::new(Account {
                client: Arc::clone(&client),
            }),
            Arc::new(Tweets {
                client: Arc::clone(&client),
                account_id: config.account_id,
                start_time,
            }),
            Arc::new(TagTweets {
                client: Arc::clone(&client),
                tags: config.tags,
                start_time,
            }),
            Arc::new(Spaces {
                client,
                space_ids: config.space_ids,
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_space_row_encodes_lists_and_includes() {
        let body = json!({
            "data": {"id": "1abc", "state": "live", "host_ids": ["10", "11"], "title": "AMA"},
            "includes": {"users": [{"id": "10", "username": "host"}]}
        });
        let row = space_row(&body, "1abc").unwrap();
        assert_eq!(row["space_id"], "1abc");
        assert_eq!(row["host_ids"], r#"["10","11"]"#);
        assert_eq!(row["expanded_users"], r#"[{"id":"10","username":"host"}]"#);
        assert_eq!(row["title"], "AMA");
        assert!(row.get("expanded_topics").is_none());
    }

    #[test]
    fn test_space_row_without_data() {
        assert!(space_row(&json!({"errors": [{"detail": "gone"}]}), "x").is_none());
    }

    #[test]
    fn test_start_time() {
        let config: TwitterConfig = serde_json::from_value(json!({
            "api_key": "t",
            "start_time": "2024-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(api_time(config.start_time().unwrap()), "2024-03-01T12:00:00Z");

        let config: TwitterConfig = serde_json::from_value(json!({"api_key": "t"})).unwrap();
        let start = config.start_time().unwrap();
        let expected = Utc::now() - Duration::days(DEFAULT_LOOKBACK_DAYS);
        assert!((expected - start).num_seconds().abs() < 5);

        let config: TwitterConfig =
            serde_json::from_value(json!({"api_key": "t", "start_time": "soon"})).unwrap();
        assert!(config.start_time().is_err());
    }
}
