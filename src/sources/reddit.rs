//! Reddit subreddit posts and their comments
//!
//! Authenticates with the client-credentials grant, then reads `new`
//! listings page by page through `after`. Requests are spaced 1.1s apart and
//! a 429 waits for `Retry-After`, then the "please wait N seconds" hint in
//! the body, then 10s.

use super::common::{self, HttpOverrides};
use crate::auth::{AuthConfig, Authenticator, CredentialPlacement};
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::JsonDecoder;
use crate::engine::{
    fetch_one, fetch_pages, record_time, Boundary, FetchOptions, PageRequest, SourceStream,
    StreamContext,
};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RateLimiterConfig, RetryPolicy};
use crate::pagination::CursorPaginator;
use crate::types::value_at;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::OnceCell;

const API_URL: &str = "https://oauth.reddit.com";
const AUTH_URL: &str = "https://www.reddit.com";
const WEB_URL: &str = "https://www.reddit.com";
const PAGE_LIMIT: u32 = 25;

static WAIT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)please wait (\d+) second").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Reddit account named in the User-Agent
    pub username: String,
    #[serde(default)]
    pub subreddits: Vec<String>,
    /// Single subreddit, used when `subreddits` is empty
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub days: i64,
    /// Pages per subreddit listing
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Host serving `api/v1/access_token`
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl RedditConfig {
    fn subreddits(&self) -> Result<Vec<String>> {
        let subs: Vec<String> = if self.subreddits.is_empty() {
            self.subreddit.iter().cloned().collect()
        } else {
            self.subreddits.clone()
        };
        if subs.is_empty() {
            return Err(Error::config(
                "No subreddits specified; provide a 'subreddits' array or a 'subreddit' string",
            ));
        }
        Ok(subs)
    }

    fn auth(&self) -> AuthConfig {
        let host = self
            .auth_url
            .clone()
            .or_else(|| self.http.base_url.clone())
            .unwrap_or_else(|| AUTH_URL.to_string());
        AuthConfig::Oauth2ClientCredentials {
            token_url: format!("{}/api/v1/access_token", host.trim_end_matches('/')),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: Vec::new(),
            token_body: HashMap::new(),
            credentials: CredentialPlacement::BasicAuth,
        }
    }

    fn client(&self) -> Result<Arc<HttpClient>> {
        let policy = RetryPolicy::with_fallback(Duration::from_secs(10))
            .body_hint(WAIT_HINT.clone())
            .server_error_delay(Duration::from_secs(5));
        let builder = HttpClientConfig::builder()
            .user_agent(format!(
                "rust:solidafy-sources:v{} (by u/{})",
                env!("CARGO_PKG_VERSION"),
                self.username
            ))
            .retry_policy(policy)
            .rate_limit(RateLimiterConfig::min_interval(Duration::from_millis(1100)));
        common::client(self.http.apply(builder, API_URL), self.auth())
    }
}

/// Human name of a Reddit fullname prefix
pub fn kind_name(kind: &str) -> &'static str {
    match kind {
        "t1" => "comment",
        "t2" => "account",
        "t3" => "link",
        "t4" => "message",
        "t5" => "subreddit",
        "t6" => "award",
        _ => "unknown",
    }
}

fn utc_text(created: Option<&Value>) -> Value {
    record_time(created).map_or(Value::Null, |ts| {
        json!(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    })
}

fn text_or(data: &Value, key: &str, fallback: Value) -> Value {
    data.get(key).filter(|v| !v.is_null()).cloned().unwrap_or(fallback)
}

/// Flatten one `new` listing child
pub fn post_row(subreddit: &str, child: &Value) -> Option<Value> {
    let data = child.get("data").filter(|d| d.as_object().is_some_and(|o| !o.is_empty()))?;
    let kind = child.get("kind").and_then(Value::as_str).unwrap_or("");
    let post_id = data.get("id").and_then(Value::as_str)?;
    let permalink = data.get("permalink").and_then(Value::as_str).unwrap_or("");
    let author = text_or(data, "author", json!(""));

    Some(json!({
        "id": format!("{subreddit}-{post_id}"),
        "kind_tag": kind,
        "kind_name": kind_name(kind),
        "subreddit": subreddit,
        "post_id": post_id,
        "post_url": format!("{WEB_URL}{permalink}"),
        "url": text_or(data, "url", json!("")),
        "domain": text_or(data, "domain", json!("")),
        "created_timestamp": utc_text(data.get("created_utc")),
        "timezone": "UTC",
        "title": text_or(data, "title", json!("")),
        "text": text_or(data, "selftext", json!("")),
        "html_text": text_or(data, "selftext_html", json!("")),
        "author": author,
        "author_fullname": text_or(data, "author_fullname", author.clone()),
        "downs": text_or(data, "downs", json!(0)),
        "ups": text_or(data, "ups", json!(0)),
        "score": text_or(data, "score", json!(0)),
        "upvote_ratio": text_or(data, "upvote_ratio", json!(0.0)),
        "subreddit_subscribers": text_or(data, "subreddit_subscribers", json!(0)),
        "raw": data.to_string(),
    }))
}

/// Flatten one comment of a post
pub fn comment_row(subreddit: &str, post_id: &str, child: &Value) -> Option<Value> {
    if child.get("kind").and_then(Value::as_str) != Some("t1") {
        return None;
    }
    let data = child.get("data")?;
    let comment_id = data.get("id").and_then(Value::as_str)?;
    let parent_id = data
        .get("parent_id")
        .and_then(Value::as_str)
        .and_then(|p| p.rsplit('_').next())
        .unwrap_or("");
    let permalink = data.get("permalink").and_then(Value::as_str).unwrap_or("");

    Some(json!({
        "id": format!("{subreddit}-{post_id}-{comment_id}"),
        "post_id": format!("{subreddit}-{post_id}"),
        "subreddit": subreddit,
        "comment_id": comment_id,
        "created_timestamp": utc_text(data.get("created_utc")),
        "timezone": "UTC",
        "parent_id": parent_id,
        "author": text_or(data, "author", json!("")),
        "text": text_or(data, "body", json!("")),
        "html_text": text_or(data, "body_html", json!("")),
        "url": format!("{WEB_URL}{permalink}"),
        "ups": text_or(data, "ups", json!(0)),
        "downs": text_or(data, "downs", json!(0)),
        "score": text_or(data, "score", json!(0)),
    }))
}

// ============================================================================
// Streams
// ============================================================================

struct Posts {
    client: Arc<HttpClient>,
    subreddits: Vec<String>,
    days: i64,
    max_pages: Option<usize>,
    fetched: OnceCell<Vec<Value>>,
}

impl Posts {
    async fn fetch(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let boundary = common::window_start(Utc::now().date_naive(), self.days)?
            .map_or(Boundary::None, |floor| {
                Boundary::timestamp("data.created_utc", floor)
            });
        let mut options = FetchOptions::new().boundary(boundary);
        if self.max_pages.is_some() {
            options = options.max_pages(self.max_pages);
        }

        let mut rows = Vec::new();
        for subreddit in &self.subreddits {
            let outcome = fetch_pages(
                &self.client,
                &PageRequest::get(format!("r/{}/new", common::path_segment(subreddit)?))
                    .query("limit", PAGE_LIMIT),
                &JsonDecoder::with_path("data.children"),
                &CursorPaginator::new("after", "data.after"),
                &options,
            )
            .await?;
            ctx.record_fetch(&outcome, &format!("r/{subreddit}"));
            rows.extend(
                outcome
                    .records
                    .iter()
                    .filter_map(|child| post_row(subreddit, child)),
            );
        }
        Ok(rows)
    }
}

#[async_trait]
impl SourceStream for Posts {
    fn name(&self) -> &str {
        "posts"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("created_timestamp")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        self.fetched
            .get_or_try_init(|| self.fetch(ctx))
            .await
            .cloned()
    }
}

struct Comments {
    client: Arc<HttpClient>,
    posts: Arc<Posts>,
}

#[async_trait]
impl SourceStream for Comments {
    fn name(&self) -> &str {
        "comments"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("created_timestamp")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let posts = self.posts.read(ctx).await?;
        let mut rows = Vec::new();
        for post in &posts {
            let (Some(subreddit), Some(post_id)) = (
                value_at(post, "subreddit").and_then(Value::as_str),
                value_at(post, "post_id").and_then(Value::as_str),
            ) else {
                continue;
            };
            let path = format!(
                "r/{}/comments/{}",
                common::path_segment(subreddit)?,
                common::path_segment(post_id)?
            );
            let request = PageRequest::get(path).query("limit", PAGE_LIMIT);
            let children =
                fetch_one(&self.client, &request, &JsonDecoder::with_path("[1].data.children"))
                    .await?;
            ctx.add_pages(1);
            rows.extend(
                children
                    .iter()
                    .filter_map(|child| comment_row(subreddit, post_id, child)),
            );
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Reddit;

#[async_trait]
impl Connector for Reddit {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("reddit", "Reddit")
            .description("New posts and their comments from subreddits")
            .property("client_id", PropertyConfig::string("OAuth client id").required())
            .property(
                "client_secret",
                PropertyConfig::string("OAuth client secret").required().secret(),
            )
            .property(
                "username",
                PropertyConfig::string("Account named in the User-Agent").required(),
            )
            .property(
                "subreddits",
                PropertyConfig::array("Subreddits", PropertyConfig::string("Subreddit")),
            )
            .property(
                "days",
                PropertyConfig::integer("Days of history to keep, 0 for all").default_value(0),
            )
            .property("max_pages", PropertyConfig::integer("Pages per subreddit"))
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: RedditConfig = parse_config("reddit", config)?;
        let subreddits = match config.subreddits() {
            Ok(subs) => subs,
            Err(e) => return Ok(CheckResult::failure(e.to_string())),
        };
        if let Err(e) = Authenticator::new(config.auth()).token().await {
            return Ok(CheckResult::failure(e.to_string()));
        }
        let client = config.client()?;
        let path = format!("r/{}/new", common::path_segment(&subreddits[0])?);
        let request = PageRequest::get(path).query("limit", 1);
        Ok(common::probe(&client, &request).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: RedditConfig = parse_config("reddit", config)?;
        let client = config.client()?;
        let posts = Arc::new(Posts {
            client: Arc::clone(&client),
            subreddits: config.subreddits()?,
            days: config.days,
            max_pages: config.max_pages,
            fetched: OnceCell::new(),
        });
        Ok(vec![
            Arc::clone(&posts) as StreamRef,
            Arc::new(Comments { client, posts }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_name() {
        assert_eq!(kind_name("t3"), "link");
        assert_eq!(kind_name("t1"), "comment");
        assert_eq!(kind_name("zz"), "unknown");
    }

    #[test]
    fn test_post_row() {
        let child = json!({
            "kind": "t3",
            "data": {
                "id": "abc",
                "title": "Hello",
                "permalink": "/r/rust/comments/abc/hello/",
                "created_utc": 1_700_000_000.0,
                "author": "ferris",
                "ups": 12
            }
        });
        let row = post_row("rust", &child).unwrap();
        assert_eq!(row["id"], "rust-abc");
        assert_eq!(row["kind_name"], "link");
        assert_eq!(row["post_url"], "https://www.reddit.com/r/rust/comments/abc/hello/");
        assert_eq!(row["created_timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(row["author_fullname"], "ferris");
        assert_eq!(row["downs"], 0);
        assert_eq!(row["text"], "");
    }

    #[test]
    fn test_post_row_skips_empty_data() {
        assert!(post_row("rust", &json!({"kind": "t3", "data": {}})).is_none());
    }

    #[test]
    fn test_comment_row() {
        let child = json!({
            "kind": "t1",
            "data": {"id": "c1", "parent_id": "t3_abc", "body": "nice", "created_utc": 1_700_000_000}
        });
        let row = comment_row("rust", "abc", &child).unwrap();
        assert_eq!(row["id"], "rust-abc-c1");
        assert_eq!(row["post_id"], "rust-abc");
        assert_eq!(row["parent_id"], "abc");
        assert_eq!(row["text"], "nice");

        assert!(comment_row("rust", "abc", &json!({"kind": "more", "data": {}})).is_none());
    }

    #[test]
    fn test_subreddit_fallback() {
        let config: RedditConfig = serde_json::from_value(json!({
            "client_id": "id",
            "client_secret": "secret",
            "username": "bot",
            "subreddit": "rust"
        }))
        .unwrap();
        assert_eq!(config.subreddits().unwrap(), vec!["rust"]);

        let empty = RedditConfig {
            subreddit: None,
            ..config
        };
        assert!(empty.subreddits().is_err());
    }

    #[test]
    fn test_wait_hint_pattern() {
        let caps = WAIT_HINT.captures("Too many requests. Please wait 7 seconds").unwrap();
        assert_eq!(&caps[1], "7");
    }
}
