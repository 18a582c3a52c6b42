//! Bluesky post search
//!
//! Logs in with an app password, then searches each term once. A post found
//! by several terms is kept for the first one.

use super::common::{self, HttpOverrides};
use crate::auth::{AuthConfig, Authenticator};
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::value_at;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

const BASE_URL: &str = "https://bsky.social/xrpc";

fn default_limit() -> u32 {
    25
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlueskyConfig {
    /// Handle or email
    pub identifier: String,
    /// App password
    pub password: String,
    #[serde(default)]
    pub search_terms: Vec<String>,
    /// Single term, used when `search_terms` is empty
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl BlueskyConfig {
    fn terms(&self) -> Vec<String> {
        if self.search_terms.is_empty() {
            self.search_query.iter().cloned().collect()
        } else {
            self.search_terms.clone()
        }
    }

    fn session(&self) -> AuthConfig {
        AuthConfig::Session {
            login_url: format!(
                "{}/com.atproto.server.createSession",
                self.http.base_url_or(BASE_URL).trim_end_matches('/')
            ),
            login_body: json!({"identifier": self.identifier, "password": self.password}),
            token_path: "accessJwt".to_string(),
            token_header: "Authorization".to_string(),
            token_prefix: Some("Bearer ".to_string()),
            expires_in_path: None,
        }
    }
}

/// Flatten one search hit
pub fn post_row(post: &Value, term: &str) -> Value {
    let at = |path: &str| value_at(post, path).cloned().unwrap_or(Value::Null);
    let count = |path: &str| value_at(post, path).cloned().unwrap_or_else(|| json!(0));
    json!({
        "uri": at("uri"),
        "cid": at("cid"),
        "author": {
            "did": at("author.did"),
            "handle": at("author.handle"),
            "display_name": at("author.displayName"),
            "avatar": at("author.avatar"),
        },
        "record": {
            "text": value_at(post, "record.text").cloned().unwrap_or_else(|| json!("")),
            "created_at": at("record.createdAt"),
            "langs": at("record.langs"),
        },
        "embed": at("embed"),
        "reply_count": count("replyCount"),
        "repost_count": count("repostCount"),
        "like_count": count("likeCount"),
        "indexed_at": at("indexedAt"),
        "labels": at("labels"),
        "search_term": term,
    })
}

struct Posts {
    client: Arc<HttpClient>,
    terms: Vec<String>,
    limit: u32,
}

#[async_trait]
impl SourceStream for Posts {
    fn name(&self) -> &str {
        "posts"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["uri".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("indexed_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        if self.terms.is_empty() {
            ctx.warn("No search terms provided");
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for term in &self.terms {
            let request = PageRequest::get("app.bsky.feed.searchPosts")
                .query("q", term)
                .query("limit", self.limit);
            let found = match fetch_json(&self.client, &request).await {
                Ok(found) => found,
                Err(e) => {
                    ctx.warn(format!("Error searching for term '{term}': {e}"));
                    continue;
                }
            };
            ctx.add_pages(1);

            for post in found.get("posts").and_then(Value::as_array).into_iter().flatten() {
                let Some(uri) = post.get("uri").and_then(Value::as_str) else {
                    continue;
                };
                if seen.insert(uri.to_string()) {
                    rows.push(post_row(post, term));
                }
            }
        }
        ctx.info(format!("Found {} unique posts across all terms", rows.len()));
        Ok(rows)
    }
}

pub struct Bluesky;

#[async_trait]
impl Connector for Bluesky {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("bluesky", "Bluesky")
            .description("Bluesky posts matching search terms")
            .property("identifier", PropertyConfig::string("Handle or email").required())
            .property("password", PropertyConfig::string("App password").required().secret())
            .property(
                "search_terms",
                PropertyConfig::array("Search terms", PropertyConfig::string("Term")),
            )
            .property("search_query", PropertyConfig::string("Single search term"))
            .property(
                "limit",
                PropertyConfig::integer("Posts per term").default_value(25),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: BlueskyConfig = parse_config("bluesky", config)?;
        Ok(CheckResult::from_probe(
            Authenticator::new(config.session()).token().await,
        ))
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: BlueskyConfig = parse_config("bluesky", config)?;
        let client = common::client(
            config.http.apply(HttpClientConfig::builder(), BASE_URL),
            config.session(),
        )?;
        Ok(vec![Arc::new(Posts {
            client,
            terms: config.terms(),
            limit: config.limit,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_terms_fall_back_to_query() {
        let config: BlueskyConfig = serde_json::from_value(json!({
            "identifier": "me.bsky.social",
            "password": "pw",
            "search_query": "rustlang"
        }))
        .unwrap();
        assert_eq!(config.terms(), vec!["rustlang"]);
        assert_eq!(config.limit, 25);
    }

    #[test]
    fn test_post_row() {
        let post = json!({
            "uri": "at://did:plc:x/app.bsky.feed.post/1",
            "cid": "bafy",
            "author": {"did": "did:plc:x", "handle": "x.bsky.social", "displayName": "X"},
            "record": {"text": "hello", "createdAt": "2024-01-01T00:00:00Z"},
            "likeCount": 3,
            "indexedAt": "2024-01-01T00:00:01Z"
        });
        let row = post_row(&post, "hello");
        assert_eq!(row["author"]["display_name"], "X");
        assert_eq!(row["record"]["text"], "hello");
        assert_eq!(row["like_count"], 3);
        assert_eq!(row["reply_count"], 0);
        assert_eq!(row["search_term"], "hello");
        assert!(row["labels"].is_null());
    }
}
