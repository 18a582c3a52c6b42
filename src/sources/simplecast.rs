//! Simplecast podcasts, episodes and analytics
//!
//! Every child stream is read once per podcast from the `podcasts`
//! collection, which is fetched a single time per run.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::partition::ParentRouter;
use crate::types::value_at;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

const BASE_URL: &str = "https://api.simplecast.com/";

const PODCAST_KEYS: &[&str] = &[
    "id",
    "title",
    "status",
    "href",
    "episodes.count",
    "account_id",
    "account.owner.name",
];
const EPISODE_KEYS: &[&str] = &[
    "id",
    "title",
    "status",
    "published_at",
    "updated_at",
    "season.href",
    "season.number",
    "number",
    "description",
    "token",
    "type",
];
const LOCATION_KEYS: &[&str] = &["id", "rank", "name", "downloads_total", "downloads_percent"];
const TIME_OF_WEEK_KEYS: &[&str] = &["rank", "hour_of_week", "hour_of_day", "day_of_week", "count"];
const ANALYTIC_EPISODE_KEYS: &[&str] = &["id", "type", "title", "downloads.total", "number"];
const DOWNLOAD_KEYS: &[&str] = &["interval", "downloads_total", "downloads_percent"];

#[derive(Debug, Clone, Deserialize)]
pub struct SimplecastConfig {
    pub api_key: String,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

/// Items under `key`; a body without it is an API error
pub fn collection(body: &Value, key: &str) -> Result<Vec<Value>> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::api("Simplecast", format!("Response has no `{key}`: {body}")))
}

/// Pick `keys`; dotted paths become underscored names (`season.href` → `season_href`)
fn flatten(item: &Value, keys: &[&str]) -> Value {
    let fields = keys
        .iter()
        .map(|path| {
            let name = match *path {
                "episodes.count" => "episode_count".to_string(),
                "downloads.total" => "downloads".to_string(),
                p => p.replace('.', "_"),
            };
            (name, value_at(item, path).cloned().unwrap_or(Value::Null))
        })
        .collect();
    Value::Object(fields)
}

// ============================================================================
// Streams
// ============================================================================

struct Podcasts {
    client: Arc<HttpClient>,
    fetched: OnceCell<Vec<Value>>,
}

impl Podcasts {
    async fn fetch(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let body = fetch_json(&self.client, &PageRequest::get("podcasts")).await?;
        ctx.add_pages(1);
        Ok(collection(&body, "collection")?
            .iter()
            .map(|podcast| flatten(podcast, PODCAST_KEYS))
            .collect())
    }
}

#[async_trait]
impl SourceStream for Podcasts {
    fn name(&self) -> &str {
        "podcast"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        self.fetched
            .get_or_try_init(|| self.fetch(ctx))
            .await
            .cloned()
    }
}

/// A per-podcast stream
struct PodcastChild {
    name: &'static str,
    primary_key: &'static [&'static str],
    request: fn(&str) -> PageRequest,
    items_at: &'static str,
    keys: &'static [&'static str],
    parent: Arc<Podcasts>,
}

#[async_trait]
impl SourceStream for PodcastChild {
    fn name(&self) -> &str {
        self.name
    }

    fn primary_key(&self) -> Vec<String> {
        self.primary_key.iter().map(|k| k.to_string()).collect()
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let podcasts = self.parent.read(ctx).await?;
        let mut rows = Vec::new();
        for podcast_id in ParentRouter::new(podcasts, "id", "podcast_id").keys() {
            let body = fetch_json(&self.parent.client, &(self.request)(&podcast_id)).await?;
            ctx.add_pages(1);
            rows.extend(collection(&body, self.items_at)?.iter().map(|item| {
                common::tag(flatten(item, self.keys), "podcast_id", podcast_id.as_str())
            }));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Simplecast;

#[async_trait]
impl Connector for Simplecast {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("simplecast", "Simplecast")
            .description("Podcasts, episodes and listener analytics from Simplecast")
            .property("api_key", PropertyConfig::string("API token").required().secret())
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        parse_config::<SimplecastConfig>("simplecast", config)?;
        Ok(CheckResult::success())
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: SimplecastConfig = parse_config("simplecast", config)?;
        let parent = Arc::new(Podcasts {
            client: common::client(
                config.http.apply(HttpClientConfig::builder(), BASE_URL),
                AuthConfig::bearer(&config.api_key),
            )?,
            fetched: OnceCell::new(),
        });

        Ok(vec![
            Arc::clone(&parent) as StreamRef,
            child(
                &parent,
                "episode",
                &["id"],
                |podcast| PageRequest::get(format!("podcasts/{podcast}/episodes")),
                "collection",
                EPISODE_KEYS,
            ),
            child(
                &parent,
                "analytic_location",
                &["podcast_id", "id"],
                |podcast| PageRequest::get("analytics/location").query("podcast", podcast),
                "countries",
                LOCATION_KEYS,
            ),
            child(
                &parent,
                "analytic_time_of_week",
                &["podcast_id", "hour_of_week"],
                |podcast| PageRequest::get("analytics/time_of_week").query("podcast", podcast),
                "collection",
                TIME_OF_WEEK_KEYS,
            ),
            child(
                &parent,
                "analytic_episode",
                &["podcast_id", "id"],
                |podcast| PageRequest::get("analytics/episodes").query("podcast", podcast),
                "collection",
                ANALYTIC_EPISODE_KEYS,
            ),
            child(
                &parent,
                "analytic_download",
                &["podcast_id", "interval"],
                |podcast| PageRequest::get("analytics/downloads").query("podcast", podcast),
                "by_interval",
                DOWNLOAD_KEYS,
            ),
        ])
    }
}

fn child(
    parent: &Arc<Podcasts>,
    name: &'static str,
    primary_key: &'static [&'static str],
    request: fn(&str) -> PageRequest,
    items_at: &'static str,
    keys: &'static [&'static str],
) -> StreamRef {
    Arc::new(PodcastChild {
        name,
        primary_key,
        request,
        items_at,
        keys,
        parent: Arc::clone(parent),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_flatten_podcast() {
        let podcast = json!({
            "id": "p1",
            "title": "Show",
            "episodes": {"count": 12},
            "account": {"owner": {"name": "Ada"}}
        });
        assert_eq!(
            flatten(&podcast, PODCAST_KEYS),
            json!({
                "id": "p1",
                "title": "Show",
                "status": null,
                "href": null,
                "episode_count": 12,
                "account_id": null,
                "account_owner_name": "Ada"
            })
        );
    }

    #[test]
    fn test_flatten_episode_season() {
        let episode = json!({"id": "e1", "season": {"href": "h", "number": 2}});
        let row = flatten(&episode, EPISODE_KEYS);
        assert_eq!(row["season_href"], "h");
        assert_eq!(row["season_number"], 2);
    }

    #[test]
    fn test_collection_missing_key() {
        let err = collection(&json!({"error": "nope"}), "countries").unwrap_err();
        assert!(err.to_string().contains("countries"));
        assert_eq!(collection(&json!({"by_interval": [1]}), "by_interval").unwrap().len(), 1);
    }
}
