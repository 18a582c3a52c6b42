//! Discourse forum users and latest posts

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const USER_KEYS: &[&str] = &[
    "id",
    "name",
    "username",
    "active",
    "created_at",
    "trust_level",
    "title",
    "time_read",
    "staged",
    "days_visited",
    "posts_read_count",
    "topics_entered",
    "post_count",
];

const POST_KEYS: &[&str] = &[
    "id",
    "name",
    "username",
    "created_at",
    "post_number",
    "post_type",
    "updated_at",
    "reply_count",
    "reply_to_post_number",
    "quote_count",
    "incoming_link_count",
    "reads",
    "score",
    "topic_id",
    "topic_slug",
    "topic_title",
    "topic_html_title",
    "category_id",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DiscourseConfig {
    #[serde(alias = "api-key")]
    pub api_key: String,
    #[serde(alias = "api-username")]
    pub api_username: String,
    /// Forum root, e.g. `https://forum.example.org`
    pub url: String,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

/// A stream backed by one JSON document
struct ListStream {
    client: Arc<HttpClient>,
    name: &'static str,
    path: &'static str,
    /// Where the list sits in the document; empty for a top-level array
    records_at: &'static str,
    keys: &'static [&'static str],
}

#[async_trait]
impl SourceStream for ListStream {
    fn name(&self) -> &str {
        self.name
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let data = fetch_json(&self.client, &PageRequest::get(self.path)).await?;
        ctx.add_pages(1);
        let list = if self.records_at.is_empty() {
            Some(&data)
        } else {
            data.get(self.records_at)
        };
        Ok(list
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|item| common::select(item, self.keys))
            .collect())
    }
}

pub struct Discourse;

#[async_trait]
impl Connector for Discourse {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("discourse", "Discourse")
            .description("Active users and latest posts of a Discourse forum")
            .property("api_key", PropertyConfig::string("Admin API key").required().secret())
            .property(
                "api_username",
                PropertyConfig::string("Username the key acts as").required(),
            )
            .property("url", PropertyConfig::string("Forum root URL").required())
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let _: DiscourseConfig = parse_config("discourse", config)?;
        Ok(CheckResult::success())
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: DiscourseConfig = parse_config("discourse", config)?;
        let headers = HashMap::from([
            ("Api-Key".to_string(), config.api_key.clone()),
            ("Api-Username".to_string(), config.api_username.clone()),
        ]);
        let client = common::client(
            config.http.apply(HttpClientConfig::builder(), &config.url),
            AuthConfig::CustomHeaders { headers },
        )?;

        Ok(vec![
            Arc::new(ListStream {
                client: Arc::clone(&client),
                name: "user",
                path: "admin/users/list/active.json",
                records_at: "",
                keys: USER_KEYS,
            }),
            Arc::new(ListStream {
                client,
                name: "post",
                path: "posts.json",
                records_at: "latest_posts",
                keys: POST_KEYS,
            }),
        ])
    }
}
