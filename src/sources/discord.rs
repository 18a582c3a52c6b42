//! Discord guilds, channels and members through the bot API

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::partition::ParentRouter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

const BASE_URL: &str = "https://discord.com/api";

const GUILD_KEYS: &[&str] = &[
    "id",
    "name",
    "owner_id",
    "roles",
    "description",
    "chain",
    "max_members",
];

const CHANNEL_KEYS: &[&str] = &[
    "id",
    "type",
    "guild_id",
    "position",
    "name",
    "topic",
    "last_message_id",
    "managed",
    "parent_id",
    "last_pin_timestamp",
    "message_count",
    "member_count",
    "flags",
    "total_message_sent",
];

const USER_KEYS: &[&str] = &[
    "id",
    "username",
    "discriminator",
    "global_name",
    "bot",
    "mfa_enabled",
    "verified",
    "email",
    "premium_type",
    "public_flags",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    pub api_key: String,
    pub guilds_id: Vec<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

/// Objects from an array response, or nothing for any other shape
fn objects(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

// ============================================================================
// Streams
// ============================================================================

struct Guild {
    client: Arc<HttpClient>,
    guilds: Vec<String>,
}

#[async_trait]
impl SourceStream for Guild {
    fn name(&self) -> &str {
        "guild"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for guild in &self.guilds {
            let request = PageRequest::get(format!("guilds/{}", common::path_segment(guild)?));
            let data = fetch_json(&self.client, &request).await?;
            ctx.add_pages(1);
            rows.push(common::select(&data, GUILD_KEYS));
        }
        Ok(rows)
    }
}

/// Channels are read once per sync and shared with the `channel` stream
struct GuildChannel {
    client: Arc<HttpClient>,
    guilds: Vec<String>,
    fetched: OnceCell<Vec<Value>>,
}

impl GuildChannel {
    async fn fetch(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for guild in &self.guilds {
            let path = format!("guilds/{}/channels", common::path_segment(guild)?);
            let data = fetch_json(&self.client, &PageRequest::get(path)).await?;
            ctx.add_pages(1);
            rows.extend(
                objects(data)
                    .iter()
                    .map(|channel| common::select(channel, CHANNEL_KEYS)),
            );
        }
        Ok(rows)
    }
}

#[async_trait]
impl SourceStream for GuildChannel {
    fn name(&self) -> &str {
        "guild_channel"
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

struct Channel {
    client: Arc<HttpClient>,
    parent: Arc<GuildChannel>,
}

#[async_trait]
impl SourceStream for Channel {
    fn name(&self) -> &str {
        "channel"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let channels = self.parent.read(ctx).await?;
        let mut rows = Vec::new();
        for id in ParentRouter::new(channels, "id", "channel_id").keys() {
            let path = format!("channels/{}", common::path_segment(&id)?);
            let data = fetch_json(&self.client, &PageRequest::get(path)).await?;
            ctx.add_pages(1);
            rows.push(common::select(&data, CHANNEL_KEYS));
        }
        Ok(rows)
    }
}

struct Member {
    client: Arc<HttpClient>,
    guilds: Vec<String>,
}

#[async_trait]
impl SourceStream for Member {
    fn name(&self) -> &str {
        "member"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string(), "guild_id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for guild in &self.guilds {
            let path = format!("guilds/{}/members", common::path_segment(guild)?);
            let request = PageRequest::get(path).query("limit", 1000);
            let data = fetch_json(&self.client, &request).await?;
            ctx.add_pages(1);
            rows.extend(objects(data).iter().map(|member| {
                let user = member.get("user").unwrap_or(&Value::Null);
                common::tag(common::select(user, USER_KEYS), "guild_id", guild.as_str())
            }));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Discord;

#[async_trait]
impl Connector for Discord {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("discord", "Discord")
            .description("Guilds, channels and members visible to a Discord bot")
            .property("api_key", PropertyConfig::string("Bot token").required().secret())
            .property(
                "guilds_id",
                PropertyConfig::array("Guild ids", PropertyConfig::string("Guild id")).required(),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let _: DiscordConfig = parse_config("discord", config)?;
        Ok(CheckResult::success())
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: DiscordConfig = parse_config("discord", config)?;
        let client = common::client(
            config.http.apply(HttpClientConfig::builder(), BASE_URL),
            AuthConfig::header_key("Authorization", Some("Bot "), &config.api_key),
        )?;
        let guild_channel = Arc::new(GuildChannel {
            client: Arc::clone(&client),
            guilds: config.guilds_id.clone(),
            fetched: OnceCell::new(),
        });
        Ok(vec![
            Arc::new(Guild {
                client: Arc::clone(&client),
                guilds: config.guilds_id.clone(),
            }),
            Arc::clone(&guild_channel) as StreamRef,
            Arc::new(Channel {
                client: Arc::clone(&client),
                parent: guild_channel,
            }),
            Arc::new(Member {
                client,
                guilds: config.guilds_id,
            }),
        ])
    }
}
