//! Telegram bot updates and chat details
//!
//! `getUpdates` hands out each update until it is acknowledged by asking for
//! a later offset, so the next offset is always the highest `update_id` seen
//! plus one.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, LogLevel, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::{lenient_i64, value_at, value_to_string};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Only keep messages from these chats; every chat when empty
    #[serde(default)]
    pub chat_ids: Vec<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

fn client(config: &TelegramConfig) -> Result<Arc<HttpClient>> {
    let base = format!(
        "{}/bot{}",
        config.http.base_url_or(BASE_URL).trim_end_matches('/'),
        config.bot_token
    );
    common::client(
        config.http.apply(HttpClientConfig::builder(), "").base_url(base),
        AuthConfig::None,
    )
}

fn is_ok(response: &Value) -> bool {
    response.get("ok").and_then(Value::as_bool).unwrap_or(false)
}

/// Flatten a message or channel post update; other update types yield nothing
pub fn update_row(update: &Value) -> Option<Value> {
    let (update_type, message) = match (update.get("message"), update.get("channel_post")) {
        (Some(m), _) if !m.is_null() => ("message", m),
        (_, Some(p)) if !p.is_null() => ("channel_post", p),
        _ => return None,
    };
    let at = |path: &str| value_at(message, path).cloned().unwrap_or(Value::Null);
    let flag = |path: &str| value_at(message, path).and_then(Value::as_bool).unwrap_or(false);
    let has = |key: &str| {
        message.get(key).is_some_and(|v| match v {
            Value::Null => false,
            Value::Array(items) => !items.is_empty(),
            Value::Object(fields) => !fields.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
    };

    Some(json!({
        "update_id": update.get("update_id"),
        "update_type": update_type,
        "message_id": at("message_id"),
        "date": at("date"),
        "text": at("text"),
        "caption": at("caption"),
        "chat_id": at("chat.id"),
        "chat_title": at("chat.title"),
        "chat_type": at("chat.type"),
        "chat_username": at("chat.username"),
        "is_forum": flag("chat.is_forum"),
        "from_id": at("from.id"),
        "from_username": at("from.username"),
        "from_first_name": at("from.first_name"),
        "from_last_name": at("from.last_name"),
        "from_is_bot": flag("from.is_bot"),
        "message_thread_id": at("message_thread_id"),
        "is_topic_message": flag("is_topic_message"),
        "reply_to_message_id": at("reply_to_message.message_id"),
        "forward_from_chat_id": at("forward_from_chat.id"),
        "forward_date": at("forward_date"),
        "has_photo": has("photo"),
        "has_video": has("video"),
        "has_document": has("document"),
        "has_audio": has("audio"),
        "has_voice": has("voice"),
        "has_sticker": has("sticker"),
        "has_poll": has("poll"),
        "has_location": has("location"),
        "raw_update": update,
    }))
}

fn highest_update_id(updates: &[Value]) -> Option<i64> {
    updates
        .iter()
        .filter_map(|u| lenient_i64(u.get("update_id")))
        .max()
}

// ============================================================================
// Streams
// ============================================================================

struct Messages {
    client: Arc<HttpClient>,
    chat_ids: Vec<String>,
}

impl Messages {
    fn wanted(&self, row: &Value) -> bool {
        self.chat_ids.is_empty()
            || row
                .get("chat_id")
                .and_then(value_to_string)
                .is_some_and(|id| self.chat_ids.contains(&id))
    }
}

#[async_trait]
impl SourceStream for Messages {
    fn name(&self) -> &str {
        "messages"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["update_id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("update_id")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut request = PageRequest::get("getUpdates")
            .query("timeout", 0)
            .query("allowed_updates", r#"["message","channel_post"]"#);
        let last = ctx
            .is_incremental()
            .then(|| lenient_i64(ctx.stream_cursor(self.name())))
            .flatten();
        if let Some(last) = last {
            request = request.query("offset", last + 1);
        }

        let response = fetch_json(&self.client, &request).await?;
        ctx.add_pages(1);
        if !is_ok(&response) {
            ctx.log(LogLevel::Error, format!("Telegram API error: {response}"));
            return Ok(Vec::new());
        }

        let updates = response
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        ctx.info(format!("Fetched {} updates from Telegram", updates.len()));
        // every delivered update counts toward the offset, kept or not
        if let Some(highest) = highest_update_id(&updates) {
            ctx.advance_cursor(json!(highest));
        }

        Ok(updates
            .iter()
            .filter_map(update_row)
            .filter(|row| self.wanted(row))
            .collect())
    }
}

struct ChatInfo {
    client: Arc<HttpClient>,
    chat_ids: Vec<String>,
}

impl ChatInfo {
    async fn member_count(&self, chat_id: &str) -> Value {
        let request = PageRequest::get("getChatMemberCount").query("chat_id", chat_id);
        match fetch_json(&self.client, &request).await {
            Ok(response) if is_ok(&response) => {
                response.get("result").cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl SourceStream for ChatInfo {
    fn name(&self) -> &str {
        "chat_info"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for chat_id in &self.chat_ids {
            let request = PageRequest::get("getChat").query("chat_id", chat_id);
            let chat = match fetch_json(&self.client, &request).await {
                Ok(response) if is_ok(&response) => {
                    response.get("result").cloned().unwrap_or(Value::Null)
                }
                Ok(response) => {
                    ctx.warn(format!("Failed to get chat info for {chat_id}: {response}"));
                    continue;
                }
                Err(e) => {
                    ctx.warn(format!("Failed to get chat info for {chat_id}: {e}"));
                    continue;
                }
            };
            let member_count = self.member_count(chat_id).await;
            ctx.add_pages(2);

            let at = |key: &str| chat.get(key).cloned().unwrap_or(Value::Null);
            rows.push(json!({
                "id": at("id"),
                "type": at("type"),
                "title": at("title"),
                "username": at("username"),
                "first_name": at("first_name"),
                "last_name": at("last_name"),
                "is_forum": chat.get("is_forum").and_then(Value::as_bool).unwrap_or(false),
                "description": at("description"),
                "invite_link": at("invite_link"),
                "linked_chat_id": at("linked_chat_id"),
                "member_count": member_count,
            }));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Telegram;

#[async_trait]
impl Connector for Telegram {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("telegram", "Telegram")
            .description("Messages and chat details seen by a Telegram bot")
            .property("bot_token", PropertyConfig::string("Bot token").required().secret())
            .property(
                "chat_ids",
                PropertyConfig::array("Chats to keep", PropertyConfig::string("Chat id")),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: TelegramConfig = parse_config("telegram", config)?;
        let client = client(&config)?;
        Ok(match fetch_json(&client, &PageRequest::get("getMe")).await {
            Ok(me) if is_ok(&me) => CheckResult::success(),
            Ok(me) => CheckResult::failure(format!(
                "Telegram API error: {}",
                me.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
            )),
            Err(e) => CheckResult::failure(format!("Connection error: {e}")),
        })
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: TelegramConfig = parse_config("telegram", config)?;
        let client = client(&config)?;
        let mut streams: Vec<StreamRef> = vec![Arc::new(Messages {
            client: Arc::clone(&client),
            chat_ids: config.chat_ids.clone(),
        })];
        if !config.chat_ids.is_empty() {
            streams.push(Arc::new(ChatInfo {
                client,
                chat_ids: config.chat_ids,
            }));
        }
        Ok(streams)
    }
}
