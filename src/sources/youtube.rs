//! YouTube Data API v3 channel and video statistics

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
use crate::http::{HttpClient, HttpClientConfig, RetryPolicy};
use crate::pagination::CursorPaginator;
use crate::types::{lenient_i64, value_at, value_to_string};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const BATCH_SIZE: usize = 50;
const CHANNEL_PARTS: &str = "snippet,statistics,brandingSettings,contentDetails,topicDetails,status";
const VIDEO_PARTS: &str =
    "snippet,statistics,contentDetails,status,recordingDetails,topicDetails,localizations";

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)([DHMS])").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeConfig {
    pub api_key: String,
    /// Channel id (`UC...`), `@handle` or legacy username
    pub channel_identifier: String,
    /// Video cap; a number, or `"all"`
    #[serde(default)]
    pub max_results: Option<Value>,
    /// Ask `commentThreads` when a video reports zero comments
    #[serde(default)]
    pub include_comments_count: bool,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl YoutubeConfig {
    fn max_results(&self) -> Option<usize> {
        lenient_i64(self.max_results.as_ref())
            .filter(|n| *n > 0)
            .map(|n| n as usize)
    }
}

fn client(config: &YoutubeConfig) -> Result<Arc<HttpClient>> {
    let builder =
        HttpClientConfig::builder().retry_policy(RetryPolicy::with_fallback(Duration::from_secs(60)));
    common::client(
        config.http.apply(builder, BASE_URL),
        AuthConfig::query_key("key", &config.api_key),
    )
}

// ============================================================================
// Helpers
// ============================================================================

/// Seconds in an ISO 8601 duration such as `PT1H4M13S`
pub fn duration_seconds(iso: &str) -> i64 {
    DURATION_PART
        .captures_iter(iso)
        .map(|caps| {
            let n: i64 = caps[1].parse().unwrap_or(0);
            match &caps[2] {
                "D" => n * 86_400,
                "H" => n * 3_600,
                "M" => n * 60,
                _ => n,
            }
        })
        .sum()
}

/// `HH:MM:SS`, or `MM:SS` under an hour
pub fn format_duration(seconds: i64) -> String {
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

fn count(value: &Value, path: &str) -> i64 {
    lenient_i64(value_at(value, path)).unwrap_or(0)
}

/// (likes + comments) / views, as a percentage
pub fn engagement_rate(statistics: &Value) -> f64 {
    let views = count(statistics, "viewCount");
    if views == 0 {
        return 0.0;
    }
    let engaged = count(statistics, "likeCount") + count(statistics, "commentCount");
    engaged as f64 / views as f64 * 100.0
}

pub fn views_per_subscriber(video_stats: &Value, channel_stats: &Value) -> f64 {
    let subscribers = count(channel_stats, "subscriberCount");
    if subscribers == 0 {
        return 0.0;
    }
    count(video_stats, "viewCount") as f64 / subscribers as f64
}

fn text(value: &Value, path: &str) -> Value {
    value_at(value, path).cloned().unwrap_or_else(|| json!(""))
}

fn flag(value: &Value, path: &str) -> bool {
    value_at(value, path).and_then(Value::as_bool).unwrap_or(false)
}

fn list(value: &Value, path: &str) -> Value {
    value_at(value, path).cloned().unwrap_or_else(|| json!([]))
}

/// Flatten a `channels` item
pub fn channel_row(channel: &Value, identifier: &str) -> Value {
    json!({
        "channel_id": channel.get("id"),
        "title": text(channel, "snippet.title"),
        "description": text(channel, "snippet.description"),
        "custom_url": text(channel, "snippet.customUrl"),
        "published_at": text(channel, "snippet.publishedAt"),
        "country": text(channel, "snippet.country"),
        "default_language": text(channel, "snippet.defaultLanguage"),
        "thumbnails": value_at(channel, "snippet.thumbnails").cloned().unwrap_or_else(|| json!({})),
        "subscriber_count": count(channel, "statistics.subscriberCount"),
        "video_count": count(channel, "statistics.videoCount"),
        "view_count": count(channel, "statistics.viewCount"),
        "hidden_subscriber_count": flag(channel, "statistics.hiddenSubscriberCount"),
        "uploads_playlist_id": text(channel, "contentDetails.relatedPlaylists.uploads"),
        "likes_playlist_id": text(channel, "contentDetails.relatedPlaylists.likes"),
        "channel_keywords": text(channel, "brandingSettings.channel.keywords"),
        "channel_unsubscribed_trailer": text(channel, "brandingSettings.channel.unsubscribedTrailer"),
        "banner_image_url": text(channel, "brandingSettings.image.bannerImageUrl"),
        "topic_categories": list(channel, "topicDetails.topicCategories"),
        "topic_ids": list(channel, "topicDetails.topicIds"),
        "privacy_status": text(channel, "status.privacyStatus"),
        "is_linked": flag(channel, "status.isLinked"),
        "long_uploads_status": text(channel, "status.longUploadsStatus"),
        "made_for_kids": flag(channel, "status.madeForKids"),
        "self_declared_made_for_kids": flag(channel, "status.selfDeclaredMadeForKids"),
        "fetched_at": Utc::now().to_rfc3339(),
        "channel_identifier": identifier,
    })
}

/// Flatten a `videos` item with computed metrics and channel context
pub fn video_row(video: &Value, channel: &Value) -> Value {
    let stats = video.get("statistics").cloned().unwrap_or_else(|| json!({}));
    let channel_stats = channel.get("statistics").cloned().unwrap_or_else(|| json!({}));
    let duration_iso = value_at(video, "contentDetails.duration")
        .and_then(Value::as_str)
        .unwrap_or("PT0S");
    let seconds = duration_seconds(duration_iso);

    let mut row = json!({
        "video_id": video.get("id"),
        "title": text(video, "snippet.title"),
        "description": text(video, "snippet.description"),
        "published_at": value_at(video, "snippet.publishedAt").cloned().unwrap_or(Value::Null),
        "channel_id": text(video, "snippet.channelId"),
        "channel_title": text(video, "snippet.channelTitle"),
        "tags": list(video, "snippet.tags"),
        "category_id": text(video, "snippet.categoryId"),
        "default_language": text(video, "snippet.defaultLanguage"),
        "default_audio_language": text(video, "snippet.defaultAudioLanguage"),
        "thumbnails": value_at(video, "snippet.thumbnails").cloned().unwrap_or_else(|| json!({})),
        "view_count": count(&stats, "viewCount"),
        "like_count": count(&stats, "likeCount"),
        "comment_count": count(&stats, "commentCount"),
        "favorite_count": count(&stats, "favoriteCount"),
        "duration_iso": duration_iso,
        "duration_seconds": seconds,
        "duration_formatted": format_duration(seconds),
        "dimension": text(video, "contentDetails.dimension"),
        "definition": text(video, "contentDetails.definition"),
        "caption": text(video, "contentDetails.caption"),
        "licensed_content": flag(video, "contentDetails.licensedContent"),
        "privacy_status": text(video, "status.privacyStatus"),
        "upload_status": text(video, "status.uploadStatus"),
        "license": text(video, "status.license"),
        "embeddable": flag(video, "status.embeddable"),
        "public_stats_viewable": flag(video, "status.publicStatsViewable"),
        "channel_subscriber_count": count(&channel_stats, "subscriberCount"),
        "channel_video_count": count(&channel_stats, "videoCount"),
        "channel_view_count": count(&channel_stats, "viewCount"),
        "engagement_rate": engagement_rate(&stats),
        "views_per_subscriber": views_per_subscriber(&stats, &channel_stats),
        "fetched_at": Utc::now().to_rfc3339(),
    });

    let Value::Object(obj) = &mut row else {
        return row;
    };
    if let Some(topics) = video.get("topicDetails") {
        obj.insert("topic_categories".into(), list(topics, "topicCategories"));
        obj.insert("relevant_topic_ids".into(), list(topics, "relevantTopicIds"));
    }
    if let Some(recording) = video.get("recordingDetails") {
        let at = |path: &str| value_at(recording, path).cloned().unwrap_or(Value::Null);
        let extra: Map<String, Value> = [
            ("recording_date", at("recordingDate")),
            ("location_description", at("locationDescription")),
            ("recording_latitude", at("location.latitude")),
            ("recording_longitude", at("location.longitude")),
            ("recording_altitude", at("location.altitude")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        obj.extend(extra);
    }
    row
}

// ============================================================================
// Channel lookup
// ============================================================================

struct Channel {
    client: Arc<HttpClient>,
    identifier: String,
}

impl Channel {
    /// Resolve a handle or username to a channel id
    async fn id(&self) -> Result<String> {
        let lookup = if let Some(handle) = self.identifier.strip_prefix('@') {
            ("forHandle", handle)
        } else if !self.identifier.starts_with("UC") {
            ("forUsername", self.identifier.as_str())
        } else {
            return Ok(self.identifier.clone());
        };
        let request = PageRequest::get("channels")
            .query("part", "id")
            .query(lookup.0, lookup.1);
        let found = fetch_json(&self.client, &request).await?;
        value_at(&found, "items[0].id")
            .and_then(value_to_string)
            .ok_or_else(|| {
                Error::api(
                    "YouTube",
                    format!("Could not find channel for identifier: {}", self.identifier),
                )
            })
    }

    async fn info(&self) -> Result<Value> {
        let id = self.id().await?;
        let request = PageRequest::get("channels")
            .query("part", CHANNEL_PARTS)
            .query("id", &id);
        let found = fetch_json(&self.client, &request).await?;
        value_at(&found, "items[0]")
            .cloned()
            .ok_or_else(|| Error::api("YouTube", format!("No channel information for {id}")))
    }
}

// ============================================================================
// Streams
// ============================================================================

struct ChannelStream {
    channel: Arc<Channel>,
}

#[async_trait]
impl SourceStream for ChannelStream {
    fn name(&self) -> &str {
        "channel"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["channel_id".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let info = self.channel.info().await?;
        ctx.add_pages(2);
        Ok(vec![channel_row(&info, &self.channel.identifier)])
    }
}

struct Videos {
    channel: Arc<Channel>,
    max_results: Option<usize>,
    include_comments_count: bool,
}

impl Videos {
    async fn comment_count(&self, ctx: &StreamContext, video_id: &str) -> i64 {
        let request = PageRequest::get("commentThreads")
            .query("part", "snippet")
            .query("videoId", video_id)
            .query("maxResults", 1);
        match fetch_json(&self.channel.client, &request).await {
            Ok(body) => lenient_i64(value_at(&body, "pageInfo.totalResults")).unwrap_or(0),
            Err(e) => {
                ctx.warn(format!("Could not fetch comments for video {video_id}: {e}"));
                0
            }
        }
    }
}

#[async_trait]
impl SourceStream for Videos {
    fn name(&self) -> &str {
        "videos"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["video_id".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("published_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let info = self.channel.info().await?;
        ctx.add_pages(2);
        let uploads = value_at(&info, "contentDetails.relatedPlaylists.uploads")
            .and_then(value_to_string)
            .ok_or_else(|| Error::api("YouTube", "Channel has no uploads playlist"))?;

        // Uploads are listed newest first
        let boundary = ctx
            .is_incremental()
            .then(|| record_time(ctx.stream_cursor(self.name())))
            .flatten()
            .map_or(Boundary::None, |floor| {
                Boundary::timestamp("contentDetails.videoPublishedAt", floor)
            });
        let outcome = fetch_pages(
            &self.channel.client,
            &PageRequest::get("playlistItems")
                .query("part", "snippet,contentDetails")
                .query("playlistId", &uploads)
                .query("maxResults", BATCH_SIZE),
            &JsonDecoder::with_path("items"),
            &CursorPaginator::new("pageToken", "nextPageToken"),
            &FetchOptions::new()
                .max_pages(None)
                .max_records(self.max_results)
                .boundary(boundary),
        )
        .await?;
        ctx.record_fetch(&outcome, &format!("playlist {uploads}"));

        let ids: Vec<String> = outcome
            .records
            .iter()
            .filter_map(|item| value_at(item, "snippet.resourceId.videoId").and_then(value_to_string))
            .collect();

        let mut rows = Vec::with_capacity(ids.len());
        for batch in ids.chunks(BATCH_SIZE) {
            let request = PageRequest::get("videos")
                .query("part", VIDEO_PARTS)
                .query("id", batch.join(","));
            let details = fetch_json(&self.channel.client, &request).await?;
            ctx.add_pages(1);
            for video in details.get("items").and_then(Value::as_array).into_iter().flatten() {
                let mut row = video_row(video, &info);
                if self.include_comments_count && row["comment_count"] == 0 {
                    if let Some(id) = video.get("id").and_then(Value::as_str) {
                        row["comment_count"] = json!(self.comment_count(ctx, id).await);
                    }
                }
                rows.push(row);
            }
        }
        ctx.info(format!("Fetched {} videos", rows.len()));
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Youtube;

#[async_trait]
impl Connector for Youtube {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("youtube", "YouTube")
            .description("Channel and video statistics from the YouTube Data API")
            .property("api_key", PropertyConfig::string("Data API key").required().secret())
            .property(
                "channel_identifier",
                PropertyConfig::string("Channel id, @handle or username").required(),
            )
            .property("max_results", PropertyConfig::string("Video cap, or \"all\""))
            .property(
                "include_comments_count",
                PropertyConfig::boolean("Look up comment counts reported as zero")
                    .default_value(false),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: YoutubeConfig = parse_config("youtube", config)?;
        let channel = Channel {
            client: client(&config)?,
            identifier: config.channel_identifier,
        };
        Ok(CheckResult::from_probe(channel.info().await))
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: YoutubeConfig = parse_config("youtube", config)?;
        let channel = Arc::new(Channel {
            client: client(&config)?,
            identifier: config.channel_identifier.clone(),
        });
        Ok(vec![
            Arc::new(ChannelStream {
                channel: Arc::clone(&channel),
            }),
            Arc::new(Videos {
                channel,
                max_results: config.max_results(),
                include_comments_count: config.include_comments_count,
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("PT4M13S", 253)]
    #[test_case("PT1H", 3600)]
    #[test_case("PT1H2M3S", 3723)]
    #[test_case("P1DT1S", 86_401)]
    #[test_case("PT0S", 0)]
    fn test_duration_seconds(iso: &str, expected: i64) {
        assert_eq!(duration_seconds(iso), expected);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(253), "04:13");
        assert_eq!(format_duration(3723), "01:02:03");
    }

    #[test]
    fn test_rates() {
        let stats = json!({"viewCount": "200", "likeCount": "8", "commentCount": "2"});
        assert_eq!(engagement_rate(&stats), 5.0);
        assert_eq!(engagement_rate(&json!({})), 0.0);
        assert_eq!(views_per_subscriber(&stats, &json!({"subscriberCount": "100"})), 2.0);
        assert_eq!(views_per_subscriber(&stats, &json!({})), 0.0);
    }

    #[test]
    fn test_video_row() {
        let video = json!({
            "id": "v1",
            "snippet": {"title": "Intro", "publishedAt": "2024-02-01T10:00:00Z"},
            "statistics": {"viewCount": "10", "likeCount": "1"},
            "contentDetails": {"duration": "PT1M5S"},
            "recordingDetails": {"location": {"latitude": 1.5}}
        });
        let channel = json!({"statistics": {"subscriberCount": "5"}});
        let row = video_row(&video, &channel);
        assert_eq!(row["video_id"], "v1");
        assert_eq!(row["duration_seconds"], 65);
        assert_eq!(row["duration_formatted"], "01:05");
        assert_eq!(row["comment_count"], 0);
        assert_eq!(row["engagement_rate"], 10.0);
        assert_eq!(row["views_per_subscriber"], 2.0);
        assert_eq!(row["recording_latitude"], 1.5);
        assert!(row.get("topic_categories").is_none());
    }

    #[test]
    fn test_max_results() {
        let parse = |v: Value| {
            serde_json::from_value::<YoutubeConfig>(json!({
                "api_key": "k", "channel_identifier": "@x", "max_results": v
            }))
            .unwrap()
            .max_results()
        };
        assert_eq!(parse(json!(25)), Some(25));
        assert_eq!(parse(json!("40")), Some(40));
        assert_eq!(parse(json!("all")), None);
    }
}
