//! App Store Connect analytics reports
//!
//! Each stream is one analytics report. Apple publishes one instance per
//! processing day; its first segment is a gzipped TSV/CSV holding the rows
//! for the previous day.

use super::common::{self, HttpOverrides};
use crate::auth::{generate_jwt, AuthConfig, JwtParams};
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::{gunzip, CsvDecoder, RecordDecoder};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RequestConfig};
use crate::partition::{DatetimeRouter, PartitionRouter};
use crate::types::{value_at, value_to_string, JwtAlgorithm};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const BASE_URL: &str = "https://api.appstoreconnect.apple.com/v1/";
const AUDIENCE: &str = "appstoreconnect-v1";
const TOKEN_LIFETIME_SECS: u64 = 20 * 60;
const DEFAULT_LOOKBACK_DAYS: i64 = 3;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Stream name and its default analytics report id
const REPORTS: [(&str, &str); 5] = [
    ("app_install_performance", "r5-1032fee7-dfb3-4a4a-b24d-e603c95f5b09"),
    ("app_downloads_detailed", "r4-1032fee7-dfb3-4a4a-b24d-e603c95f5b09"),
    ("app_installation_deletion_detailed", "r7-1032fee7-dfb3-4a4a-b24d-e603c95f5b09"),
    ("app_sessions_detailed", "r9-1032fee7-dfb3-4a4a-b24d-e603c95f5b09"),
    ("app_discovery_engagement_detailed", "r15-1032fee7-dfb3-4a4a-b24d-e603c95f5b09"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct AppStoreConfig {
    pub key_id: String,
    pub issuer_id: String,
    /// Contents of the `.p8` key
    pub private_key: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Report id overrides keyed by stream name
    #[serde(default, alias = "report_ids")]
    pub report_id: HashMap<String, String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl AppStoreConfig {
    fn jwt(&self) -> JwtParams {
        JwtParams {
            issuer: self.issuer_id.clone(),
            audience: AUDIENCE.to_string(),
            // Keys pasted into JSON often carry escaped newlines
            private_key: self.private_key.replace("\\n", "\n"),
            algorithm: JwtAlgorithm::ES256,
            key_id: Some(self.key_id.clone()),
            lifetime_seconds: TOKEN_LIFETIME_SECS,
            ..JwtParams::default()
        }
    }

    /// (stream, report id) pairs with overrides applied
    fn reports(&self) -> Vec<(&'static str, String)> {
        REPORTS
            .iter()
            .map(|(stream, default_id)| {
                let id = self.report_id.get(*stream).map_or(*default_id, String::as_str);
                (*stream, id.to_string())
            })
            .collect()
    }

    /// Processing days to read, both ends included
    fn days(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let end = parse_day(self.end_date.as_deref(), "end_date").unwrap_or(today);
        let start = parse_day(self.start_date.as_deref(), "start_date")
            .unwrap_or(end - Duration::days(DEFAULT_LOOKBACK_DAYS));
        (start, end)
    }
}

fn parse_day(raw: Option<&str>, field: &str) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
        Ok(day) => Some(day),
        Err(_) => {
            warn!("Invalid {} format: {}, using the default", field, raw);
            None
        }
    }
}

/// Rows of one report file that belong to `processing_day - 1`
pub fn report_rows(text: &str, processing_day: NaiveDate, source_url: &str) -> Result<Vec<Value>> {
    let expected = (processing_day - Duration::days(1)).format(DATE_FORMAT).to_string();
    let processed_at = Utc::now().to_rfc3339();
    Ok(CsvDecoder::sniffing_raw()
        .decode(text)?
        .into_iter()
        .filter(|row| row.get("Date").and_then(Value::as_str) == Some(expected.as_str()))
        .map(|row| {
            let row = common::tag(row, "_ab_source_file_url", source_url);
            common::tag(row, "processed_date", processed_at.as_str())
        })
        .collect())
}

// ============================================================================
// Streams
// ============================================================================

struct Report {
    client: Arc<HttpClient>,
    name: &'static str,
    report_id: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl Report {
    async fn instances(&self) -> Result<Vec<Value>> {
        let path = format!("analyticsReports/{}/instances", common::path_segment(&self.report_id)?);
        let body = fetch_json(&self.client, &PageRequest::get(path)).await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn segment_url(&self, instance_id: &str) -> Result<String> {
        let path = format!(
            "analyticsReportInstances/{}/segments",
            common::path_segment(instance_id)?
        );
        let body = fetch_json(&self.client, &PageRequest::get(path)).await?;
        value_at(&body, "data[0].attributes.url")
            .and_then(value_to_string)
            .ok_or_else(|| Error::api("App Store", format!("No segments for instance {instance_id}")))
    }

    /// Download and decompress a pre-signed segment
    async fn download(&self, url: &str) -> Result<String> {
        let bytes = self
            .client
            .get_bytes(url, RequestConfig::new().without_auth())
            .await?;
        gunzip(&bytes)
    }

    async fn read_instance(&self, instance_id: &str, day: NaiveDate) -> Result<Vec<Value>> {
        let url = self.segment_url(instance_id).await?;
        let text = self.download(&url).await?;
        report_rows(&text, day, &url)
    }
}

#[async_trait]
impl SourceStream for Report {
    fn name(&self) -> &str {
        self.name
    }

    fn primary_key(&self) -> Vec<String> {
        Vec::new()
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("Date")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        // A processing day holds the previous day's rows
        let synced = ctx
            .is_incremental()
            .then(|| ctx.stream_cursor(self.name()))
            .flatten()
            .and_then(Value::as_str)
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok());

        let instances = self.instances().await?;
        ctx.add_pages(1);

        let mut rows = Vec::new();
        for slice in DatetimeRouter::daily(self.start, self.end).partitions()? {
            let Some(day) = slice
                .get_string("day")
                .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
            else {
                continue;
            };
            if synced.is_some_and(|last| day - Duration::days(1) <= last) {
                continue;
            }

            let date = day.format(DATE_FORMAT).to_string();
            let matching = instances.iter().filter(|instance| {
                value_at(instance, "attributes.processingDate").and_then(Value::as_str)
                    == Some(date.as_str())
            });
            for instance in matching {
                let Some(id) = instance.get("id").and_then(value_to_string) else {
                    continue;
                };
                match self.read_instance(&id, day).await {
                    Ok(found) => {
                        ctx.add_pages(2);
                        ctx.info(format!(
                            "{}: {} rows from instance {id} ({date})",
                            self.name,
                            found.len()
                        ));
                        rows.extend(found);
                    }
                    Err(e) => ctx.warn(format!("Failed to read report instance {id}: {e}")),
                }
            }
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

fn client(config: &AppStoreConfig) -> Result<Arc<HttpClient>> {
    let builder = HttpClientConfig::builder().header("Content-Type", "application/json");
    common::client(
        config.http.apply(builder, BASE_URL),
        AuthConfig::Jwt(config.jwt()),
    )
}

pub struct AppStore;

#[async_trait]
impl Connector for AppStore {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("app_store", "App Store Connect")
            .description("Daily App Store Connect analytics reports")
            .property("key_id", PropertyConfig::string("API key id").required())
            .property("issuer_id", PropertyConfig::string("Issuer id").required())
            .property(
                "private_key",
                PropertyConfig::string(".p8 private key").required().secret(),
            )
            .property("start_date", PropertyConfig::string("First processing day, YYYY-MM-DD"))
            .property("end_date", PropertyConfig::string("Last processing day, YYYY-MM-DD"))
            .property("report_id", PropertyConfig::object("Report id per stream"))
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: AppStoreConfig = parse_config("app_store", config)?;
        if let Err(e) = generate_jwt(&config.jwt()) {
            return Ok(CheckResult::failure(format!("Failed to sign token: {e}")));
        }
        let Some((_, report_id)) = config.reports().into_iter().next() else {
            return Ok(CheckResult::failure("No reports configured"));
        };
        let client = client(&config)?;
        let path = format!("analyticsReports/{}/instances", common::path_segment(&report_id)?);
        let request = PageRequest::get(path);
        Ok(common::probe(&client, &request).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: AppStoreConfig = parse_config("app_store", config)?;
        let client = client(&config)?;
        let (start, end) = config.days(Utc::now().date_naive());
        Ok(config
            .reports()
            .into_iter()
            .map(|(name, report_id)| -> StreamRef {
                Arc::new(Report {
                    client: Arc::clone(&client),
                    name,
                    report_id,
                    start,
                    end,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(extra: Value) -> AppStoreConfig {
        let mut base = json!({"key_id": "K", "issuer_id": "I", "private_key": "pem"});
        if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
            base.extend(extra);
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_days_default_window() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let (start, end) = config(json!({})).days(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 6, 7).unwrap());
        assert_eq!(end, today);

        let (start, end) = config(json!({"end_date": "2024-01-05", "start_date": "bad"})).days(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }

    #[test]
    fn test_report_overrides() {
        let reports = config(json!({"report_id": {"app_sessions_detailed": "r-custom"}})).reports();
        assert_eq!(reports.len(), 5);
        assert_eq!(reports[0].1, "r5-1032fee7-dfb3-4a4a-b24d-e603c95f5b09");
        assert_eq!(reports[3], ("app_sessions_detailed", "r-custom".to_string()));
    }

    #[test]
    fn test_report_rows_filters_previous_day() {
        let text = "Date\tApp Name\tCounts\n2024-06-09\tDemo\t5\n2024-06-08\tDemo\t3\n2024-06-09\t \t\n";
        let day = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let rows = report_rows(text, day, "https://files/x.gz").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["App Name"], "Demo");
        assert_eq!(rows[0]["Counts"], "5");
        assert_eq!(rows[0]["_ab_source_file_url"], "https://files/x.gz");
        assert!(rows[1]["App Name"].is_null());
        assert!(rows[1]["Counts"].is_null());
    }

    #[test]
    fn test_jwt_claims() {
        let params = config(json!({"private_key": "line1\\nline2"})).jwt();
        assert_eq!(params.private_key, "line1\nline2");
        assert_eq!(params.audience, "appstoreconnect-v1");
        assert_eq!(params.key_id.as_deref(), Some("K"));
        assert_eq!(params.lifetime_seconds, 1200);
    }
}
