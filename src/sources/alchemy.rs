//! Alchemy token prices
//!
//! Current prices come from one `by-symbol` request for every configured
//! symbol. In historical mode each symbol gets a POST for a single instant.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::value_at;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use url::form_urlencoded;

const BASE_URL: &str = "https://api.g.alchemy.com/prices/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct AlchemyConfig {
    pub api_key: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub historical_fetch: bool,
    /// RFC 3339 instant used as both start and end of the historical query
    #[serde(default)]
    pub historical_timestamp: Option<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

fn client(config: &AlchemyConfig) -> Result<Arc<HttpClient>> {
    common::client(
        config.http.apply(HttpClientConfig::builder(), BASE_URL),
        AuthConfig::bearer(&config.api_key),
    )
}

/// `tokens/by-symbol?symbols=A&symbols=B`
fn by_symbol_path(symbols: &[String]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(symbols.iter().map(|s| ("symbols", s)))
        .finish();
    format!("tokens/by-symbol?{query}")
}

// ============================================================================
// Streams
// ============================================================================

struct TokenPrice {
    client: Arc<HttpClient>,
    symbols: Vec<String>,
}

#[async_trait]
impl SourceStream for TokenPrice {
    fn name(&self) -> &str {
        "token_price"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["symbol".to_string(), "price_last_updated_at".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("price_last_updated_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let data = fetch_json(&self.client, &PageRequest::get(by_symbol_path(&self.symbols))).await?;
        ctx.add_pages(1);

        Ok(data
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|token| {
                let price = value_at(token, "prices[0]");
                json!({
                    "symbol": token.get("symbol"),
                    "price_usd": price.and_then(|p| p.get("value")),
                    "price_last_updated_at": price.and_then(|p| p.get("lastUpdatedAt")),
                    "currency": price.and_then(|p| p.get("currency")),
                })
            })
            .collect())
    }
}

struct HistoricalPrices {
    client: Arc<HttpClient>,
    api_key: String,
    symbols: Vec<String>,
    timestamp: String,
}

impl HistoricalPrices {
    /// Row for one symbol; a response without data yields a null price
    fn row(&self, symbol: &str, response: &Value) -> Value {
        let symbol = response
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or(symbol);
        let currency = response.get("currency");
        match value_at(response, "data[0]") {
            Some(price) => json!({
                "symbol": symbol,
                "price_usd": price.get("value"),
                "price_last_updated_at": price.get("timestamp"),
                "currency": currency,
            }),
            None => json!({
                "symbol": symbol,
                "price_usd": null,
                "price_last_updated_at": self.timestamp,
                "currency": currency,
            }),
        }
    }
}

#[async_trait]
impl SourceStream for HistoricalPrices {
    fn name(&self) -> &str {
        "token_prices"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["symbol".to_string(), "price_last_updated_at".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("price_last_updated_at")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for symbol in &self.symbols {
            let body = json!({
                "symbol": symbol,
                "startTime": self.timestamp,
                "endTime": self.timestamp,
            });
            let path = format!("{}/tokens/historical", common::path_segment(&self.api_key)?);
            let request = PageRequest::post(path, body);
            let response = fetch_json(&self.client, &request).await?;
            ctx.add_pages(1);
            rows.push(self.row(symbol, &response));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Alchemy;

#[async_trait]
impl Connector for Alchemy {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("alchemy", "Alchemy Prices")
            .description("Current or historical token prices from the Alchemy Prices API")
            .property("api_key", PropertyConfig::string("Alchemy API key").required().secret())
            .property(
                "symbols",
                PropertyConfig::array("Token symbols", PropertyConfig::string("Symbol")).required(),
            )
            .property(
                "historical_fetch",
                PropertyConfig::boolean("Fetch the price at historical_timestamp").default_value(false),
            )
            .property(
                "historical_timestamp",
                PropertyConfig::string("Instant for historical prices, RFC 3339"),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: AlchemyConfig = parse_config("alchemy", config)?;
        let client = client(&config)?;
        Ok(common::probe(&client, &PageRequest::get("tokens/by-symbol?symbols=ETH")).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: AlchemyConfig = parse_config("alchemy", config)?;
        let client = client(&config)?;

        if !config.historical_fetch {
            return Ok(vec![Arc::new(TokenPrice {
                client,
                symbols: config.symbols,
            })]);
        }

        let timestamp = config.historical_timestamp.clone().ok_or_else(|| {
            Error::config("historical_timestamp is required when historical_fetch is enabled")
        })?;
        Ok(vec![Arc::new(HistoricalPrices {
            client,
            api_key: config.api_key,
            symbols: config.symbols,
            timestamp,
        })])
    }
}
