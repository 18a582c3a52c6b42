//! CoinGecko daily coin prices

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::value_at;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Clone, Deserialize)]
pub struct CoinGeckoConfig {
    /// CoinGecko coin ids, e.g. `bitcoin`
    pub coins: Vec<String>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

struct CoinPrice {
    client: Arc<HttpClient>,
    coins: Vec<String>,
}

#[async_trait]
impl SourceStream for CoinPrice {
    fn name(&self) -> &str {
        "coin_price"
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for coin in &self.coins {
            let path = format!("coins/{}/market_chart", common::path_segment(coin)?);
            let request = PageRequest::get(path)
                .query("vs_currency", "usd")
                .query("days", 1)
                .query("interval", "daily")
                .query("precision", 18);
            let chart = fetch_json(&self.client, &request).await?;
            ctx.add_pages(1);

            // The first point is the start of the window; the second is the latest close
            let price = value_at(&chart, "prices[1][1]").cloned();
            if price.is_none() {
                ctx.warn(format!("No price for {coin}"));
            }
            rows.push(json!({
                "coin": coin,
                "date": Utc::now().format("%Y%m%d_%H%M").to_string(),
                "price": price,
            }));
        }
        Ok(rows)
    }
}

pub struct CoinGecko;

#[async_trait]
impl Connector for CoinGecko {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("coingecko", "CoinGecko")
            .description("Latest USD price per coin from CoinGecko market charts")
            .property(
                "coins",
                PropertyConfig::array("CoinGecko coin ids", PropertyConfig::string("Coin id"))
                    .required(),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let _: CoinGeckoConfig = parse_config("coingecko", config)?;
        Ok(CheckResult::success())
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: CoinGeckoConfig = parse_config("coingecko", config)?;
        let client = common::client(
            config.http.apply(HttpClientConfig::builder(), BASE_URL),
            AuthConfig::None,
        )?;
        Ok(vec![Arc::new(CoinPrice {
            client,
            coins: config.coins,
        })])
    }
}
