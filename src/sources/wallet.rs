//! Wallet balances for Bitcoin and Ethereum addresses
//!
//! Bitcoin balances come from blockchain.info, Ethereum and ERC-20 balances
//! from Ethplorer. Each wallet lists the chains it holds in `blockchain`.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::engine::{fetch_json, PageRequest, SourceStream, StreamContext};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::value_to_string;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const BITCOIN_URL: &str = "https://blockchain.info";
const ETHPLORER_URL: &str = "https://api.ethplorer.io";

/// `decimals` reported for tokens whose contract was destroyed
pub const INVALID_DECIMALS: &str =
    "22270923681254677845691103109158760375340177724800803888364822332811285364736";

#[derive(Debug, Clone, Deserialize)]
pub struct WalletEntry {
    pub name: String,
    pub address: String,
    /// Chains held by this address: `BTC`, `ETH`
    #[serde(default)]
    pub blockchain: Vec<String>,
}

impl WalletEntry {
    fn holds(&self, chain: &str) -> bool {
        self.blockchain.iter().any(|c| c.eq_ignore_ascii_case(chain))
    }
}

fn default_ethplorer_key() -> String {
    "freekey".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub wallets: Vec<WalletEntry>,
    #[serde(default = "default_ethplorer_key")]
    pub ethplorer_api_key: String,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

/// Turn one Ethplorer `tokens[]` entry into a balance row
pub fn token_row(wallet_name: &str, token: &Value) -> Result<Value> {
    let info = token
        .get("tokenInfo")
        .filter(|i| i.is_object())
        .ok_or_else(|| Error::decode("Invalid token data structure"))?;
    let decimals = info
        .get("decimals")
        .and_then(value_to_string)
        .ok_or_else(|| Error::decode("Invalid token: decimals not present"))?;
    if decimals == INVALID_DECIMALS {
        return Err(Error::decode("Invalid token: decimals invalid"));
    }

    let text = |key: &str, fallback: &str| {
        info.get(key)
            .and_then(value_to_string)
            .unwrap_or_else(|| fallback.to_string())
    };
    let balance = match (
        decimals.parse::<i32>(),
        token.get("balance").and_then(value_to_string).unwrap_or_else(|| "0".into()).parse::<f64>(),
    ) {
        (Ok(places), Ok(raw)) => (raw / 10f64.powi(places)).to_string(),
        _ => "0".to_string(),
    };

    Ok(json!({
        "wallet_name": wallet_name,
        "name": text("name", "Unknown Token"),
        "symbol": text("symbol", "No Symbol"),
        "description": text("description", "No description available"),
        "address": text("address", ""),
        "chain": "Ethereum",
        "balance": balance,
        "decimal": decimals,
    }))
}

struct WalletBalance {
    client: Arc<HttpClient>,
    config: WalletConfig,
}

impl WalletBalance {
    fn base(&self, provider: &str) -> String {
        self.config
            .http
            .base_url_or(provider)
            .trim_end_matches('/')
            .to_string()
    }

    async fn bitcoin(&self, wallet: &WalletEntry) -> Result<Value> {
        let base = self.base(BITCOIN_URL);
        let data = fetch_json(
            &self.client,
            &PageRequest::get(format!("{base}/rawaddr/{}", common::path_segment(&wallet.address)?)),
        )
        .await?;
        Ok(json!({
            "wallet_name": wallet.name,
            "name": "BTC",
            "symbol": "BTC",
            "description": "Bitcoin",
            "address": "",
            "chain": "bitcoin",
            "balance": data.get("final_balance"),
            "decimal": 8,
        }))
    }

    async fn ethereum(&self, ctx: &StreamContext, wallet: &WalletEntry) -> Result<Vec<Value>> {
        let base = self.base(ETHPLORER_URL);
        let data = fetch_json(
            &self.client,
            &PageRequest::get(format!(
                "{base}/getAddressInfo/{}",
                common::path_segment(&wallet.address)?
            ))
                .query("apiKey", &self.config.ethplorer_api_key),
        )
        .await?;

        let mut rows = vec![json!({
            "wallet_name": wallet.name,
            "name": "ETH",
            "symbol": "ETH",
            "description": "Native Ethereum token",
            "address": "",
            "chain": "Ethereum",
            "balance": data.get("ETH").and_then(|eth| eth.get("rawBalance")),
            "decimal": 18,
        })];

        for token in data.get("tokens").and_then(Value::as_array).into_iter().flatten() {
            match token_row(&wallet.name, token) {
                Ok(row) => rows.push(row),
                Err(e) => ctx.warn(format!("Dropping token for wallet {}: {e}", wallet.name)),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl SourceStream for WalletBalance {
    fn name(&self) -> &str {
        "wallet_balance"
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for wallet in &self.config.wallets {
            if wallet.holds("BTC") {
                rows.push(self.bitcoin(wallet).await?);
                ctx.add_pages(1);
            }
            if wallet.holds("ETH") {
                rows.extend(self.ethereum(ctx, wallet).await?);
                ctx.add_pages(1);
            }
        }
        Ok(rows)
    }
}

pub struct WalletFetcher;

#[async_trait]
impl Connector for WalletFetcher {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("wallet", "Wallet Fetcher")
            .description("Native and ERC-20 balances for Bitcoin and Ethereum wallets")
            .property(
                "wallets",
                PropertyConfig::array(
                    "Wallets with name, address and blockchain list",
                    PropertyConfig::object("Wallet"),
                )
                .required(),
            )
            .property(
                "ethplorer_api_key",
                PropertyConfig::string("Ethplorer API key")
                    .secret()
                    .default_value("freekey"),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let _: WalletConfig = parse_config("wallet", config)?;
        Ok(CheckResult::success())
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: WalletConfig = parse_config("wallet", config)?;
        let client = common::client(
            config.http.apply(HttpClientConfig::builder(), ""),
            AuthConfig::None,
        )?;
        Ok(vec![Arc::new(WalletBalance { client, config })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_token_row_normalises_balance() {
        let token = json!({
            "tokenInfo": {"name": "USD Coin", "symbol": "USDC", "address": "0xa0b8", "decimals": "6"},
            "balance": 2_500_000
        });
        let row = token_row("ops", &token).unwrap();
        assert_eq!(row["balance"], "2.5");
        assert_eq!(row["decimal"], "6");
        assert_eq!(row["description"], "No description available");
        assert_eq!(row["wallet_name"], "ops");
    }

    #[test]
    fn test_token_row_rejects_invalid() {
        let destroyed = json!({"tokenInfo": {"decimals": INVALID_DECIMALS}, "balance": 1});
        assert!(token_row("ops", &destroyed).is_err());

        let no_decimals = json!({"tokenInfo": {"name": "X"}, "balance": 1});
        assert!(token_row("ops", &no_decimals).is_err());

        assert!(token_row("ops", &json!({"balance": 1})).is_err());
    }

    #[test]
    fn test_token_row_unparseable_balance() {
        let token = json!({"tokenInfo": {"decimals": 18}, "balance": "lots"});
        assert_eq!(token_row("ops", &token).unwrap()["balance"], "0");
    }

    #[test]
    fn test_wallet_holds() {
        let wallet: WalletEntry = serde_json::from_value(
            json!({"name": "a", "address": "x", "blockchain": ["btc", "ETH"]}),
        )
        .unwrap();
        assert!(wallet.holds("BTC"));
        assert!(wallet.holds("ETH"));
        assert!(!wallet.holds("SOL"));
    }
}
