//! Etherscan (v2 multichain API) balances and transfers per wallet
//!
//! Transaction streams start at the block closest to `now - delta_days`, or
//! just after the highest block already synced for that wallet, whichever is
//! later.

use super::common::HttpOverrides;
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::RecordDecoder;
use crate::engine::{
    fetch_json, fetch_pages, max_cursor, FetchOptions, PageRequest, SourceStream, StreamContext,
};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::PageNumberPaginator;
use crate::types::{lenient_i64, pick_keys, value_to_string};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

const BASE_URL: &str = "https://api.etherscan.io/v2/api";
const PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Wallet {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtherscanConfig {
    pub api_key: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: Value,
    #[serde(default)]
    pub chain_name: Option<String>,
    pub wallets: Vec<Wallet>,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default = "default_delta_days")]
    pub delta_days: i64,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

fn default_chain_id() -> Value {
    json!(1)
}

fn default_delta_days() -> i64 {
    1
}

impl EtherscanConfig {
    fn chain_id(&self) -> String {
        value_to_string(&self.chain_id).unwrap_or_else(|| "1".to_string())
    }

    fn chain(&self) -> String {
        self.chain_name.clone().unwrap_or_else(|| self.chain_id())
    }
}

/// Shared per-connector state
struct Api {
    client: HttpClient,
    config: EtherscanConfig,
    start_block: OnceCell<i64>,
}

impl Api {
    fn new(config: EtherscanConfig) -> Result<Self> {
        let builder = HttpClientConfig::builder().request_delay(Duration::from_millis(200));
        let client = HttpClient::with_auth(
            config.http.apply(builder, BASE_URL).build(),
            AuthConfig::query_key("apikey", &config.api_key),
        )?;
        Ok(Self {
            client,
            config,
            start_block: OnceCell::new(),
        })
    }

    fn request(&self, module: &str, action: &str) -> PageRequest {
        PageRequest::get("")
            .query("chainid", self.config.chain_id())
            .query("module", module)
            .query("action", action)
    }

    /// Block closest before `now - delta_days`, looked up once per run
    async fn start_block(&self) -> Result<i64> {
        self.start_block
            .get_or_try_init(|| async {
                let since = lookup_time(Utc::now(), self.config.delta_days)?;
                let request = self
                    .request("block", "getblocknobytime")
                    .query("timestamp", since.timestamp())
                    .query("closest", "before");
                let body = fetch_json(&self.client, &request).await?;
                let block = lenient_i64(body.get("result")).ok_or_else(|| {
                    Error::api("Etherscan", format!("Block lookup failed: {body}"))
                })?;
                debug!(block, "Resolved start block");
                Ok::<_, Error>(block)
            })
            .await
            .copied()
    }

    /// Fetch a single-result call; anything but status "1" is an error
    async fn single(&self, request: &PageRequest) -> Result<Value> {
        let body = fetch_json(&self.client, request).await?;
        if !status_ok(&body) {
            return Err(Error::api(
                "Etherscan",
                format!("Balance request failed: {body}"),
            ));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Instant `delta_days` before `now`
fn lookup_time(now: DateTime<Utc>, delta_days: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(delta_days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            Error::invalid_value("delta_days", format!("{delta_days} days is out of range"))
        })
}

fn status_ok(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("1")
}

/// Reads `result` only when `status == "1"`; other statuses mean no rows
struct StatusDecoder;

impl RecordDecoder for StatusDecoder {
    fn decode_raw(&self, body: &str) -> Result<Value> {
        serde_json::from_str(body)
            .map_err(|e| Error::decode(format!("Failed to parse JSON: {e}")))
    }

    fn extract(&self, raw: &Value) -> Result<Vec<Value>> {
        if !status_ok(raw) {
            return Ok(Vec::new());
        }
        Ok(raw
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn wallet_fields(wallet: &Wallet, chain: &str) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("wallet_name".into(), json!(wallet.name));
    row.insert("wallet_address".into(), json!(wallet.address));
    row.insert("tag".into(), json!(wallet.tag));
    row.insert("chain".into(), json!(chain));
    row
}

// ============================================================================
// Balance streams
// ============================================================================

struct InternalBalance {
    api: Arc<Api>,
}

#[async_trait]
impl SourceStream for InternalBalance {
    fn name(&self) -> &str {
        "internal_balance"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["wallet_address".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let chain = self.api.config.chain();
        let mut rows = Vec::new();
        for wallet in &self.api.config.wallets {
            let request = self
                .api
                .request("account", "balance")
                .query("address", &wallet.address)
                .query("tag", "latest");
            let balance = self.api.single(&request).await?;
            ctx.add_pages(1);

            let mut row = wallet_fields(wallet, &chain);
            row.insert("balance".into(), balance);
            rows.push(Value::Object(row));
        }
        Ok(rows)
    }
}

struct TokenBalance {
    api: Arc<Api>,
}

#[async_trait]
impl SourceStream for TokenBalance {
    fn name(&self) -> &str {
        "token_balance"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["wallet_address".to_string(), "tokenAddress".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let chain = self.api.config.chain();
        let mut rows = Vec::new();
        for wallet in &self.api.config.wallets {
            for token in &self.api.config.tokens {
                let request = self
                    .api
                    .request("account", "tokenbalance")
                    .query("address", &wallet.address)
                    .query("contractaddress", &token.address);
                let balance = self.api.single(&request).await?;
                ctx.add_pages(1);

                let mut row = wallet_fields(wallet, &chain);
                row.insert("token".into(), json!(token.name));
                row.insert("tokenAddress".into(), json!(token.address));
                row.insert("balance".into(), balance);
                rows.push(Value::Object(row));
            }
        }
        Ok(rows)
    }
}

// ============================================================================
// Transaction streams
// ============================================================================

#[derive(Clone, Copy)]
enum TransferKind {
    Internal,
    Token,
}

impl TransferKind {
    fn stream(self) -> &'static str {
        match self {
            Self::Internal => "internal_transaction",
            Self::Token => "token_transaction",
        }
    }

    fn action(self) -> &'static str {
        match self {
            Self::Internal => "txlistinternal",
            Self::Token => "tokentx",
        }
    }

    fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Internal => &["value", "to", "from", "gas", "hash", "blockNumber"],
            Self::Token => &[
                "value",
                "to",
                "from",
                "contractAddress",
                "tokenName",
                "tokenSymbol",
                "tokenDecimal",
                "gas",
                "gasPrice",
                "gasUsed",
                "nonce",
                "hash",
                "blockHash",
                "blockNumber",
            ],
        }
    }
}

struct Transactions {
    api: Arc<Api>,
    kind: TransferKind,
}

impl Transactions {
    fn row(&self, wallet: &Wallet, chain: &str, trx: &Value) -> Value {
        let mut row = wallet_fields(wallet, chain);
        if let Value::Object(picked) = pick_keys(trx, self.kind.fields()) {
            row.extend(picked);
        }
        row.insert(
            "timestamp".into(),
            trx.get("timeStamp").cloned().unwrap_or(Value::Null),
        );
        Value::Object(row)
    }
}

#[async_trait]
impl SourceStream for Transactions {
    fn name(&self) -> &str {
        self.kind.stream()
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["hash".to_string(), "wallet_address".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("blockNumber")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let lookup = self.api.start_block().await?;
        let chain = self.api.config.chain();
        let paginator = PageNumberPaginator::new("page", 1).with_page_size("offset", PAGE_SIZE);

        let mut rows = Vec::new();
        for wallet in &self.api.config.wallets {
            let synced = ctx
                .is_incremental()
                .then(|| ctx.partition_cursor(self.name(), &wallet.address))
                .flatten()
                .and_then(|c| lenient_i64(Some(c)));
            let start = synced.map_or(lookup, |block| lookup.max(block + 1));

            let request = self
                .api
                .request("account", self.kind.action())
                .query("address", &wallet.address)
                .query("startblock", start)
                .query("sort", "asc");
            let outcome = fetch_pages(
                &self.api.client,
                &request,
                &StatusDecoder,
                &paginator,
                &FetchOptions::new(),
            )
            .await?;
            ctx.record_fetch(&outcome, &format!("wallet {}", wallet.name));

            if outcome.records.is_empty() {
                ctx.info(format!(
                    "No transaction for wallet {} - {}",
                    wallet.name, wallet.address
                ));
                continue;
            }
            if let Some(block) = max_cursor(&outcome.records, "blockNumber") {
                ctx.update_partition(self.name(), &wallet.address, block);
            }
            rows.extend(outcome.records.iter().map(|trx| self.row(wallet, &chain, trx)));
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Etherscan;

#[async_trait]
impl Connector for Etherscan {
    fn spec(&self) -> ConnectorSpec {
        let named = || PropertyConfig::object("Object with `name` and `address`");
        ConnectorSpec::new("etherscan", "Etherscan")
            .description("Wallet balances and transfers from Etherscan-compatible explorers")
            .property("api_key", PropertyConfig::string("Etherscan API key").required().secret())
            .property("chain_id", PropertyConfig::string("Chain id").default_value(1))
            .property("chain_name", PropertyConfig::string("Chain label for records"))
            .property("wallets", PropertyConfig::array("Wallets to track", named()).required())
            .property("tokens", PropertyConfig::array("ERC-20 tokens to track", named()))
            .property(
                "delta_days",
                PropertyConfig::integer("Days of history on first sync").default_value(1),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let api = Api::new(parse_config("etherscan", config)?)?;
        Ok(CheckResult::from_probe(api.start_block().await))
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: EtherscanConfig = parse_config("etherscan", config)?;
        let has_tokens = !config.tokens.is_empty();
        let api = Arc::new(Api::new(config)?);

        let mut streams: Vec<StreamRef> = vec![
            Arc::new(InternalBalance {
                api: Arc::clone(&api),
            }),
            Arc::new(Transactions {
                api: Arc::clone(&api),
                kind: TransferKind::Internal,
            }),
            Arc::new(Transactions {
                api: Arc::clone(&api),
                kind: TransferKind::Token,
            }),
        ];
        if has_tokens {
            streams.push(Arc::new(TokenBalance { api }));
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_time_goes_back_delta_days() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(
            lookup_time(now, 3).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap()
        );
        assert_eq!(lookup_time(now, 0).unwrap(), now);
    }

    #[test]
    fn test_lookup_time_rejects_out_of_range_days() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        for days in [i64::MAX, i64::MIN, 500_000_000] {
            let err = lookup_time(now, days).unwrap_err();
            assert!(
                matches!(err, Error::InvalidConfigValue { ref field, .. } if field == "delta_days"),
                "{days}: {err}"
            );
        }
    }
}
