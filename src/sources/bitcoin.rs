//! Bitcoin wallet transactions from blockchain.info
//!
//! Every transaction is flattened into a row carrying the wallet totals from
//! the same response. Wallets without `backfill` only keep the previous UTC
//! day; the loop stops once a page reaches older transactions.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::RecordDecoder;
use crate::engine::{
    fetch_pages, record_time, Boundary, FetchOptions, PageRequest, SourceStream, StreamContext,
};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::{OffsetPaginator, StopCondition};
use crate::types::lenient_i64;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const BASE_URL: &str = "https://blockchain.info";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinWallet {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Read the full history instead of the previous day
    #[serde(default)]
    pub backfill: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinConfig {
    pub wallets: Vec<BitcoinWallet>,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

fn client(config: &BitcoinConfig) -> Result<Arc<HttpClient>> {
    common::client(
        config.http.apply(HttpClientConfig::builder(), BASE_URL),
        AuthConfig::None,
    )
}

/// Direction of a transaction relative to the wallet
pub fn movement(sent: i64, received: i64) -> &'static str {
    match (sent > 0, received > 0) {
        (true, true) => "both",
        (true, false) => "out",
        (false, true) => "in",
        (false, false) => "none",
    }
}

/// Half-open UTC window `[day, day + 1)`
fn day_window(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

// ============================================================================
// Decoder
// ============================================================================

/// Flattens the `txs` of a `rawaddr` response for one wallet
struct WalletDecoder<'a> {
    wallet: &'a BitcoinWallet,
}

impl WalletDecoder<'_> {
    fn flatten(&self, tx: &Value, wallet_totals: &Value) -> Value {
        let address = self.wallet.address.as_str();
        let inputs = tx.get("inputs").and_then(Value::as_array);
        let outputs = tx.get("out").and_then(Value::as_array);

        let sent: i64 = inputs
            .into_iter()
            .flatten()
            .filter_map(|input| input.get("prev_out"))
            .filter(|prev| prev.get("addr").and_then(Value::as_str) == Some(address))
            .filter_map(|prev| lenient_i64(prev.get("value")))
            .sum();
        let received: i64 = outputs
            .into_iter()
            .flatten()
            .filter(|out| out.get("addr").and_then(Value::as_str) == Some(address))
            .filter_map(|out| lenient_i64(out.get("value")))
            .sum();

        let from_utxo: Vec<Value> = inputs
            .into_iter()
            .flatten()
            .filter_map(|input| input.get("prev_out"))
            .map(|prev| json!({"addr": prev.get("addr"), "amount": prev.get("value")}))
            .collect();
        let to_utxo: Vec<Value> = outputs
            .into_iter()
            .flatten()
            .filter(|out| out.get("addr").is_some_and(|a| !a.is_null()))
            .map(|out| json!({"addr": out.get("addr"), "value": out.get("value")}))
            .collect();

        let timestamp = lenient_i64(tx.get("time"))
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true));

        json!({
            "timestamp": timestamp,
            "timezone": "UTC",
            "hash": tx.get("hash"),
            "chain": "bitcoin",
            "chain_id": null,
            "wallet_name": self.wallet.name,
            "wallet_address": address,
            "tags": self.wallet.tags,
            "total_transactions": wallet_totals.get("n_tx"),
            "total_received": wallet_totals.get("total_received"),
            "total_sent": wallet_totals.get("total_sent"),
            "token_name": "Bitcoin",
            "token_symbol": "BTC",
            "token_decimal": 8,
            "transaction_fee": tx.get("fee"),
            "net_change": received - sent,
            "movement": movement(sent, received),
            "current_balance": tx.get("balance"),
            "sent": sent,
            "received": received,
            "from_utxo": from_utxo,
            "to_utxo": to_utxo,
        })
    }
}

impl RecordDecoder for WalletDecoder<'_> {
    fn decode_raw(&self, body: &str) -> Result<Value> {
        serde_json::from_str(body).map_err(|e| Error::decode(format!("Failed to parse JSON: {e}")))
    }

    fn extract(&self, raw: &Value) -> Result<Vec<Value>> {
        Ok(raw
            .get("txs")
            .and_then(Value::as_array)
            .map(|txs| txs.iter().map(|tx| self.flatten(tx, raw)).collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// Stream
// ============================================================================

struct Transactions {
    client: Arc<HttpClient>,
    wallets: Vec<BitcoinWallet>,
}

impl Transactions {
    async fn read_wallet(
        &self,
        ctx: &StreamContext,
        wallet: &BitcoinWallet,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Value>> {
        let boundary = match window {
            Some((start, _)) => Boundary::timestamp("timestamp", start),
            None => Boundary::None,
        };
        let outcome = fetch_pages(
            &self.client,
            &PageRequest::get(format!("rawaddr/{}", common::path_segment(&wallet.address)?)),
            &WalletDecoder { wallet },
            &OffsetPaginator::new("offset", "limit", PAGE_SIZE, StopCondition::total_count("n_tx")),
            &FetchOptions::new().boundary(boundary),
        )
        .await?;
        ctx.record_fetch(&outcome, &format!("wallet {}", wallet.address));

        let mut rows = outcome.records;
        if let Some((_, end)) = window {
            rows.retain(|row| record_time(row.get("timestamp")).is_some_and(|ts| ts < end));
        }
        Ok(rows)
    }
}

#[async_trait]
impl SourceStream for Transactions {
    fn name(&self) -> &str {
        "transactions"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["hash".to_string()]
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let mut rows = Vec::new();
        for wallet in &self.wallets {
            let window = (!wallet.backfill).then(|| day_window(yesterday));
            match window {
                Some(_) => ctx.info(format!(
                    "Processing wallet {} transactions for {yesterday}",
                    wallet.address
                )),
                None => ctx.info(format!("Processing all transactions for {}", wallet.address)),
            }
            rows.extend(self.read_wallet(ctx, wallet, window).await?);
        }
        Ok(rows)
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct Bitcoin;

#[async_trait]
impl Connector for Bitcoin {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("bitcoin", "Bitcoin Explorer")
            .description("Bitcoin wallet transactions from blockchain.info")
            .property(
                "wallets",
                PropertyConfig::array(
                    "Wallets with address, name, tags and backfill",
                    PropertyConfig::object("Wallet"),
                )
                .required(),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: BitcoinConfig = parse_config("bitcoin", config)?;
        let client = client(&config)?;

        let mut failed = Vec::new();
        for wallet in &config.wallets {
            let path = format!("rawaddr/{}", common::path_segment(&wallet.address)?);
            let request = PageRequest::get(path).query("limit", 1);
            let result = common::probe(&client, &request).await;
            if !result.success {
                failed.push(format!(
                    "Could not read wallet {}: {}",
                    wallet.address,
                    result.message.unwrap_or_default()
                ));
            }
        }

        Ok(if failed.is_empty() {
            CheckResult::success()
        } else {
            CheckResult::failure(failed.join("\n"))
        })
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: BitcoinConfig = parse_config("bitcoin", config)?;
        Ok(vec![Arc::new(Transactions {
            client: client(&config)?,
            wallets: config.wallets,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wallet() -> BitcoinWallet {
        BitcoinWallet {
            address: "bc1qwallet".to_string(),
            name: "treasury".to_string(),
            tags: vec!["cold".to_string()],
            backfill: true,
        }
    }

    #[test]
    fn test_movement() {
        assert_eq!(movement(5, 3), "both");
        assert_eq!(movement(5, 0), "out");
        assert_eq!(movement(0, 3), "in");
        assert_eq!(movement(0, 0), "none");
    }

    #[test]
    fn test_flatten_transaction() {
        let wallet = wallet();
        let decoder = WalletDecoder { wallet: &wallet };
        let body = json!({
            "n_tx": 2,
            "total_received": 1000,
            "total_sent": 400,
            "txs": [{
                "hash": "abc",
                "time": 1_700_000_000,
                "fee": 10,
                "balance": 600,
                "inputs": [
                    {"prev_out": {"addr": "bc1qwallet", "value": 400}},
                    {"prev_out": {"addr": "bc1qother", "value": 50}}
                ],
                "out": [
                    {"addr": "bc1qdest", "value": 390},
                    {"addr": "bc1qwallet", "value": 40},
                    {"value": 0}
                ]
            }]
        });

        let rows = decoder.extract(&body).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(row["sent"], 400);
        assert_eq!(row["received"], 40);
        assert_eq!(row["net_change"], -360);
        assert_eq!(row["movement"], "both");
        assert_eq!(row["total_transactions"], 2);
        assert_eq!(row["tags"], json!(["cold"]));
        assert_eq!(row["from_utxo"].as_array().unwrap().len(), 2);
        assert_eq!(row["to_utxo"].as_array().unwrap().len(), 2);
        assert_eq!(row["from_utxo"][0], json!({"addr": "bc1qwallet", "amount": 400}));
    }

    #[test]
    fn test_missing_txs_is_empty() {
        let wallet = wallet();
        let decoder = WalletDecoder { wallet: &wallet };
        assert!(decoder.extract(&json!({"n_tx": 0})).unwrap().is_empty());
    }

    #[test]
    fn test_day_window() {
        let (start, end) = day_window(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(start.to_rfc3339(), "2024-03-09T00:00:00+00:00");
        assert_eq!(end - start, Duration::days(1));
    }
}
