//! Blockscout explorer stats, blocks and block transactions
//!
//! Blocks are listed newest first. The loop stops at the first block at or
//! below the watermark, which is the highest height synced so far (kept as
//! the `blocks` stream cursor) or the configured `starting_block`. Blocks
//! read once per run are shared with the transactions stream, so both see
//! the same block range even after the watermark advances.

use super::common::{self, HttpOverrides};
use crate::auth::AuthConfig;
use crate::connector::{
    parse_config, CheckResult, Connector, ConnectorSpec, PropertyConfig, StreamRef,
};
use crate::decode::JsonDecoder;
use crate::engine::{
    fetch_json, fetch_pages, Boundary, FetchOptions, PageRequest, SourceStream, StreamContext,
};
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::ParamsPaginator;
use crate::partition::ParentRouter;
use crate::types::lenient_i64;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Deserialize)]
pub struct BlockscoutConfig {
    /// Explorer root, e.g. `https://explorer.example.org`
    pub url_base: String,
    #[serde(default)]
    pub starting_block: i64,
    #[serde(flatten)]
    pub http: HttpOverrides,
}

impl BlockscoutConfig {
    fn api_base(&self) -> String {
        format!("{}/api/v2", self.url_base.trim_end_matches('/'))
    }
}

fn client(config: &BlockscoutConfig) -> Result<Arc<HttpClient>> {
    common::client(
        config
            .http
            .apply(HttpClientConfig::builder(), &config.api_base()),
        AuthConfig::None,
    )
}

struct Stats {
    client: Arc<HttpClient>,
}

#[async_trait]
impl SourceStream for Stats {
    fn name(&self) -> &str {
        "stats"
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let stats = fetch_json(&self.client, &PageRequest::get("stats")).await?;
        ctx.add_pages(1);
        Ok(vec![stats])
    }
}

struct Blocks {
    client: Arc<HttpClient>,
    starting_block: i64,
    fetched: OnceCell<Vec<Value>>,
}

impl Blocks {
    async fn fetch(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        let floor = self.watermark(ctx);
        ctx.info(format!("Reading blocks above {floor}"));

        let outcome = fetch_pages(
            &self.client,
            &PageRequest::get("blocks"),
            &JsonDecoder::with_path("items"),
            &ParamsPaginator::new("next_page_params"),
            &FetchOptions::new().boundary(Boundary::block("height", floor)),
        )
        .await?;
        ctx.record_fetch(&outcome, "blocks");
        Ok(outcome.records)
    }

    fn watermark(&self, ctx: &StreamContext) -> i64 {
        ctx.stream_cursor(self.name())
            .and_then(|c| lenient_i64(Some(c)))
            .map_or(self.starting_block, |synced| synced.max(self.starting_block))
    }
}

#[async_trait]
impl SourceStream for Blocks {
    fn name(&self) -> &str {
        "blocks"
    }

    fn primary_key(&self) -> Vec<String> {
        vec!["hash".to_string()]
    }

    fn cursor_field(&self) -> Option<&str> {
        Some("height")
    }

    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>> {
        self.fetched
            .get_or_try_init(|| self.fetch(ctx))
            .await
            .cloned()
    }
}

struct Transactions {
    client: Arc<HttpClient>,
    blocks: Arc<Blocks>,
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
        let blocks = self.blocks.read(ctx).await?;
        let mut rows = Vec::new();
        for hash in ParentRouter::new(blocks, "hash", "block_hash").keys() {
            let outcome = fetch_pages(
                &self.client,
                &PageRequest::get(format!("blocks/{hash}/transactions")),
                &JsonDecoder::with_path("items"),
                &ParamsPaginator::new("next_page_params"),
                &FetchOptions::new(),
            )
            .await?;
            ctx.record_fetch(&outcome, &format!("block {hash}"));
            rows.extend(
                outcome
                    .records
                    .into_iter()
                    .map(|tx| common::tag(tx, "block_hash", hash.as_str())),
            );
        }
        Ok(rows)
    }
}

pub struct Blockscout;

#[async_trait]
impl Connector for Blockscout {
    fn spec(&self) -> ConnectorSpec {
        ConnectorSpec::new("blockscout", "Blockscout")
            .description("Chain stats, blocks and transactions from a Blockscout explorer")
            .property("url_base", PropertyConfig::string("Explorer root URL").required())
            .property(
                "starting_block",
                PropertyConfig::integer("Only read blocks above this height").default_value(0),
            )
    }

    async fn check(&self, config: &Value) -> Result<CheckResult> {
        let config: BlockscoutConfig = parse_config("blockscout", config)?;
        let client = client(&config)?;
        Ok(common::probe(&client, &PageRequest::get("stats")).await)
    }

    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>> {
        let config: BlockscoutConfig = parse_config("blockscout", config)?;
        let client = client(&config)?;
        let blocks = Arc::new(Blocks {
            client: Arc::clone(&client),
            starting_block: config.starting_block,
            fetched: OnceCell::new(),
        });
        Ok(vec![
            Arc::new(Stats {
                client: Arc::clone(&client),
            }),
            Arc::clone(&blocks) as StreamRef,
            Arc::new(Transactions { client, blocks }),
        ])
    }
}
