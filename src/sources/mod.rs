//! Built-in source connectors
//!
//! Each submodule implements one API. The registry below maps connector
//! names to constructors so the CLI can run `--connector reddit`.

mod common;

pub mod alchemy;
pub mod app_store;
pub mod bitcoin;
pub mod blockscout;
pub mod bluesky;
pub mod coingecko;
pub mod discord;
pub mod discourse;
pub mod etherscan;
pub mod luma;
pub mod mastodon;
pub mod reddit;
pub mod simplecast;
pub mod telegram;
pub mod twitter;
pub mod wallet;
pub mod youtube;

pub use common::HttpOverrides;

use crate::connector::Connector;
use crate::error::{Error, Result};
use serde::Serialize;

type Factory = fn() -> Box<dyn Connector>;

/// Name, category and constructor of every built-in connector
const REGISTRY: &[(&str, &str, Factory)] = &[
    ("etherscan", "Blockchain", || Box::new(etherscan::Etherscan)),
    ("blockscout", "Blockchain", || Box::new(blockscout::Blockscout)),
    ("bitcoin", "Blockchain", || Box::new(bitcoin::Bitcoin)),
    ("wallet", "Blockchain", || Box::new(wallet::WalletFetcher)),
    ("alchemy", "Market data", || Box::new(alchemy::Alchemy)),
    ("coingecko", "Market data", || Box::new(coingecko::CoinGecko)),
    ("luma", "Events", || Box::new(luma::Luma)),
    ("discord", "Social", || Box::new(discord::Discord)),
    ("discourse", "Social", || Box::new(discourse::Discourse)),
    ("mastodon", "Social", || Box::new(mastodon::Mastodon)),
    ("bluesky", "Social", || Box::new(bluesky::Bluesky)),
    ("reddit", "Social", || Box::new(reddit::Reddit)),
    ("telegram", "Social", || Box::new(telegram::Telegram)),
    ("twitter", "Social", || Box::new(twitter::Twitter)),
    ("youtube", "Analytics", || Box::new(youtube::Youtube)),
    ("simplecast", "Analytics", || Box::new(simplecast::Simplecast)),
    ("app_store", "Analytics", || Box::new(app_store::AppStore)),
];

/// Accepted alternative names
const ALIASES: &[(&str, &str)] = &[
    ("x", "twitter"),
    ("app-store", "app_store"),
    ("wallet-fetcher", "wallet"),
];

/// Connector metadata for display
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorInfo {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub category: &'static str,
}

/// Build a connector by name
pub fn create(name: &str) -> Result<Box<dyn Connector>> {
    let name = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, target)| *target);
    REGISTRY
        .iter()
        .find(|(registered, _, _)| *registered == name)
        .map(|(_, _, factory)| factory())
        .ok_or_else(|| Error::UnknownConnector {
            name: name.to_string(),
        })
}

/// Whether `name` (or an alias) is a built-in connector
pub fn is_builtin(name: &str) -> bool {
    create(name).is_ok()
}

/// Every built-in connector, in registry order
pub fn list() -> Vec<ConnectorInfo> {
    REGISTRY
        .iter()
        .map(|(_, category, factory)| {
            let spec = factory().spec();
            ConnectorInfo {
                name: spec.name,
                title: spec.title,
                description: spec.description,
                category: *category,
            }
        })
        .collect()
}
