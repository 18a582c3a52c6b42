//! # Solidafy Sources
//!
//! REST API source connectors for blockchain, market, social, podcast and
//! app-store data, with incremental state and Arrow/Parquet output.
//!
//! ## Features
//!
//! - **Built-in Connectors**: Etherscan, Blockscout, Bitcoin, wallets, Alchemy,
//!   CoinGecko, Luma, Discord, Discourse, Mastodon, Bluesky, Reddit, Telegram,
//!   X/Twitter, YouTube, Simplecast and App Store Connect
//! - **Multiple Auth Types**: API Key, Bearer, Basic, OAuth2, Session and JWT
//! - **Smart Pagination**: Cursor, offset, page number, response params, last record
//! - **Incremental Sync**: Stream and partition cursors carried in state
//! - **Parquet Output**: One file per stream through Arrow
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_sources::connector::{Connector, ConfiguredCatalog};
//! use solidafy_sources::{sources, Result};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = sources::create("reddit")?;
//!     let config = serde_json::json!({ "subreddits": ["rust"] });
//!
//!     let status = connector.check(&config).await?;
//!     let catalog = connector.discover(&config).await?;
//!     let configured = ConfiguredCatalog::from_catalog(&catalog, None);
//!
//!     let mut messages = connector.read(&config, &configured, None).await?;
//!     while let Some(msg) = messages.next().await {
//!         println!("{}", msg?.to_protocol());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Connector Interface                         │
//! │  spec() → ConnectorSpec  check() → CheckResult  discover() → Catalog
//! │  streams(config) → [SourceStream]   read(catalog, state) → Messages
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │   Auth   │   HTTP    │   Paginate    │ Partition │   Output    │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ API Key  │ GET/POST  │ Cursor        │ Parent    │ Arrow       │
//! │ OAuth2   │ Retry     │ Offset        │ DateTime  │ Parquet     │
//! │ JWT      │ Rate Limit│ Page Number   │ List      │             │
//! │ Session  │ Backoff   │ Params        │           │             │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and JSON helpers
pub mod types;

/// Authentication implementations
pub mod auth;

/// HTTP client with retry and rate limiting
pub mod http;

/// Pagination strategies
pub mod pagination;

/// Partition routing
pub mod partition;

/// Response decoders (JSON, JSON lines, CSV, gzip)
pub mod decode;

/// State management and checkpointing
pub mod state;

/// Arrow/Parquet output
pub mod output;

/// Fetch loop and sync engine
pub mod engine;

/// Connector trait, spec and catalog types
pub mod connector;

/// Built-in source connectors
pub mod sources;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use connector::Connector;
pub use error::{Error, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
