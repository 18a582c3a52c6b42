//! CLI module
//!
//! Command-line interface for running the built-in connectors.
//!
//! # Commands
//!
//! - `spec` - Show the connector's config specification
//! - `check` - Test connection to the API
//! - `discover` - List available streams with schemas
//! - `read` - Extract data from streams
//! - `streams` - List stream names (lightweight)
//! - `list` - List built-in connectors

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::{parse_config_arg, Runner};
