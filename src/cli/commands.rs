//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Solidafy source connectors CLI
#[derive(Parser, Debug)]
#[command(name = "solidafy-sources")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Built-in connector name (see `list`)
    #[arg(short, long, global = true)]
    pub connector: Option<String>,

    /// Connector config: inline JSON, or a path to a JSON/YAML file
    #[arg(short = 'C', long, global = true)]
    pub config: Option<String>,

    /// State file (JSON); read before the sync and rewritten after it
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Inline state JSON
    #[arg(long, global = true)]
    pub state_json: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show connector specification
    Spec,

    /// Test connection to the API
    Check,

    /// Discover available streams
    Discover,

    /// Read data from streams
    Read {
        /// Streams to sync (comma-separated, empty = all)
        #[arg(long)]
        streams: Option<String>,

        /// Directory for Parquet output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum records per stream
        #[arg(long)]
        max_records: Option<usize>,

        /// Emit state after each batch of records
        #[arg(long)]
        state_per_page: bool,
    },

    /// List stream names enabled by the config
    Streams,

    /// List built-in connectors
    List,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
    /// Parquet files
    Parquet,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Parquet => "parquet",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_read_args() {
        let cli = Cli::parse_from([
            "solidafy-sources",
            "-c",
            "reddit",
            "-C",
            r#"{"subreddits": ["rust"]}"#,
            "read",
            "--streams",
            "posts,comments",
            "--max-records",
            "10",
        ]);
        assert_eq!(cli.connector.as_deref(), Some("reddit"));
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Read {
                streams,
                max_records,
                state_per_page,
                output,
            } => {
                assert_eq!(streams.as_deref(), Some("posts,comments"));
                assert_eq!(max_records, Some(10));
                assert!(!state_per_page);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["solidafy-sources", "list", "-f", "pretty"]);
        assert_eq!(cli.format, OutputFormat::Pretty);
        assert!(matches!(cli.command, Commands::List));
    }
}
