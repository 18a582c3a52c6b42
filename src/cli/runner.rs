//! CLI runner - executes commands

use super::commands::{Cli, Commands, OutputFormat};
use crate::connector::{select_streams, Catalog, Connector, ConfiguredCatalog};
use crate::engine::{Message, SyncConfig, SyncEngine};
use crate::error::{Error, Result};
use crate::output::ParquetSink;
use crate::sources;
use crate::state::StateManager;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Spec => self.spec(),
            Commands::Check => self.check().await,
            Commands::Discover => self.discover().await,
            Commands::Read {
                streams,
                output,
                max_records,
                state_per_page,
            } => {
                self.read(
                    streams.as_deref(),
                    output.as_deref(),
                    *max_records,
                    *state_per_page,
                )
                .await
            }
            Commands::Streams => self.streams(),
            Commands::List => self.list_connectors(),
        }
    }

    /// Build the connector named by `--connector`
    fn load_connector(&self) -> Result<Box<dyn Connector>> {
        let name = self
            .cli
            .connector
            .as_deref()
            .ok_or_else(|| Error::missing_field("--connector"))?;
        sources::create(name)
    }

    /// Load configuration
    fn load_config(&self) -> Result<Value> {
        match &self.cli.config {
            Some(raw) => parse_config_arg(raw),
            None => Ok(json!({})),
        }
    }

    /// Load state
    fn load_state(&self) -> Result<StateManager> {
        // Inline state takes precedence
        if let Some(state_json) = &self.cli.state_json {
            StateManager::from_json(state_json)
        } else if let Some(path) = &self.cli.state {
            StateManager::from_file(path)
        } else {
            Ok(StateManager::in_memory())
        }
    }

    /// Show spec
    fn spec(&self) -> Result<()> {
        let spec = self.load_connector()?.spec();

        self.output_message(&json!({
            "type": "SPEC",
            "spec": {
                "name": spec.name,
                "title": spec.title,
                "description": spec.description,
                "connectionSpecification": spec.connection_specification()
            }
        }));

        Ok(())
    }

    /// Check connection
    async fn check(&self) -> Result<()> {
        let connector = self.load_connector()?;
        let config = self.load_config()?;
        let name = connector.spec().name;

        self.log("INFO", &format!("Checking connection to {name}"));

        let (status, message) = match connector.check(&config).await {
            Ok(result) if result.success => (
                "SUCCEEDED",
                result
                    .message
                    .unwrap_or_else(|| "Connection successful".to_string()),
            ),
            Ok(result) => (
                "FAILED",
                result
                    .message
                    .unwrap_or_else(|| "Connection failed".to_string()),
            ),
            Err(e) => ("FAILED", format!("Connection failed: {e}")),
        };

        self.output_message(&json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": {
                "status": status,
                "message": message
            }
        }));

        Ok(())
    }

    /// Discover streams
    async fn discover(&self) -> Result<()> {
        let connector = self.load_connector()?;
        let config = self.load_config()?;
        let catalog = connector.discover(&config).await?;

        self.output_message(&json!({
            "type": "CATALOG",
            "catalog": serde_json::to_value(&catalog)?
        }));

        Ok(())
    }

    /// List stream names (no schemas)
    fn streams(&self) -> Result<()> {
        let connector = self.load_connector()?;
        let config = self.load_config()?;
        let names: Vec<String> = connector
            .streams(&config)?
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        self.output_message(&json!({
            "type": "STREAMS",
            "streams": names,
            "connector": connector.spec().name
        }));

        Ok(())
    }

    /// List built-in connectors
    fn list_connectors(&self) -> Result<()> {
        self.output_message(&json!({
            "type": "CONNECTORS",
            "connectors": serde_json::to_value(sources::list())?
        }));

        Ok(())
    }

    /// Read data
    async fn read(
        &self,
        streams: Option<&str>,
        output: Option<&Path>,
        max_records: Option<usize>,
        state_per_page: bool,
    ) -> Result<()> {
        let sync_start = Instant::now();
        let connector = self.load_connector()?;
        let connector_name = connector.spec().name;
        let config = self.load_config()?;
        let state = self.load_state()?;

        let parquet = self.cli.format == OutputFormat::Parquet;
        if parquet && output.is_none() {
            return Err(Error::config("Parquet format requires --output directory"));
        }
        let mut sink = output.map(ParquetSink::new);

        // Parse streams filter
        let stream_filter: Option<Vec<&str>> = streams.map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        });

        let built = connector.streams(&config)?;
        let catalog = Catalog {
            streams: built.iter().map(|s| s.catalog_entry()).collect(),
        };
        if let Some(filter) = &stream_filter {
            if let Some(unknown) = filter.iter().find(|name| catalog.stream(name).is_none()) {
                return Err(Error::StreamNotFound {
                    stream: (*unknown).to_string(),
                });
            }
        }
        let configured = ConfiguredCatalog::from_catalog(&catalog, stream_filter.as_deref());
        let selected = select_streams(&built, &configured)?;

        // Build sync config
        let mut sync_config = SyncConfig::new().with_state_per_page(state_per_page);
        if let Some(max) = max_records {
            sync_config = sync_config.with_max_records(max);
        }
        let mut engine = SyncEngine::new(state).with_config(sync_config);

        // Track per-stream statistics
        let mut stream_results: Vec<Value> = Vec::new();
        let mut total_records = 0usize;

        for (stream, mode) in &selected {
            let stream_start = Instant::now();
            let records_before = engine.stats().records_synced;

            let sync_result = engine.sync_stream(stream.as_ref(), *mode).await;

            let stream_duration_ms = stream_start.elapsed().as_millis() as u64;
            let stream_records = engine.stats().records_synced - records_before;

            match sync_result {
                Ok(messages) => {
                    for msg in &messages {
                        self.output_engine_message(msg, sink.as_mut());
                    }
                    total_records += stream_records;
                    stream_results.push(json!({
                        "stream": stream.name(),
                        "status": "SUCCESS",
                        "records_synced": stream_records,
                        "duration_ms": stream_duration_ms
                    }));
                }
                Err(e) => {
                    self.log(
                        "ERROR",
                        &format!("Error syncing stream {}: {e}", stream.name()),
                    );
                    stream_results.push(json!({
                        "stream": stream.name(),
                        "status": "FAILED",
                        "error": e.to_string(),
                        "records_synced": 0,
                        "duration_ms": stream_duration_ms
                    }));
                }
            }
        }

        let written = match sink {
            Some(sink) => sink.finish()?,
            None => Vec::new(),
        };
        for result in &mut stream_results {
            if let Some(file) = written.iter().find(|f| result["stream"] == f.stream.as_str()) {
                result["output_file"] = json!(file.path.display().to_string());
            }
        }

        // Output final state
        let state_file_path = if let Some(state_path) = &self.cli.state {
            engine.state().save_to_file(state_path).await?;
            Some(state_path.display().to_string())
        } else {
            None
        };

        // Always emit final state to stdout so caller can capture it
        let final_state: Value = serde_json::from_str(&engine.state().to_json().await?)?;
        self.output_message(&json!({
            "type": "STATE",
            "state": final_state
        }));

        // Emit sync summary for programmatic consumption
        let total_duration_ms = sync_start.elapsed().as_millis() as u64;
        let successful_streams = stream_results
            .iter()
            .filter(|r| r["status"] == "SUCCESS")
            .count();
        let failed_streams = stream_results.len() - successful_streams;

        self.output_message(&json!({
            "type": "SYNC_SUMMARY",
            "summary": {
                "status": summary_status(successful_streams, failed_streams),
                "connector": connector_name,
                "total_records": total_records,
                "total_streams": stream_results.len(),
                "successful_streams": successful_streams,
                "failed_streams": failed_streams,
                "duration_ms": total_duration_ms,
                "output": {
                    "format": self.cli.format.as_str(),
                    "directory": output.map(|dir| dir.display().to_string()),
                    "files": written,
                    "state_file": state_file_path
                },
                "streams": stream_results
            }
        }));

        Ok(())
    }

    /// Output an engine message; records also go to the Parquet sink
    fn output_engine_message(&self, msg: &Message, sink: Option<&mut ParquetSink>) {
        let buffered = sink.is_some_and(|sink| sink.push_message(msg));
        // Parquet format: records go to files only
        if buffered && self.cli.format == OutputFormat::Parquet {
            return;
        }
        self.output_message(&msg.to_protocol());
    }

    fn log(&self, level: &str, message: &str) {
        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": level,
                "message": message
            }
        }));
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json | OutputFormat::Parquet => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Parse `--config`: inline JSON, or a JSON/YAML file path
pub fn parse_config_arg(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| Error::config(format!("Invalid config JSON: {e}")));
    }

    let path = Path::new(trimmed);
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("Invalid config YAML: {e}")))
    } else {
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("Invalid config JSON: {e}")))
    }
}

fn summary_status(successful: usize, failed: usize) -> &'static str {
    if failed == 0 {
        "SUCCEEDED"
    } else if successful == 0 {
        "FAILED"
    } else {
        "PARTIAL"
    }
}
