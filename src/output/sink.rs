//! Per-stream Parquet output
//!
//! Records are buffered per stream and written as `<dir>/<stream>.parquet`
//! when the sink is finished. The schema of each file is inferred over all of
//! that stream's records.

use super::schema::{infer_schema, json_to_arrow};
use super::writer::{ParquetWriter, ParquetWriterConfig};
use crate::engine::Message;
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// A Parquet file produced by the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenFile {
    pub stream: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Buffers records per stream, then writes one Parquet file per stream
pub struct ParquetSink {
    dir: PathBuf,
    config: ParquetWriterConfig,
    buffers: BTreeMap<String, Vec<Value>>,
}

impl ParquetSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: ParquetWriterConfig::default(),
            buffers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ParquetWriterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Buffer one record
    pub fn push(&mut self, stream: &str, record: Value) {
        self.buffers
            .entry(stream.to_string())
            .or_default()
            .push(record);
    }

    /// Buffer the record carried by a message; returns whether it was a record
    pub fn push_message(&mut self, message: &Message) -> bool {
        match message {
            Message::Record { stream, data, .. } => {
                self.push(stream, data.clone());
                true
            }
            _ => false,
        }
    }

    /// Records buffered for a stream
    pub fn buffered(&self, stream: &str) -> usize {
        self.buffers.get(stream).map_or(0, Vec::len)
    }

    /// Path the file for `stream` is written to
    pub fn path_for(&self, stream: &str) -> PathBuf {
        let safe: String = stream
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.parquet"))
    }

    /// Write every buffered stream. Streams with no records produce no file.
    pub fn finish(self) -> Result<Vec<WrittenFile>> {
        if self.buffers.values().any(|records| !records.is_empty()) {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                Error::output(format!("Failed to create {}: {e}", self.dir.display()))
            })?;
        }

        let mut written = Vec::new();
        for (stream, records) in &self.buffers {
            if records.is_empty() {
                continue;
            }
            let path = self.path_for(stream);
            let schema = infer_schema(records)?;
            let mut writer = ParquetWriter::new(&path, &schema, &self.config)?;
            for chunk in records.chunks(self.config.row_group_size()) {
                writer.write(&json_to_arrow(chunk, Some(&schema))?)?;
            }
            let rows = writer.close()?;
            info!(stream = %stream, rows, path = %path.display(), "Wrote Parquet file");
            written.push(WrittenFile {
                stream: stream.clone(),
                path,
                rows,
            });
        }
        Ok(written)
    }
}
