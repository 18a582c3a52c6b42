//! Execution engine module
//!
//! Fetch loop, stream trait and sync orchestration.
//!
//! # Overview
//!
//! The engine module provides:
//! - `fetch_pages` - The paginated fetch loop every connector reuses
//! - `SourceStream` / `StreamContext` - What a connector stream implements
//! - `SyncEngine` - Runs streams, emits records and commits state
//! - Message types for output (Record, State, Log)

mod fetch;
mod stream;
mod types;

pub use fetch::{
    fetch_json, fetch_one, fetch_pages, record_time, Boundary, FetchOptions, FetchOutcome,
    PageRequest, StopReason, DEFAULT_MAX_PAGES,
};
pub use stream::{SourceStream, StreamContext};
pub use types::{LogLevel, Message, SyncConfig, SyncStats};

use crate::error::Result;
use crate::state::StateManager;
use crate::types::{value_at, SyncMode};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info};

/// Sync engine for orchestrating data extraction
pub struct SyncEngine {
    /// State manager
    state: StateManager,
    /// Sync configuration
    config: SyncConfig,
    /// Statistics
    stats: SyncStats,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(state: StateManager) -> Self {
        Self {
            state,
            config: SyncConfig::default(),
            stats: SyncStats::default(),
        }
    }

    /// Set sync configuration
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the state manager
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Get the sync configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Read one stream, emit its records and commit its state
    pub async fn sync_stream(
        &mut self,
        stream: &dyn SourceStream,
        sync_mode: SyncMode,
    ) -> Result<Vec<Message>> {
        let start = Instant::now();
        let name = stream.name().to_string();
        let mut messages = vec![Message::info(format!("Starting sync for stream: {name}"))];
        info!(stream = %name, mode = ?sync_mode, "Starting stream");

        let ctx = StreamContext::new(self.state.snapshot().await, sync_mode);
        let mut records = stream.read(&ctx).await?;
        messages.extend(ctx.drain_logs());
        if self.config.max_records > 0 {
            records.truncate(self.config.max_records);
        }

        let mut cursor = self.state.get_cursor(&name).await;
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            messages.extend(chunk.iter().map(|r| Message::record(&name, r.clone())));

            if let Some(field) = stream.cursor_field() {
                cursor = newer_cursor(cursor, max_cursor(chunk, field));
                if self.config.emit_state_per_page {
                    if let Some(c) = &cursor {
                        self.state.set_cursor(&name, c.clone()).await?;
                        messages.push(self.state_message(&name).await);
                    }
                }
            }
        }

        cursor = newer_cursor(cursor, ctx.take_cursor_advance());
        if let Some(c) = cursor.filter(|_| stream.cursor_field().is_some()) {
            self.state.set_cursor(&name, c).await?;
        }
        let mut updates: HashMap<String, Vec<_>> = HashMap::new();
        for (owner, update) in ctx.drain_partition_updates() {
            updates.entry(owner).or_default().push(update);
        }
        for (owner, owner_updates) in updates {
            self.state
                .apply_partition_updates(&owner, owner_updates)
                .await?;
        }
        messages.push(self.state_message(&name).await);

        let pages = ctx.pages();
        self.stats.add_records(records.len());
        self.stats.add_pages(pages);
        self.stats.add_stream();
        #[allow(clippy::cast_possible_truncation)]
        self.stats.set_duration(start.elapsed().as_millis() as u64);

        info!(stream = %name, records = records.len(), pages, "Completed stream");
        messages.push(Message::info(format!(
            "Completed sync for {name}: {} records in {pages} pages",
            records.len()
        )));

        Ok(messages)
    }

    /// Run several streams in order.
    ///
    /// With `fail_fast` off a failing stream becomes an error log and the
    /// remaining streams still run.
    pub async fn sync_streams(
        &mut self,
        streams: &[(&dyn SourceStream, SyncMode)],
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        for (stream, mode) in streams {
            match self.sync_stream(*stream, *mode).await {
                Ok(stream_messages) => messages.extend(stream_messages),
                Err(e) => {
                    self.stats.add_error();
                    error!(stream = %stream.name(), error = %e, "Stream failed");
                    if self.config.fail_fast {
                        return Err(e);
                    }
                    messages.push(Message::error(format!(
                        "Error syncing stream {}: {e}",
                        stream.name()
                    )));
                }
            }
        }
        Ok(messages)
    }

    async fn state_message(&self, stream: &str) -> Message {
        let data = self
            .state
            .state()
            .await
            .get_stream(stream)
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Message::state(stream, data)
    }
}

// ============================================================================
// Cursor helpers
// ============================================================================

/// Largest value of `field` across records; numeric when both sides are
pub fn max_cursor(records: &[Value], field: &str) -> Option<Value> {
    records
        .iter()
        .filter_map(|record| value_at(record, field))
        .filter(|v| matches!(v, Value::String(_) | Value::Number(_)))
        .max_by(|a, b| compare_cursors(a, b))
        .cloned()
}

/// Order two cursor values, numerically when both read as numbers
pub fn compare_cursors(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => cursor_text(a).cmp(&cursor_text(b)),
    }
}

fn newer_cursor(current: Option<Value>, candidate: Option<Value>) -> Option<Value> {
    match (current, candidate) {
        (Some(c), Some(n)) => Some(if compare_cursors(&n, &c) == Ordering::Greater {
            n
        } else {
            c
        }),
        (c, n) => n.or(c),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cursor_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests;
