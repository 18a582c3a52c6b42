//! Stream trait and the per-read context handed to it

use super::compare_cursors;
use super::fetch::{FetchOutcome, StopReason};
use super::types::{LogLevel, Message};
use crate::connector::CatalogStream;
use crate::error::Result;
use crate::state::{PartitionUpdate, State};
use crate::types::SyncMode;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

// ============================================================================
// Stream Context
// ============================================================================

/// What a stream sees while it reads.
///
/// The state is a snapshot taken before the read; cursor changes a stream
/// wants persisted per partition are queued here and committed by the engine
/// once the read succeeds.
#[derive(Debug, Default)]
pub struct StreamContext {
    state: State,
    sync_mode: SyncMode,
    partition_updates: Mutex<Vec<(String, PartitionUpdate)>>,
    cursor_advance: Mutex<Option<Value>>,
    logs: Mutex<Vec<Message>>,
    pages: AtomicUsize,
}

impl StreamContext {
    /// Create a context over a state snapshot
    pub fn new(state: State, sync_mode: SyncMode) -> Self {
        Self {
            state,
            sync_mode,
            ..Self::default()
        }
    }

    /// Full refresh with no prior state
    pub fn full_refresh() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn is_incremental(&self) -> bool {
        self.sync_mode == SyncMode::Incremental
    }

    /// Stream-level cursor from the snapshot
    pub fn stream_cursor(&self, stream: &str) -> Option<&Value> {
        self.state.get_cursor(stream)
    }

    /// Partition cursor from the snapshot
    pub fn partition_cursor(&self, stream: &str, partition_id: &str) -> Option<&Value> {
        self.state.get_partition_cursor(stream, partition_id)
    }

    /// Queue a partition cursor for commit
    pub fn update_partition(&self, stream: &str, partition_id: &str, cursor: Value) {
        self.partition_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stream.to_string(), PartitionUpdate::new(partition_id, cursor)));
    }

    /// Take every queued partition update
    pub fn drain_partition_updates(&self) -> Vec<(String, PartitionUpdate)> {
        std::mem::take(
            &mut *self
                .partition_updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Raise the stream cursor past records that were read but not emitted.
    ///
    /// The engine keeps the larger of this and the maximum over emitted records.
    pub fn advance_cursor(&self, cursor: Value) {
        let mut slot = self
            .cursor_advance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let newer = slot
            .as_ref()
            .map_or(true, |current| compare_cursors(&cursor, current).is_gt());
        if newer {
            *slot = Some(cursor);
        }
    }

    /// Take the cursor raised through `advance_cursor`
    pub fn take_cursor_advance(&self) -> Option<Value> {
        self.cursor_advance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Queue an operator-visible log message
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Message::log(level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.log(LogLevel::Warn, message);
    }

    /// Take every queued log message
    pub fn drain_logs(&self) -> Vec<Message> {
        std::mem::take(&mut *self.logs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Count pages fetched outside `fetch_pages`
    pub fn add_pages(&self, count: usize) {
        self.pages.fetch_add(count, Ordering::Relaxed);
    }

    /// Account for a finished fetch loop; a repeated cursor is logged
    pub fn record_fetch(&self, outcome: &FetchOutcome, what: &str) {
        self.add_pages(outcome.pages);
        if outcome.stop_reason == StopReason::RepeatedCursor {
            self.warn(format!(
                "Pagination loop detected for {what}, stopped after {} pages",
                outcome.pages
            ));
        }
    }

    /// Pages fetched so far
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Source Stream
// ============================================================================

/// One stream of a connector
#[async_trait]
pub trait SourceStream: Send + Sync {
    /// Stream name as it appears in the catalog
    fn name(&self) -> &str;

    /// Primary key fields (composite keys list several)
    fn primary_key(&self) -> Vec<String> {
        Vec::new()
    }

    /// Field whose maximum becomes the stream cursor
    fn cursor_field(&self) -> Option<&str> {
        None
    }

    fn supported_sync_modes(&self) -> Vec<SyncMode> {
        if self.cursor_field().is_some() {
            vec![SyncMode::FullRefresh, SyncMode::Incremental]
        } else {
            vec![SyncMode::FullRefresh]
        }
    }

    fn json_schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": true})
    }

    /// Read every record of the stream
    async fn read(&self, ctx: &StreamContext) -> Result<Vec<Value>>;

    /// Catalog entry describing this stream
    fn catalog_entry(&self) -> CatalogStream {
        let primary_key = self.primary_key();
        CatalogStream {
            name: self.name().to_string(),
            json_schema: self.json_schema(),
            supported_sync_modes: self.supported_sync_modes(),
            default_cursor_field: self.cursor_field().map(|f| vec![f.to_string()]),
            source_defined_primary_key: if primary_key.is_empty() {
                None
            } else {
                Some(primary_key.into_iter().map(|k| vec![k]).collect())
            },
        }
    }
}
