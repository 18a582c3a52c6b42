//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Complete state for a connector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state
    #[serde(default)]
    pub streams: HashMap<String, StreamState>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&StreamState> {
        self.streams.get(stream)
    }

    /// Get mutable state for a stream, creating if needed
    pub fn get_stream_mut(&mut self, stream: &str) -> &mut StreamState {
        self.streams.entry(stream.to_string()).or_default()
    }

    /// Get cursor for a stream
    pub fn get_cursor(&self, stream: &str) -> Option<&Value> {
        self.streams.get(stream)?.cursor.as_ref()
    }

    /// Set cursor for a stream
    pub fn set_cursor(&mut self, stream: &str, cursor: Value) {
        self.get_stream_mut(stream).cursor = Some(cursor);
    }

    /// Cursor within one partition of a stream
    pub fn get_partition_cursor(&self, stream: &str, partition_id: &str) -> Option<&Value> {
        self.get_stream(stream)?
            .get_partition(partition_id)?
            .cursor
            .as_ref()
    }
}

/// State for a single stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    /// Current cursor value (for incremental sync)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,

    /// Per-partition state (for partitioned streams)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub partitions: HashMap<String, PartitionState>,
}

impl StreamState {
    /// Create a new empty stream state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get partition state
    pub fn get_partition(&self, partition_id: &str) -> Option<&PartitionState> {
        self.partitions.get(partition_id)
    }

    /// Get mutable partition state, creating if needed
    pub fn get_partition_mut(&mut self, partition_id: &str) -> &mut PartitionState {
        self.partitions.entry(partition_id.to_string()).or_default()
    }

    /// Check if a partition is completed
    pub fn is_partition_completed(&self, partition_id: &str) -> bool {
        self.partitions
            .get(partition_id)
            .is_some_and(|p| p.completed)
    }

    /// Mark a partition as completed
    pub fn mark_partition_completed(&mut self, partition_id: &str) {
        self.get_partition_mut(partition_id).completed = true;
    }
}

/// State for a single partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    /// Cursor value within this partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,

    /// Whether this partition has been fully synced
    #[serde(default)]
    pub completed: bool,
}

impl PartitionState {
    /// Create a new empty partition state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a completed partition state
    pub fn completed() -> Self {
        Self {
            cursor: None,
            completed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_default() {
        let state = State::new();
        assert!(state.streams.is_empty());
    }

    #[test]
    fn test_state_cursor() {
        let mut state = State::new();
        assert!(state.get_cursor("blocks").is_none());

        state.set_cursor("blocks", json!(18_000_000));
        assert_eq!(state.get_cursor("blocks"), Some(&json!(18_000_000)));
    }

    #[test]
    fn test_stream_state_partitions() {
        let mut stream_state = StreamState::new();

        assert!(!stream_state.is_partition_completed("p1"));

        stream_state.mark_partition_completed("p1");
        assert!(stream_state.is_partition_completed("p1"));
        assert!(!stream_state.is_partition_completed("p2"));
    }

    #[test]
    fn test_partition_cursor_lookup() {
        let mut state = State::new();
        state
            .get_stream_mut("internal_transaction")
            .get_partition_mut("treasury")
            .cursor = Some(json!("19000001"));

        assert_eq!(
            state.get_partition_cursor("internal_transaction", "treasury"),
            Some(&json!("19000001"))
        );
        assert!(state
            .get_partition_cursor("internal_transaction", "ops")
            .is_none());
    }

    #[test]
    fn test_state_serialization() {
        let mut state = State::new();
        state.set_cursor("messages", json!(42));
        state
            .get_stream_mut("messages")
            .mark_partition_completed("p1");

        let json = serde_json::to_string(&state).unwrap();
        let restored: State = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
    }

    #[test]
    fn test_state_accepts_string_cursor() {
        let state: State =
            serde_json::from_str(r#"{"streams": {"users": {"cursor": "2024-01-01"}}}"#).unwrap();
        assert_eq!(state.get_cursor("users"), Some(&json!("2024-01-01")));
    }
}
