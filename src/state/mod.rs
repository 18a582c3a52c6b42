//! State management module
//!
//! Handles cursor tracking, checkpointing, and resumability.
//! State is persisted between sync runs to enable incremental syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `State` - Core state structure with stream and partition tracking
//! - `StateManager` - File-based state persistence
//! - `PartitionUpdate` - Per-partition cursor changes queued during a read
//!
//! Watermarks such as block heights or update offsets live here as stream or
//! partition cursors; connector config files are never rewritten.

mod manager;
mod types;

pub use manager::{PartitionUpdate, StateManager};
pub use types::{PartitionState, State, StreamState};

#[cfg(test)]
mod manager_tests;
