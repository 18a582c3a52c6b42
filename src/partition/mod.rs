//! Partition routing module
//!
//! Supports: Parent stream, List, DateTime ranges
//!
//! # Overview
//!
//! Partitions split a stream into sequential sub-queries:
//! - Child resources that require a parent ID (guests per event)
//! - Date range slicing (one report instance per day)
//! - Static list of values (tags, wallets, coins)
//!
//! A partition's `id` is also the key under which its cursor is kept in
//! state.

mod routers;
mod types;

pub use routers::{parse_datetime, parse_duration, DatetimeRouter, ListRouter, ParentRouter};
pub use types::{PartitionRouter, PartitionValue};
