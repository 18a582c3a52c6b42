//! Response decoder module
//!
//! Supports: JSON, JSONL, CSV/TSV, and gzip-wrapped payloads.
//!
//! Each decoder turns a response body into records using a configured path
//! or layout.

mod decoders;
mod types;

pub use decoders::{gunzip, sniff_delimiter, CsvDecoder, JsonDecoder, JsonlDecoder};
pub use types::{CsvValues, RecordDecoder};
