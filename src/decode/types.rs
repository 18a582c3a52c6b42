//! Decoder types and traits

use crate::error::Result;
use serde_json::Value;

/// Trait for decoding response bodies into records
pub trait RecordDecoder: Send + Sync {
    /// Parse the response body into a single JSON value (full response)
    fn decode_raw(&self, body: &str) -> Result<Value>;

    /// Pull the records out of a parsed response
    fn extract(&self, raw: &Value) -> Result<Vec<Value>>;

    /// Decode the response body into a list of records
    fn decode(&self, body: &str) -> Result<Vec<Value>> {
        let raw = self.decode_raw(body)?;
        self.extract(&raw)
    }
}

/// How CSV cell values are turned into JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvValues {
    /// Numbers, booleans and nulls are inferred
    #[default]
    Typed,
    /// Trimmed strings; empty cells become null
    Raw,
}
