//! Decoder implementations
//!
//! Each decoder handles a specific response format.

use super::types::{CsvValues, RecordDecoder};
use crate::error::{Error, Result};
use crate::types::value_at;
use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use std::io::Read;

// ============================================================================
// JSON Decoder
// ============================================================================

/// JSON decoder with optional record path extraction
#[derive(Debug, Clone, Default)]
pub struct JsonDecoder {
    /// Dotted path to the records
    record_path: Option<String>,
}

impl JsonDecoder {
    /// Create a new JSON decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a JSON decoder with a record path
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            record_path: Some(path.into()),
        }
    }
}

impl RecordDecoder for JsonDecoder {
    fn decode_raw(&self, body: &str) -> Result<Value> {
        serde_json::from_str(body).map_err(|e| Error::Decode {
            message: format!("Failed to parse JSON: {e}"),
        })
    }

    fn extract(&self, raw: &Value) -> Result<Vec<Value>> {
        let target = match &self.record_path {
            Some(path) => value_at(raw, path),
            None => Some(raw),
        };
        Ok(match target {
            Some(Value::Array(arr)) => arr.clone(),
            Some(Value::Null) | None => vec![],
            Some(v) => vec![v.clone()],
        })
    }
}

// ============================================================================
// JSONL Decoder
// ============================================================================

/// JSON Lines decoder (one JSON object per line)
#[derive(Debug, Clone, Default)]
pub struct JsonlDecoder;

impl RecordDecoder for JsonlDecoder {
    fn decode_raw(&self, body: &str) -> Result<Value> {
        let mut records = Vec::new();

        for (line_num, line) in body.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(line).map_err(|e| Error::Decode {
                message: format!("Failed to parse JSONL at line {}: {e}", line_num + 1),
            })?;

            records.push(value);
        }

        Ok(Value::Array(records))
    }

    fn extract(&self, raw: &Value) -> Result<Vec<Value>> {
        Ok(raw.as_array().cloned().unwrap_or_default())
    }
}

// ============================================================================
// CSV Decoder
// ============================================================================

/// CSV decoder with configurable delimiter and header handling
#[derive(Debug, Clone)]
pub struct CsvDecoder {
    /// Field delimiter; `None` sniffs tab vs comma from the first line
    delimiter: Option<char>,
    /// Whether the first row is a header
    has_header: bool,
    values: CsvValues,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            delimiter: Some(','),
            has_header: true,
            values: CsvValues::Typed,
        }
    }
}

impl CsvDecoder {
    /// Create a new CSV decoder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CSV decoder with custom settings
    pub fn with_options(delimiter: char, has_header: bool) -> Self {
        Self {
            delimiter: Some(delimiter),
            has_header,
            ..Self::default()
        }
    }

    /// Header row, delimiter sniffed, cells kept as trimmed strings.
    ///
    /// Matches report exports that may be TSV or CSV.
    pub fn sniffing_raw() -> Self {
        Self {
            delimiter: None,
            has_header: true,
            values: CsvValues::Raw,
        }
    }

    fn delimiter_for(&self, first_line: &str) -> char {
        self.delimiter.unwrap_or_else(|| sniff_delimiter(first_line))
    }

    fn cell(&self, value: &str) -> Value {
        match self.values {
            CsvValues::Typed => parse_csv_value(value),
            CsvValues::Raw if value.is_empty() => Value::Null,
            CsvValues::Raw => Value::String(value.to_string()),
        }
    }
}

impl RecordDecoder for CsvDecoder {
    fn decode_raw(&self, body: &str) -> Result<Value> {
        let body = body.trim_start_matches('\u{feff}');
        let mut records = Vec::new();
        let mut lines = body.lines().peekable();

        let Some(first_line) = lines.peek().copied() else {
            return Ok(Value::Array(records));
        };
        let delimiter = self.delimiter_for(first_line);

        let headers: Vec<String> = if self.has_header {
            lines
                .next()
                .map(|line| parse_csv_line(line, delimiter))
                .unwrap_or_default()
        } else {
            let field_count = parse_csv_line(first_line, delimiter).len();
            (0..field_count).map(|i| format!("column_{i}")).collect()
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }

            let fields = parse_csv_line(line, delimiter);
            let mut obj = Map::new();

            for (i, header) in headers.iter().enumerate() {
                let value = fields.get(i).map(String::as_str).unwrap_or_default();
                obj.insert(header.clone(), self.cell(value));
            }

            records.push(Value::Object(obj));
        }

        Ok(Value::Array(records))
    }

    fn extract(&self, raw: &Value) -> Result<Vec<Value>> {
        Ok(raw.as_array().cloned().unwrap_or_default())
    }
}

/// Tab when the first line contains one, comma otherwise
pub fn sniff_delimiter(first_line: &str) -> char {
    if first_line.contains('\t') {
        '\t'
    } else {
        ','
    }
}

/// Parse a CSV line into trimmed fields
fn parse_csv_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                in_quotes = true;
            }
        } else if c == delimiter && !in_quotes {
            fields.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }

    fields.push(current.trim().to_string());
    fields
}

/// Parse a CSV value into a JSON value
fn parse_csv_value(value: &str) -> Value {
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return Value::Null;
    }

    if let Ok(n) = value.parse::<i64>() {
        return Value::Number(n.into());
    }

    if let Ok(n) = value.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }

    match value.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}

// ============================================================================
// Compression
// ============================================================================

/// Decompress a gzip payload into UTF-8 text
pub fn gunzip(bytes: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| Error::decode(format!("Failed to decompress gzip payload: {e}")))?;
    Ok(out)
}
