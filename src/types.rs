//! Common types used throughout the connectors
//!
//! Shared type aliases, enums and small JSON helpers used by more than one
//! module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// HTTP Types
// ============================================================================

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    GET,
    POST,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::GET => reqwest::Method::GET,
            Method::POST => reqwest::Method::POST,
        }
    }
}

// ============================================================================
// Sync Mode
// ============================================================================

/// Synchronization mode for streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full refresh - fetch all data every time
    #[default]
    FullRefresh,
    /// Incremental - only fetch new/updated data
    Incremental,
}

/// How data should be written to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    #[default]
    Append,
    Overwrite,
    AppendDedup,
}

// ============================================================================
// Property Type (for spec)
// ============================================================================

/// Property type for configuration schema
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// JWT Algorithm
// ============================================================================

/// JWT signing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    HS256,
    #[default]
    RS256,
    RS384,
    RS512,
    /// ECDSA using P-256 and SHA-256 (App Store Connect keys)
    ES256,
    ES384,
}

impl JwtAlgorithm {
    /// Whether the key is an EC PEM rather than RSA
    pub fn is_ecdsa(self) -> bool {
        matches!(self, JwtAlgorithm::ES256 | JwtAlgorithm::ES384)
    }
}

impl From<JwtAlgorithm> for jsonwebtoken::Algorithm {
    fn from(alg: JwtAlgorithm) -> Self {
        match alg {
            JwtAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            JwtAlgorithm::RS256 => jsonwebtoken::Algorithm::RS256,
            JwtAlgorithm::RS384 => jsonwebtoken::Algorithm::RS384,
            JwtAlgorithm::RS512 => jsonwebtoken::Algorithm::RS512,
            JwtAlgorithm::ES256 => jsonwebtoken::Algorithm::ES256,
            JwtAlgorithm::ES384 => jsonwebtoken::Algorithm::ES384,
        }
    }
}

// ============================================================================
// JSON Helpers
// ============================================================================

/// Walk a dotted path like `data.items[0].id` or `prices[-1]`.
///
/// An empty path or `$` returns the value itself. Negative indices count
/// from the end of the array.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim_start_matches('$').trim_start_matches('.');
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for segment in path.split('.') {
        let (key, indices) = split_indices(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for idx in indices {
            let arr = current.as_array()?;
            let pos = if idx < 0 {
                arr.len()
                    .checked_sub(usize::try_from(idx.unsigned_abs()).ok()?)?
            } else {
                usize::try_from(idx).ok()?
            };
            current = arr.get(pos)?;
        }
    }
    Some(current)
}

fn split_indices(segment: &str) -> Option<(&str, Vec<i64>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..bracket];
    let mut indices = Vec::new();
    for part in segment[bracket..].split('[').skip(1) {
        let idx = part.strip_suffix(']')?.parse::<i64>().ok()?;
        indices.push(idx);
    }
    Some((key, indices))
}

/// Render a scalar JSON value as a plain string (strings unquoted).
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Copy the listed keys from an object, filling missing ones with null.
pub fn pick_keys(value: &Value, keys: &[&str]) -> Value {
    let mut out = JsonObject::new();
    for key in keys {
        out.insert(
            (*key).to_string(),
            value.get(*key).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

/// Read an integer that APIs sometimes send as a string.
pub fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a float that APIs sometimes send as a string.
pub fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.is_empty())
    }
}

impl OptionStringExt for String {
    fn none_if_empty(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_conversion() {
        let get: reqwest::Method = Method::GET.into();
        assert_eq!(reqwest::Method::GET, get);
        let post: reqwest::Method = Method::POST.into();
        assert_eq!(reqwest::Method::POST, post);
    }

    #[test]
    fn test_sync_mode_serde() {
        let mode: SyncMode = serde_json::from_str("\"incremental\"").unwrap();
        assert_eq!(mode, SyncMode::Incremental);

        let json = serde_json::to_string(&SyncMode::FullRefresh).unwrap();
        assert_eq!(json, "\"full_refresh\"");
    }

    #[test]
    fn test_jwt_algorithm_conversion() {
        assert_eq!(jsonwebtoken::Algorithm::RS256, JwtAlgorithm::RS256.into());
        assert_eq!(jsonwebtoken::Algorithm::ES256, JwtAlgorithm::ES256.into());
        assert!(JwtAlgorithm::ES256.is_ecdsa());
        assert!(!JwtAlgorithm::RS256.is_ecdsa());
    }

    #[test]
    fn test_value_at_paths() {
        let v = json!({
            "data": {"items": [{"id": 1}, {"id": 2}]},
            "prices": [[0, 1.5], [1, 2.5]]
        });
        assert_eq!(value_at(&v, "data.items[1].id"), Some(&json!(2)));
        assert_eq!(value_at(&v, "$.data.items[0].id"), Some(&json!(1)));
        assert_eq!(value_at(&v, "prices[1][1]"), Some(&json!(2.5)));
        assert_eq!(value_at(&v, "prices[-1][0]"), Some(&json!(1)));
        assert_eq!(value_at(&v, ""), Some(&v));
        assert_eq!(value_at(&v, "data.missing"), None);
        assert_eq!(value_at(&v, "prices[5]"), None);
        assert_eq!(value_at(&v, "prices[-5]"), None);
        assert_eq!(value_at(&v, "prices[-9223372036854775808]"), None);
    }

    #[test]
    fn test_pick_keys_fills_missing() {
        let v = json!({"id": "1", "name": "a", "extra": true});
        assert_eq!(
            pick_keys(&v, &["id", "name", "topic"]),
            json!({"id": "1", "name": "a", "topic": null})
        );
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(lenient_i64(Some(&json!("42"))), Some(42));
        assert_eq!(lenient_i64(Some(&json!(7))), Some(7));
        assert_eq!(lenient_i64(Some(&json!("x"))), None);
        assert_eq!(lenient_i64(None), None);
        assert_eq!(lenient_f64(Some(&json!("1.5"))), Some(1.5));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("a")), Some("a".to_string()));
        assert_eq!(value_to_string(&json!(12)), Some("12".to_string()));
        assert_eq!(value_to_string(&Value::Null), None);
    }

    #[test]
    fn test_option_string_none_if_empty() {
        assert_eq!(
            Some("test".to_string()).none_if_empty(),
            Some("test".to_string())
        );
        assert_eq!(Some(String::new()).none_if_empty(), None);
        assert_eq!(String::new().none_if_empty(), None);
    }
}
