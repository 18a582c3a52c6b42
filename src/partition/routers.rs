//! Partition router implementations
//!
//! Each router handles a specific partitioning strategy.

use super::types::{PartitionRouter, PartitionValue};
use crate::error::{Error, Result};
use crate::types::{value_at, value_to_string, OptionStringExt};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

// ============================================================================
// List Router
// ============================================================================

/// List-based partition router
///
/// Creates partitions from a static list of values (tags, wallets, coins).
#[derive(Debug, Clone)]
pub struct ListRouter {
    /// `(partition id, value)` pairs
    entries: Vec<(String, String)>,
    /// Field name for partition
    partition_field: String,
}

impl ListRouter {
    /// Create a new list router; each value is also its partition id
    pub fn new(values: Vec<String>, partition_field: impl Into<String>) -> Self {
        Self {
            entries: values.into_iter().map(|v| (v.clone(), v)).collect(),
            partition_field: partition_field.into(),
        }
    }

    /// Create a list router whose partition ids differ from the values,
    /// e.g. wallet name → wallet address
    pub fn named(entries: Vec<(String, String)>, partition_field: impl Into<String>) -> Self {
        Self {
            entries,
            partition_field: partition_field.into(),
        }
    }
}

impl PartitionRouter for ListRouter {
    fn partitions(&self) -> Result<Vec<PartitionValue>> {
        Ok(self
            .entries
            .iter()
            .map(|(id, v)| PartitionValue::new(id.clone()).with_string(&self.partition_field, v))
            .collect())
    }

    fn partition_field(&self) -> &str {
        &self.partition_field
    }
}

// ============================================================================
// Parent Router
// ============================================================================

/// Parent stream-based partition router
///
/// Creates one partition per distinct key found in the parent records, in the
/// order the parent produced them.
#[derive(Debug, Clone)]
pub struct ParentRouter {
    /// Records from parent stream
    parent_records: Vec<Value>,
    /// Dotted key to extract from parent records
    parent_key: String,
    /// Field name for partition
    partition_field: String,
}

impl ParentRouter {
    /// Create a new parent router
    pub fn new(
        parent_records: Vec<Value>,
        parent_key: impl Into<String>,
        partition_field: impl Into<String>,
    ) -> Self {
        Self {
            parent_records,
            parent_key: parent_key.into(),
            partition_field: partition_field.into(),
        }
    }

    /// Distinct parent keys, first occurrence wins
    pub fn keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.parent_records
            .iter()
            .filter_map(|record| self.extract_key(record))
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }

    fn extract_key(&self, record: &Value) -> Option<String> {
        match value_at(record, &self.parent_key)? {
            Value::Null | Value::Array(_) | Value::Object(_) => None,
            v => value_to_string(v).none_if_empty(),
        }
    }
}

impl PartitionRouter for ParentRouter {
    fn partitions(&self) -> Result<Vec<PartitionValue>> {
        Ok(self
            .keys()
            .into_iter()
            .map(|key| PartitionValue::new(&key).with_string(&self.partition_field, key))
            .collect())
    }

    fn partition_field(&self) -> &str {
        &self.partition_field
    }
}

// ============================================================================
// Datetime Router
// ============================================================================

/// Datetime-based partition router
///
/// Creates partitions from datetime ranges.
#[derive(Debug, Clone)]
pub struct DatetimeRouter {
    /// Start datetime
    start: DateTime<Utc>,
    /// End datetime (exclusive)
    end: DateTime<Utc>,
    /// Step duration
    step: Duration,
    /// Format string for datetime output
    format: String,
    /// Parameter name for start
    start_param: String,
    /// Parameter name for end
    end_param: String,
}

impl DatetimeRouter {
    /// Create a new datetime router
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        format: impl Into<String>,
        start_param: impl Into<String>,
        end_param: impl Into<String>,
    ) -> Self {
        Self {
            start,
            end,
            step,
            format: format.into(),
            start_param: start_param.into(),
            end_param: end_param.into(),
        }
    }

    /// One slice per calendar day from `start` through `end`, both included.
    ///
    /// Slices are formatted as `%Y-%m-%d` under `day` and `next_day`.
    pub fn daily(start: NaiveDate, end: NaiveDate) -> Self {
        let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN).and_utc();
        Self::new(
            midnight(start),
            midnight(end) + Duration::days(1),
            Duration::days(1),
            "%Y-%m-%d",
            "day",
            "next_day",
        )
    }

    /// Create from string values
    pub fn from_strings(
        start: &str,
        end: &str,
        step: &str,
        format: impl Into<String>,
        start_param: impl Into<String>,
        end_param: impl Into<String>,
    ) -> Result<Self> {
        let start_dt = parse_datetime(start)?;
        let end_dt = if end == "now" {
            Utc::now()
        } else {
            parse_datetime(end)?
        };
        let step_dur = parse_duration(step)?;
        if step_dur <= Duration::zero() {
            return Err(Error::invalid_value("step", "must be positive"));
        }

        Ok(Self::new(
            start_dt,
            end_dt,
            step_dur,
            format,
            start_param,
            end_param,
        ))
    }

    fn format_datetime(&self, dt: DateTime<Utc>) -> String {
        dt.format(&self.format).to_string()
    }
}

impl PartitionRouter for DatetimeRouter {
    fn partitions(&self) -> Result<Vec<PartitionValue>> {
        let mut partitions = Vec::new();
        let mut current = self.start;

        while current < self.end {
            let next = current + self.step;
            let partition_end = next.min(self.end);

            let start_str = self.format_datetime(current);
            let end_str = self.format_datetime(partition_end);

            let mut values = HashMap::new();
            values.insert(self.start_param.clone(), Value::String(start_str.clone()));
            values.insert(self.end_param.clone(), Value::String(end_str));

            partitions.push(PartitionValue {
                id: start_str,
                values,
            });

            current = next;
        }

        Ok(partitions)
    }

    fn partition_field(&self) -> &str {
        &self.start_param
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a datetime string into UTC DateTime
///
/// Accepts RFC 3339, `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d %H:%M:%S`, `%Y-%m-%d`
/// and `%Y/%m/%d`. Naive values are taken as UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ];
    const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(nd) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(nd.and_time(NaiveTime::MIN).and_utc());
        }
    }

    Err(Error::config(format!("Invalid datetime format: {s}")))
}

/// Parse a duration string like "1d", "2h", "30m"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    let (num_str, suffix) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&s[..idx], c),
        _ => (s, 'd'),
    };

    let num: i64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid duration number: {num_str}")))?;

    let duration = match suffix {
        'w' => Duration::weeks(num),
        'd' => Duration::days(num),
        'h' => Duration::hours(num),
        'm' => Duration::minutes(num),
        's' => Duration::seconds(num),
        _ => return Err(Error::config(format!("Invalid duration suffix: {suffix}"))),
    };

    Ok(duration)
}
