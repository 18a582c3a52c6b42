//! Arrow schema inference and JSON to Arrow conversion
//!
//! Records from REST APIs are loosely typed: a field may be missing, null,
//! or hold a differently shaped object from one record to the next. Schemas
//! are inferred over the whole record set and widened until every record fits.

use crate::error::{Error, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, ListArray, NullArray, StringArray,
    StructArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{DataType, Field, Fields, Schema};
use arrow::record_batch::RecordBatch;
use serde_json::Value;
use std::sync::Arc;

/// Infer an Arrow schema from a set of JSON records
///
/// Fields keep the order in which they are first seen. Every field is nullable.
pub fn infer_schema(records: &[Value]) -> Result<Schema> {
    let mut fields = FieldSet::default();
    for record in records {
        if let Value::Object(obj) = record {
            for (key, value) in obj {
                fields.widen(key, infer_type(value));
            }
        }
    }
    Ok(Schema::new(fields.into_fields()))
}

/// Merge two schemas, combining fields from both
pub fn merge_schemas(schema1: &Schema, schema2: &Schema) -> Schema {
    let mut fields = FieldSet::default();
    for field in schema1.fields().iter().chain(schema2.fields().iter()) {
        fields.widen(field.name(), field.data_type().clone());
    }
    Schema::new(fields.into_fields())
}

/// Convert JSON records to an Arrow RecordBatch
///
/// Uses the provided schema or infers one from the data.
pub fn json_to_arrow(records: &[Value], schema: Option<&Schema>) -> Result<RecordBatch> {
    let schema = match schema {
        Some(s) => s.clone(),
        None => infer_schema(records)?,
    };
    let schema = Arc::new(schema);

    if records.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let values: Vec<Option<&Value>> = records
                .iter()
                .map(|record| record.as_object().and_then(|obj| obj.get(field.name())))
                .collect();
            build_array(&values, field.data_type())
        })
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::try_new(schema, columns)
        .map_err(|e| Error::output(format!("Failed to create RecordBatch: {e}")))
}

// ============================================================================
// Type inference
// ============================================================================

/// Ordered field list that widens a field's type each time it is seen again
#[derive(Default)]
struct FieldSet {
    fields: Vec<(String, DataType)>,
}

impl FieldSet {
    fn widen(&mut self, name: &str, data_type: DataType) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = merge_types(existing, &data_type),
            None => self.fields.push((name.to_string(), data_type)),
        }
    }

    fn into_fields(self) -> Vec<Field> {
        self.fields
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect()
    }
}

fn infer_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::Null,
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() => DataType::Int64,
        Value::Number(_) => DataType::Float64,
        Value::String(_) => DataType::Utf8,
        Value::Array(items) => {
            let item_type = items
                .iter()
                .map(infer_type)
                .fold(DataType::Null, |acc, t| merge_types(&acc, &t));
            list_of(item_type)
        }
        Value::Object(obj) if obj.is_empty() => DataType::Null,
        Value::Object(obj) => {
            let mut fields = FieldSet::default();
            for (key, v) in obj {
                fields.widen(key, infer_type(v));
            }
            DataType::Struct(Fields::from(fields.into_fields()))
        }
    }
}

fn list_of(item_type: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item_type, true)))
}

/// Widest type both inputs fit into; incompatible types become strings
fn merge_types(a: &DataType, b: &DataType) -> DataType {
    match (a, b) {
        (a, b) if a == b => a.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            DataType::Float64
        }
        (DataType::List(x), DataType::List(y)) => list_of(merge_types(x.data_type(), y.data_type())),
        (DataType::Struct(x), DataType::Struct(y)) => {
            let mut fields = FieldSet::default();
            for field in x.iter().chain(y.iter()) {
                fields.widen(field.name(), field.data_type().clone());
            }
            DataType::Struct(Fields::from(fields.into_fields()))
        }
        _ => DataType::Utf8,
    }
}

// ============================================================================
// Array building
// ============================================================================

fn build_array(values: &[Option<&Value>], data_type: &DataType) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Null => Arc::new(NullArray::new(values.len())),
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| v.and_then(Value::as_bool))
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(
            values
                .iter()
                .map(|v| v.and_then(Value::as_i64))
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            values
                .iter()
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        DataType::List(field) => build_list_array(values, field)?,
        DataType::Struct(fields) => build_struct_array(values, fields)?,
        _ => Arc::new(
            values
                .iter()
                .map(|v| v.and_then(as_text))
                .collect::<StringArray>(),
        ),
    };
    Ok(array)
}

/// Text form of a value; nested values are serialized as JSON
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn build_list_array(values: &[Option<&Value>], field: &Arc<Field>) -> Result<ArrayRef> {
    let mut items: Vec<Option<&Value>> = Vec::new();
    let mut offsets: Vec<i32> = vec![0];
    let mut validity = Vec::with_capacity(values.len());

    for value in values {
        let present = if let Some(Value::Array(arr)) = value {
            items.extend(arr.iter().map(Some));
            true
        } else {
            false
        };
        validity.push(present);
        let offset = i32::try_from(items.len())
            .map_err(|_| Error::output("Array too large for i32 offset"))?;
        offsets.push(offset);
    }

    let child = build_array(&items, field.data_type())?;
    let list = ListArray::try_new(
        Arc::clone(field),
        OffsetBuffer::new(offsets.into()),
        child,
        Some(NullBuffer::from(validity)),
    )?;
    Ok(Arc::new(list))
}

fn build_struct_array(values: &[Option<&Value>], fields: &Fields) -> Result<ArrayRef> {
    let objects: Vec<Option<&serde_json::Map<String, Value>>> =
        values.iter().map(|v| v.and_then(Value::as_object)).collect();

    let children = fields
        .iter()
        .map(|field| {
            let child_values: Vec<Option<&Value>> = objects
                .iter()
                .map(|obj| obj.and_then(|o| o.get(field.name())))
                .collect();
            build_array(&child_values, field.data_type())
        })
        .collect::<Result<Vec<_>>>()?;

    let validity = NullBuffer::from(objects.iter().map(Option::is_some).collect::<Vec<_>>());
    let array = StructArray::try_new(fields.clone(), children, Some(validity))?;
    Ok(Arc::new(array))
}
