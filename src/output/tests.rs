//! Tests for output module

use super::*;
use crate::engine::Message;
use arrow::array::{Array, Int64Array, ListArray, StringArray, StructArray};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{json, Value};
use std::fs::File;
use std::path::Path;
use tempfile::tempdir;

fn parquet_rows(path: &Path) -> usize {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    reader.map(|batch| batch.unwrap().num_rows()).sum()
}

// ============================================================================
// Schema Inference Tests
// ============================================================================

#[test]
fn test_infer_schema_empty() {
    let schema = infer_schema(&[]).unwrap();
    assert!(schema.fields().is_empty());
}

#[test]
fn test_infer_schema_keeps_first_seen_order() {
    let records = vec![
        json!({"hash": "0xab", "blockNumber": 10}),
        json!({"value": "5", "hash": "0xcd"}),
    ];

    let schema = infer_schema(&records).unwrap();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["hash", "blockNumber", "value"]);
    assert!(schema.fields().iter().all(|f| f.is_nullable()));
}

#[test]
fn test_infer_schema_null_then_value() {
    let records = vec![
        json!({"name": "alice", "email": null}),
        json!({"name": "bob", "email": "bob@example.com"}),
    ];

    let schema = infer_schema(&records).unwrap();
    assert_eq!(
        schema.field_with_name("email").unwrap().data_type(),
        &DataType::Utf8
    );
}

#[test]
fn test_infer_schema_mixed_numbers() {
    let schema = infer_schema(&[json!({"price": 42}), json!({"price": 0.5})]).unwrap();
    assert_eq!(
        schema.field_with_name("price").unwrap().data_type(),
        &DataType::Float64
    );
}

#[test]
fn test_infer_schema_conflicting_types_become_text() {
    let schema = infer_schema(&[json!({"id": 7}), json!({"id": "t3_abc"})]).unwrap();
    assert_eq!(
        schema.field_with_name("id").unwrap().data_type(),
        &DataType::Utf8
    );
}

#[test]
fn test_infer_schema_structs_widen() {
    let records = vec![
        json!({"author": {"id": "1"}}),
        json!({"author": {"id": "2", "username": "bob"}}),
    ];

    let schema = infer_schema(&records).unwrap();
    match schema.field_with_name("author").unwrap().data_type() {
        DataType::Struct(fields) => {
            let names: Vec<&str> = fields.iter().map(|f| f.name().as_str()).collect();
            assert_eq!(names, vec!["id", "username"]);
        }
        other => panic!("expected struct, got {other:?}"),
    }
}

#[test]
fn test_infer_schema_list_item_type() {
    let schema = infer_schema(&[json!({"tags": [1, 2.5]}), json!({"tags": []})]).unwrap();
    match schema.field_with_name("tags").unwrap().data_type() {
        DataType::List(item) => assert_eq!(item.data_type(), &DataType::Float64),
        other => panic!("expected list, got {other:?}"),
    }
}

#[test]
fn test_infer_schema_empty_object_is_null() {
    let schema = infer_schema(&[json!({"meta": {}})]).unwrap();
    assert_eq!(
        schema.field_with_name("meta").unwrap().data_type(),
        &DataType::Null
    );
}

// ============================================================================
// Merge Schemas Tests
// ============================================================================

#[test]
fn test_merge_schemas_overlapping() {
    let schema1 = infer_schema(&[json!({"a": 1, "b": 2})]).unwrap();
    let schema2 = infer_schema(&[json!({"b": 3.5, "c": "x"})]).unwrap();

    let merged = merge_schemas(&schema1, &schema2);
    assert_eq!(merged.fields().len(), 3);
    assert_eq!(
        merged.field_with_name("b").unwrap().data_type(),
        &DataType::Float64
    );
}

// ============================================================================
// JSON to Arrow Tests
// ============================================================================

#[test]
fn test_json_to_arrow_missing_and_null() {
    let records = vec![
        json!({"id": 1, "name": "alice"}),
        json!({"id": 2, "name": null}),
        json!({"id": 3}),
    ];

    let batch = json_to_arrow(&records, None).unwrap();
    assert_eq!(batch.num_rows(), 3);
    let names = batch
        .column_by_name("name")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(names.value(0), "alice");
    assert!(names.is_null(1));
    assert!(names.is_null(2));
}

#[test]
fn test_json_to_arrow_text_column_serializes_nested() {
    let records = vec![json!({"v": "plain"}), json!({"v": {"nested": true}})];

    let batch = json_to_arrow(&records, None).unwrap();
    let column = batch
        .column_by_name("v")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(column.value(0), "plain");
    assert_eq!(column.value(1), r#"{"nested":true}"#);
}

#[test]
fn test_json_to_arrow_struct_nulls() {
    let records = vec![
        json!({"owner": {"login": "octo", "id": 100}}),
        json!({"owner": null}),
    ];

    let batch = json_to_arrow(&records, None).unwrap();
    let owner = batch
        .column_by_name("owner")
        .unwrap()
        .as_any()
        .downcast_ref::<StructArray>()
        .unwrap();
    assert!(owner.is_valid(0));
    assert!(owner.is_null(1));
    let ids = owner
        .column_by_name("id")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(ids.value(0), 100);
}

#[test]
fn test_json_to_arrow_lists() {
    let records = vec![
        json!({"tags": ["a", "b"]}),
        json!({"tags": []}),
        json!({"other": 1}),
    ];

    let batch = json_to_arrow(&records, None).unwrap();
    let tags = batch
        .column_by_name("tags")
        .unwrap()
        .as_any()
        .downcast_ref::<ListArray>()
        .unwrap();
    assert_eq!(tags.value_length(0), 2);
    assert!(tags.is_valid(1));
    assert_eq!(tags.value_length(1), 0);
    assert!(tags.is_null(2));
}

#[test]
fn test_json_to_arrow_provided_schema() {
    let records = vec![json!({"id": 1, "name": "alice", "extra": "ignored"})];
    let schema = infer_schema(&[json!({"id": 0, "name": ""})]).unwrap();

    let batch = json_to_arrow(&records, Some(&schema)).unwrap();
    assert_eq!(batch.num_columns(), 2);
}

#[test]
fn test_json_to_arrow_empty_keeps_schema() {
    let schema = infer_schema(&[json!({"id": 0})]).unwrap();
    let batch = json_to_arrow(&[], Some(&schema)).unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.num_columns(), 1);
}

// ============================================================================
// Parquet Writer Tests
// ============================================================================

#[test]
fn test_parquet_writer_config() {
    let config = ParquetWriterConfig::new().with_row_group_size(0).uncompressed();
    assert_eq!(config.row_group_size(), 1);
    assert_eq!(
        config.compression(),
        parquet::basic::Compression::UNCOMPRESSED
    );
}

#[test]
fn test_parquet_writer_rows_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("writer.parquet");

    let batch = json_to_arrow(&[json!({"id": 1}), json!({"id": 2})], None).unwrap();
    let mut writer =
        ParquetWriter::new(&path, batch.schema().as_ref(), &ParquetWriterConfig::default())
            .unwrap();
    assert_eq!(writer.rows_written(), 0);

    writer.write(&batch).unwrap();
    writer.write(&batch).unwrap();
    assert_eq!(writer.rows_written(), 4);
    assert_eq!(writer.close().unwrap(), 4);
    assert_eq!(parquet_rows(&path), 4);
}

#[test]
fn test_parquet_writer_bad_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing").join("x.parquet");
    let schema = infer_schema(&[json!({"id": 1})]).unwrap();

    let result = ParquetWriter::new(&path, &schema, &ParquetWriterConfig::default());
    assert!(matches!(result, Err(crate::Error::Output { .. })));
}

// ============================================================================
// Parquet Sink Tests
// ============================================================================

#[test]
fn test_sink_one_file_per_stream() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let mut sink = ParquetSink::new(&out);

    for i in 0..3 {
        sink.push("transactions", json!({"hash": format!("0x{i}"), "blockNumber": i}));
    }
    sink.push("balances", json!({"address": "0xabc", "balance": "12"}));
    assert!(!sink.push_message(&Message::info("not a record")));
    assert!(sink.push_message(&Message::record("balances", json!({"address": "0xdef"}))));
    assert_eq!(sink.buffered("balances"), 2);

    let written = sink.finish().unwrap();
    assert_eq!(written.len(), 2);
    // BTreeMap order
    assert_eq!(written[0].stream, "balances");
    assert_eq!(written[0].rows, 2);
    assert_eq!(written[1].path, out.join("transactions.parquet"));
    assert_eq!(parquet_rows(&written[1].path), 3);
}

#[test]
fn test_sink_row_groups() {
    let dir = tempdir().unwrap();
    let mut sink = ParquetSink::new(dir.path())
        .with_config(ParquetWriterConfig::new().with_row_group_size(2));

    let records: Vec<Value> = (0..5).map(|i| json!({"n": i})).collect();
    for record in records {
        sink.push("numbers", record);
    }

    let written = sink.finish().unwrap();
    assert_eq!(written[0].rows, 5);
    assert_eq!(parquet_rows(&written[0].path), 5);
}

#[test]
fn test_sink_empty_writes_nothing() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("never-created");

    let written = ParquetSink::new(&out).finish().unwrap();
    assert!(written.is_empty());
    assert!(!out.exists());
}

#[test]
fn test_sink_sanitizes_stream_names() {
    let sink = ParquetSink::new("/tmp/out");
    assert_eq!(
        sink.path_for("app/store sales"),
        Path::new("/tmp/out/app_store_sales.parquet")
    );
}
