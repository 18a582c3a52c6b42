//! Output module
//!
//! Arrow RecordBatch creation and Parquet file writing.
//!
//! # Overview
//!
//! - Inferring Arrow schemas from JSON records
//! - Converting JSON to Arrow RecordBatches
//! - Writing Parquet files, one per stream

mod schema;
mod sink;
mod writer;

pub use schema::{infer_schema, json_to_arrow, merge_schemas};
pub use sink::{ParquetSink, WrittenFile};
pub use writer::{ParquetWriter, ParquetWriterConfig};

#[cfg(test)]
mod tests;
