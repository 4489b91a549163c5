//! Parquet table reading.
//!
//! The indexer writes its tables as parquet. Rows are converted to JSON
//! objects so they deserialize through the same row types as the JSON
//! exports. Null cells are left out of the object so that serde defaults
//! apply, and columns of a type no row type reads (timestamps, structs)
//! are left out the same way.

use std::fs::File;
use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type,
    UInt32Type, UInt64Type,
};
use arrow_array::{Array, RecordBatch};
use arrow_schema::DataType;
use graphchat_core::error::ContextError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};
use tracing::debug;

/// Read every row of a parquet file as a JSON object.
pub(crate) fn read_rows(path: &Path, table: &str) -> Result<Vec<Value>, ContextError> {
    let load_error = |reason: String| ContextError::TableLoad {
        table: table.to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|e| load_error(e.to_string()))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| load_error(e.to_string()))?;
        push_rows(&batch, &mut rows);
    }
    debug!(table, rows = rows.len(), "Read parquet table");
    Ok(rows)
}

fn push_rows(batch: &RecordBatch, rows: &mut Vec<Value>) {
    let schema = batch.schema();
    let mut objects: Vec<Map<String, Value>> = (0..batch.num_rows()).map(|_| Map::new()).collect();
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        for (i, object) in objects.iter_mut().enumerate() {
            match cell_value(column.as_ref(), i) {
                Value::Null => {}
                value => {
                    object.insert(field.name().clone(), value);
                }
            }
        }
    }
    rows.extend(objects.into_iter().map(Value::Object));
}

fn cell_value(array: &dyn Array, i: usize) -> Value {
    if array.is_null(i) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(i)),
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(i).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(i).to_string()),
        DataType::Int8 => array.as_primitive::<Int8Type>().value(i).into(),
        DataType::Int16 => array.as_primitive::<Int16Type>().value(i).into(),
        DataType::Int32 => array.as_primitive::<Int32Type>().value(i).into(),
        DataType::Int64 => array.as_primitive::<Int64Type>().value(i).into(),
        DataType::UInt8 => array.as_primitive::<UInt8Type>().value(i).into(),
        DataType::UInt16 => array.as_primitive::<UInt16Type>().value(i).into(),
        DataType::UInt32 => array.as_primitive::<UInt32Type>().value(i).into(),
        DataType::UInt64 => array.as_primitive::<UInt64Type>().value(i).into(),
        DataType::Float32 => float(f64::from(array.as_primitive::<Float32Type>().value(i))),
        DataType::Float64 => float(array.as_primitive::<Float64Type>().value(i)),
        DataType::List(_) => list(array.as_list::<i32>().value(i).as_ref()),
        DataType::LargeList(_) => list(array.as_list::<i64>().value(i).as_ref()),
        _ => Value::Null,
    }
}

fn list(values: &dyn Array) -> Value {
    Value::Array((0..values.len()).map(|i| cell_value(values, i)).collect())
}

// NaN has no JSON form
fn float(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
