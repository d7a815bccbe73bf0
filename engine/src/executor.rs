//! Runs validated queries and converts Arrow batches into row-records.

use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, LargeStringArray, RecordBatch, StringArray,
    StringViewArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::execution::context::SessionContext;
use serde_json::Value;
use tracing::info;

use crate::domain::Record;
use crate::error::EngineError;
use crate::loader::Dataset;
use crate::validator::TABLE_NAME;

/// Executes `query` against the dataset registered as `self`. The query
/// is assumed to have passed validation; anything the engine still
/// rejects surfaces as an `Execution` error with the engine's detail.
pub(crate) async fn run(
    ctx: &SessionContext,
    dataset: &Dataset,
    query: &str,
) -> Result<Vec<Record>, EngineError> {
    let start = std::time::Instant::now();

    let _ = ctx.deregister_table(TABLE_NAME)?;
    let _ = ctx.register_table(TABLE_NAME, dataset.frame.clone().into_view())?;

    let result = ctx
        .sql(query)
        .await
        .map_err(|e| EngineError::Execution {
            message: e.to_string(),
        })?
        .collect()
        .await
        .map_err(|e| EngineError::Execution {
            message: e.to_string(),
        });
    let _ = ctx.deregister_table(TABLE_NAME)?;
    let batches = result?;

    let records = batches_to_records(&batches)?;
    info!(
        rows = records.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "query executed"
    );
    Ok(records)
}

fn batches_to_records(batches: &[RecordBatch]) -> Result<Vec<Record>, EngineError> {
    let mut records = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let mut record = Record::new();
            for (index, field) in schema.fields().iter().enumerate() {
                let value = scalar_value(batch.column(index), row)?;
                record.insert(field.name().clone(), value);
            }
            records.push(record);
        }
    }
    Ok(records)
}

/// One Arrow cell as a typed JSON scalar. Numbers stay numbers and
/// temporal values are formatted; non-finite floats become null.
fn scalar_value(array: &ArrayRef, row: usize) -> Result<Value, EngineError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => {
            let array = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            Value::Bool(array.value(row))
        }
        DataType::Int8 => {
            let array = array.as_any().downcast_ref::<Int8Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::Int16 => {
            let array = array.as_any().downcast_ref::<Int16Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::Int32 => {
            let array = array.as_any().downcast_ref::<Int32Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::Int64 => {
            let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::UInt8 => {
            let array = array.as_any().downcast_ref::<UInt8Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::UInt16 => {
            let array = array.as_any().downcast_ref::<UInt16Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::UInt32 => {
            let array = array.as_any().downcast_ref::<UInt32Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::UInt64 => {
            let array = array.as_any().downcast_ref::<UInt64Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::Float32 => {
            let array = array.as_any().downcast_ref::<Float32Array>().unwrap();
            Value::from(f64::from(array.value(row)))
        }
        DataType::Float64 => {
            let array = array.as_any().downcast_ref::<Float64Array>().unwrap();
            Value::from(array.value(row))
        }
        DataType::Utf8 => {
            let array = array.as_any().downcast_ref::<StringArray>().unwrap();
            Value::String(array.value(row).to_string())
        }
        DataType::LargeUtf8 => {
            let array = array.as_any().downcast_ref::<LargeStringArray>().unwrap();
            Value::String(array.value(row).to_string())
        }
        DataType::Utf8View => {
            let array = array.as_any().downcast_ref::<StringViewArray>().unwrap();
            Value::String(array.value(row).to_string())
        }
        DataType::Date32 => {
            let array = array.as_any().downcast_ref::<Date32Array>().unwrap();
            let days = array.value(row);
            chrono::NaiveDate::from_num_days_from_ce_opt(days + 719163)
                .map(|date| Value::String(date.to_string()))
                .unwrap_or(Value::Null)
        }
        DataType::Date64 => {
            let array = array.as_any().downcast_ref::<Date64Array>().unwrap();
            chrono::DateTime::from_timestamp_millis(array.value(row))
                .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null)
        }
        DataType::Timestamp(unit, _) => timestamp_value(array, row, unit),
        _ => Value::String(array_value_to_string(array, row)?),
    };
    Ok(value)
}

fn timestamp_value(array: &ArrayRef, row: usize, unit: &TimeUnit) -> Value {
    let datetime = match unit {
        TimeUnit::Second => {
            let array = array.as_any().downcast_ref::<TimestampSecondArray>().unwrap();
            chrono::DateTime::from_timestamp(array.value(row), 0)
        }
        TimeUnit::Millisecond => {
            let array = array
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()
                .unwrap();
            chrono::DateTime::from_timestamp_millis(array.value(row))
        }
        TimeUnit::Microsecond => {
            let array = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .unwrap();
            chrono::DateTime::from_timestamp_micros(array.value(row))
        }
        TimeUnit::Nanosecond => {
            let array = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .unwrap();
            Some(chrono::DateTime::from_timestamp_nanos(array.value(row)))
        }
    };
    datetime
        .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
        .unwrap_or(Value::Null)
}
