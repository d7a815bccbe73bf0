//! Schema inference for a single source file.

use datafusion::arrow::datatypes::DataType;
use datafusion::common::DFSchema;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions};

use crate::domain::{Column, FileType, Schema};
use crate::error::EngineError;

/// Reads just enough of `path` to produce its ordered column listing.
/// The read is lazy; no row data is materialized.
pub(crate) async fn infer_schema(
    ctx: &SessionContext,
    path: &str,
    file_type: &FileType,
) -> Result<Schema, EngineError> {
    if !std::path::Path::new(path).exists() {
        return Err(EngineError::FileRead {
            path: path.to_string(),
            message: "no such file".to_string(),
        });
    }

    let frame = match file_type {
        FileType::Csv => ctx.read_csv(path, CsvReadOptions::new()).await,
        FileType::Parquet => ctx.read_parquet(path, ParquetReadOptions::default()).await,
    }
    .map_err(|e| EngineError::FileRead {
        path: path.to_string(),
        message: e.to_string(),
    })?;

    Ok(schema_from_dfschema(frame.schema()))
}

pub(crate) fn schema_from_dfschema(df_schema: &DFSchema) -> Schema {
    let columns = df_schema
        .fields()
        .iter()
        .map(|field| Column {
            name: field.name().clone(),
            dtype: arrow_type_name(field.data_type()),
        })
        .collect();
    Schema::new(columns)
}

/// Readable dtype names for the schema surface. Matches the names the
/// prompt context and tool responses carry.
pub(crate) fn arrow_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Boolean => "Boolean".to_string(),
        DataType::Int8 => "Int8".to_string(),
        DataType::Int16 => "Int16".to_string(),
        DataType::Int32 => "Int32".to_string(),
        DataType::Int64 => "Int64".to_string(),
        DataType::UInt8 => "UInt8".to_string(),
        DataType::UInt16 => "UInt16".to_string(),
        DataType::UInt32 => "UInt32".to_string(),
        DataType::UInt64 => "UInt64".to_string(),
        DataType::Float32 => "Float32".to_string(),
        DataType::Float64 => "Float64".to_string(),
        DataType::Utf8 => "String".to_string(),
        DataType::LargeUtf8 => "LargeString".to_string(),
        DataType::Date32 => "Date32".to_string(),
        DataType::Date64 => "Date64".to_string(),
        DataType::Timestamp(unit, tz) => match tz {
            Some(tz) => format!("Timestamp({:?}, {})", unit, tz),
            None => format!("Timestamp({:?})", unit),
        },
        DataType::Time32(unit) => format!("Time32({:?})", unit),
        DataType::Time64(unit) => format!("Time64({:?})", unit),
        DataType::Decimal128(precision, scale) => {
            format!("Decimal128({}, {})", precision, scale)
        }
        other => format!("{:?}", other),
    }
}
