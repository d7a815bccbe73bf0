//! Builds the unified relation behind the reserved table name `self`.

use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions};
use tracing::debug;

use crate::catalog::{infer_schema, schema_from_dfschema};
use crate::domain::{FileType, Schema};
use crate::error::EngineError;

/// One or more same-schema files merged into a single logical relation.
/// The frame stays lazy until a query materializes it, so loading N
/// files costs one combined scan rather than N independent reads.
pub struct Dataset {
    schema: Schema,
    pub(crate) frame: DataFrame,
}

impl Dataset {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub(crate) async fn load(
    ctx: &SessionContext,
    paths: &[String],
    file_type: &FileType,
) -> Result<Dataset, EngineError> {
    let Some((first, rest)) = paths.split_first() else {
        return Err(EngineError::Config {
            message: "file_locations must not be empty".to_string(),
        });
    };

    match file_type {
        FileType::Csv => {
            // Per-file deferred scans, concatenated before the single
            // materialization pass a downstream query triggers.
            let mut frame = read_csv_lazy(ctx, first).await?;
            let schema = schema_from_dfschema(frame.schema());
            for path in rest {
                let next = read_csv_lazy(ctx, path).await?;
                let next_schema = schema_from_dfschema(next.schema());
                if next_schema != schema {
                    return Err(mismatch(path, &schema, &next_schema));
                }
                frame = frame.union(next)?;
            }
            debug!(files = paths.len(), "csv dataset assembled");
            Ok(Dataset { schema, frame })
        }
        FileType::Parquet => {
            // Parquet supports a combined multi-path read; the schema
            // agreement check still happens explicitly up front instead
            // of trusting the reader to coerce.
            let schema = infer_schema(ctx, first, file_type).await?;
            for path in rest {
                let next_schema = infer_schema(ctx, path, file_type).await?;
                if next_schema != schema {
                    return Err(mismatch(path, &schema, &next_schema));
                }
            }
            let frame = ctx
                .read_parquet(paths.to_vec(), ParquetReadOptions::default())
                .await
                .map_err(|e| EngineError::FileRead {
                    path: first.clone(),
                    message: e.to_string(),
                })?;
            debug!(files = paths.len(), "parquet dataset assembled");
            Ok(Dataset { schema, frame })
        }
    }
}

async fn read_csv_lazy(ctx: &SessionContext, path: &str) -> Result<DataFrame, EngineError> {
    if !std::path::Path::new(path).exists() {
        return Err(EngineError::FileRead {
            path: path.to_string(),
            message: "no such file".to_string(),
        });
    }
    ctx.read_csv(path, CsvReadOptions::new())
        .await
        .map_err(|e| EngineError::FileRead {
            path: path.to_string(),
            message: e.to_string(),
        })
}

fn mismatch(path: &str, expected: &Schema, found: &Schema) -> EngineError {
    EngineError::SchemaMismatch {
        path: path.to_string(),
        expected: expected.names().join(", "),
        found: found.names().join(", "),
    }
}
