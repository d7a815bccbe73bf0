use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::SessionContext;
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use tracing::info;

use crate::catalog;
use crate::domain::{FileType, Record, Schema};
use crate::error::EngineError;
use crate::executor;
use crate::loader::{self, Dataset};
use crate::validator;

/// Facade over the DataFusion session: schema inference, dataset
/// assembly, and validated query execution against the `self` relation.
/// One engine serves one sequential pipeline; datasets are loaded per
/// query batch and not persisted across them.
pub struct DataEngine {
    ctx: SessionContext,
}

impl DataEngine {
    pub fn new() -> Result<Self, EngineError> {
        let max_memory = 8 * 1024 * 1024 * 1024;
        let memory_fraction = 0.8;

        let runtime = RuntimeEnvBuilder::new()
            .with_memory_limit(max_memory, memory_fraction)
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("Failed to build runtime environment: {}", e),
            })?;

        // Identifiers must stay case-sensitive end to end: the validator
        // compares column names as written, so planning may not fold them.
        let session_config = SessionConfig::new()
            .set_bool("datafusion.sql_parser.enable_ident_normalization", false);

        let ctx = SessionContext::new_with_config_rt(session_config, runtime.into());

        info!("Data engine initialized");
        Ok(Self { ctx })
    }

    /// Ordered column names and dtypes for one file.
    pub async fn schema(&self, path: &str, file_type: &FileType) -> Result<Schema, EngineError> {
        catalog::infer_schema(&self.ctx, path, file_type).await
    }

    /// Merges same-schema files into the relation queries will see as
    /// `self`. Rejects heterogeneous file sets before anything is read.
    pub async fn load(
        &self,
        paths: &[String],
        file_type: &FileType,
    ) -> Result<Dataset, EngineError> {
        loader::load(&self.ctx, paths, file_type).await
    }

    /// Runs an already validated query against a loaded dataset.
    pub async fn execute(
        &self,
        dataset: &Dataset,
        query: &str,
    ) -> Result<Vec<Record>, EngineError> {
        executor::run(&self.ctx, dataset, query).await
    }

    pub async fn health_check(&self) -> Result<(), EngineError> {
        let _ = self.ctx.sql("SELECT 1 AS health_check").await?;
        Ok(())
    }

    /// Full pipeline for one query: load, validate against the loaded
    /// schema, execute. Validation rejections surface before any
    /// execution is attempted.
    pub async fn query(
        &self,
        paths: &[String],
        file_type: &FileType,
        sql: &str,
    ) -> Result<Vec<Record>, EngineError> {
        let dataset = self.load(paths, file_type).await?;
        validator::validate(sql, dataset.schema())?;
        self.execute(&dataset, sql).await
    }
}

/// Parses the string-typed `file_type` tool argument.
pub fn parse_file_type(value: &str) -> Result<FileType, EngineError> {
    FileType::parse(value).ok_or_else(|| EngineError::UnsupportedFileType {
        file_type: value.to_string(),
    })
}
