use thiserror::Error;

use crate::validator::Rejection;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unsupported file type: {file_type}")]
    UnsupportedFileType { file_type: String },

    #[error("Failed to read {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Schema mismatch: {path} has columns [{found}], expected [{expected}]")]
    SchemaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] Rejection),

    #[error("Query execution failed: {message}")]
    Execution { message: String },

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] datafusion::arrow::error::ArrowError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            message: err.to_string(),
        }
    }
}
