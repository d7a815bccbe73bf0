//! Per-session cache and the pre-check state machine.
//!
//! The file listing is fetched before the schema, and both are written
//! at most once; every later pipeline stage reads the cached values.
//! A fresh session starts empty and never inherits another session's
//! cache.

use tracing::info;
use uuid::Uuid;

use analyst_engine::{FileType, Schema};

use crate::error::AgentError;
use crate::tools::ToolHost;

/// Fixed response for the terminal no-data state.
pub const EMPTY_DATA_MESSAGE: &str = "No file is present and there is nothing to analyze.";

pub struct Session {
    id: Uuid,
    files: Option<Vec<String>>,
    file_type: Option<FileType>,
    schema: Option<Schema>,
}

/// Outcome of the pre-check. `EmptyOnly` is terminal: no query may be
/// constructed and no further tool calls are permitted.
#[derive(Debug, Clone)]
pub enum Readiness {
    EmptyOnly,
    Ready {
        files: Vec<String>,
        file_type: FileType,
        schema: Schema,
    },
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            files: None,
            file_type: None,
            schema: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Populates the cache on first use and classifies the session.
    /// No file listing, or an empty schema for the candidate file, both
    /// land in the terminal `EmptyOnly` state.
    pub async fn prepare(&mut self, host: &dyn ToolHost) -> Result<Readiness, AgentError> {
        let files = match &self.files {
            Some(files) => files.clone(),
            None => {
                let files = host.get_files_list().await?;
                info!(session = %self.id, files = files.len(), "file listing cached");
                self.files = Some(files.clone());
                files
            }
        };
        if files.is_empty() {
            return Ok(Readiness::EmptyOnly);
        }

        let file_type = match &self.file_type {
            Some(file_type) => file_type.clone(),
            None => {
                let file_type = FileType::from_path(&files[0]).unwrap_or(FileType::Csv);
                self.file_type = Some(file_type.clone());
                file_type
            }
        };

        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => {
                let schema = host.get_schema(&files[0], &file_type).await?;
                info!(session = %self.id, columns = schema.len(), "schema cached");
                self.schema = Some(schema.clone());
                schema
            }
        };
        if schema.is_empty() {
            return Ok(Readiness::EmptyOnly);
        }

        Ok(Readiness::Ready {
            files,
            file_type,
            schema,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
