//! Client side of the tool boundary: typed calls over MCP JSON-RPC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use analyst_engine::{Column, FileType, Record, Schema};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// The three operations the tool host provides. Every call is awaited
/// to completion before the pipeline moves on; there is no overlap
/// between a schema fetch and a query execution.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn get_files_list(&self) -> Result<Vec<String>, AgentError>;

    async fn get_schema(
        &self,
        file_location: &str,
        file_type: &FileType,
    ) -> Result<Schema, AgentError>;

    async fn execute_sql(
        &self,
        file_locations: &[String],
        query: &str,
        file_type: &FileType,
    ) -> Result<Vec<Record>, AgentError>;
}

pub struct HttpToolHost {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

impl HttpToolHost {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.tool_host_url.clone(),
            timeout: config.query_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(tool = name, id, "calling tool host");

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": name,
                "arguments": arguments,
            }
        });

        let response = self
            .http
            .post(&self.base_url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .error_for_status()
            .map_err(|e| AgentError::Remote {
                message: e.to_string(),
            })?;

        let body: RpcResponse = response.json().await.map_err(|e| AgentError::Remote {
            message: format!("invalid tool response payload: {}", e),
        })?;

        if let Some(error) = body.error {
            return Err(AgentError::Remote {
                message: error.message,
            });
        }

        // Tool results arrive wrapped as MCP text content.
        body.result
            .as_ref()
            .and_then(|result| result["content"][0]["text"].as_str())
            .map(|text| text.to_string())
            .ok_or_else(|| AgentError::Remote {
                message: "tool response carried no text content".to_string(),
            })
    }

    fn classify(&self, error: reqwest::Error) -> AgentError {
        if error.is_timeout() {
            AgentError::RemoteTimeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            AgentError::Remote {
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl ToolHost for HttpToolHost {
    async fn get_files_list(&self) -> Result<Vec<String>, AgentError> {
        let text = self.call_tool("get_files_list", json!({})).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_schema(
        &self,
        file_location: &str,
        file_type: &FileType,
    ) -> Result<Schema, AgentError> {
        let arguments = json!({
            "file_location": file_location,
            "file_type": file_type.as_str(),
        });
        let text = self.call_tool("get_schema", arguments).await?;
        let columns: Vec<Column> = serde_json::from_str(&text)?;
        Ok(Schema::new(columns))
    }

    async fn execute_sql(
        &self,
        file_locations: &[String],
        query: &str,
        file_type: &FileType,
    ) -> Result<Vec<Record>, AgentError> {
        let arguments = json!({
            "file_locations": file_locations,
            "query": query,
            "file_type": file_type.as_str(),
        });
        let text = self.call_tool("execute_polars_sql", arguments).await?;
        Ok(serde_json::from_str(&text)?)
    }
}
