use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use walkdir::WalkDir;

use analyst_engine::{parse_file_type, DataEngine, EngineError, FileType};

const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const TOOL_FAILED: i32 = -32603;

pub struct ToolServer {
    state: Arc<ServerState>,
}

pub struct ServerState {
    pub engine: DataEngine,
    pub data_dir: PathBuf,
}

// JSON-RPC envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
}

impl McpResponse {
    fn ok(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError { code, message }),
        }
    }
}

// Tool parameter shapes
#[derive(Debug, Serialize, Deserialize)]
pub struct GetSchemaParams {
    pub file_location: String,
    #[serde(default = "default_file_type")]
    pub file_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteSqlParams {
    pub file_locations: Vec<String>,
    pub query: String,
    #[serde(default = "default_file_type")]
    pub file_type: String,
}

fn default_file_type() -> String {
    "csv".to_string()
}

impl ToolServer {
    pub fn new(engine: DataEngine, data_dir: PathBuf) -> Self {
        Self {
            state: Arc::new(ServerState { engine, data_dir }),
        }
    }

    pub async fn start(&self, addr: SocketAddr) -> Result<(), EngineError> {
        info!("Starting tool server on {}", addr);

        let app = Router::new()
            .route("/", post(handle_mcp_request))
            .route("/health", get(health_check))
            .route("/tools", get(list_tools))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| EngineError::Config {
                message: format!("server error: {}", e),
            })?;

        Ok(())
    }
}

async fn handle_mcp_request(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<McpRequest>,
) -> Json<McpResponse> {
    info!(method = %request.method, id = ?request.id, "MCP request");

    let McpRequest { id, method, params, .. } = request;
    let response = match method.as_str() {
        "initialize" => McpResponse::ok(id, server_info()),
        "initialized" | "ping" => McpResponse::ok(id, serde_json::json!({})),
        "tools/list" => McpResponse::ok(id, tool_listing()),
        "tools/call" => handle_tool_call(state, id, params).await,
        _ => McpResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", method)),
    };

    Json(response)
}

fn server_info() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "analyst",
            "version": "0.1.0"
        }
    })
}

fn tool_listing() -> serde_json::Value {
    serde_json::json!({
        "tools": [
            {
                "name": "get_files_list",
                "description": "Get the list of source data files",
                "inputSchema": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            },
            {
                "name": "get_schema",
                "description": "Return column names and data types of one data file",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "file_location": {
                            "type": "string",
                            "description": "Path of the file to inspect"
                        },
                        "file_type": {
                            "type": "string",
                            "description": "csv or parquet",
                            "default": "csv"
                        }
                    },
                    "required": ["file_location"]
                }
            },
            {
                "name": "execute_polars_sql",
                "description": query_tool_description(),
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "file_locations": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Files to read; all must share one schema"
                        },
                        "query": {
                            "type": "string",
                            "description": "SQL referencing the data as `self`"
                        },
                        "file_type": {
                            "type": "string",
                            "description": "csv or parquet",
                            "default": "csv"
                        }
                    },
                    "required": ["file_locations", "query"]
                }
            }
        ]
    })
}

const SQL_FUNCTION_FAMILIES: &[(&str, &[&str])] = &[
    (
        "Aggregate",
        &[
            "avg", "count", "first", "last", "max", "median", "min", "stddev", "sum", "variance",
        ],
    ),
    (
        "Conditional",
        &["coalesce", "greatest", "ifnull", "least", "nullif"],
    ),
    (
        "Mathematical",
        &[
            "abs", "cbrt", "ceil", "exp", "floor", "ln", "log2", "log10", "mod", "pi", "pow",
            "round", "sign", "sqrt",
        ],
    ),
    (
        "String",
        &[
            "concat", "concat_ws", "ends_with", "initcap", "left", "length", "lower", "ltrim",
            "replace", "reverse", "right", "rtrim", "starts_with", "strpos", "substr", "upper",
        ],
    ),
    ("Temporal", &["date_part", "extract", "strftime"]),
    ("Type", &["cast", "try_cast"]),
];

/// Tool description that teaches the model the dialect: the reserved
/// table name and the function families the engine accepts.
fn query_tool_description() -> String {
    let mut text = String::from(
        "Execute a single SQL query over one or more same-schema data files. \
         The query must use the table name `self` to refer to the source data. \
         Supported functions are:\n",
    );
    for (family, functions) in SQL_FUNCTION_FAMILIES {
        text.push_str(family);
        text.push_str(": ");
        text.push_str(&functions.join(", "));
        text.push('\n');
    }
    text
}

async fn handle_tool_call(
    state: Arc<ServerState>,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> McpResponse {
    let Some(params) = params else {
        return McpResponse::failure(id, INVALID_PARAMS, "Invalid params".to_string());
    };
    let Some(tool_name) = params.get("name").and_then(|n| n.as_str()) else {
        return McpResponse::failure(id, INVALID_PARAMS, "Missing tool name".to_string());
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    let result = match tool_name {
        "get_files_list" => handle_get_files_list(&state),
        "get_schema" => handle_get_schema(&state, arguments).await,
        "execute_polars_sql" => handle_execute_sql(&state, arguments).await,
        _ => Err(EngineError::Config {
            message: format!("Unknown tool: {}", tool_name),
        }),
    };

    match result {
        Ok(content) => McpResponse::ok(
            id,
            serde_json::json!({
                "content": [
                    {
                        "type": "text",
                        "text": content
                    }
                ]
            }),
        ),
        Err(e) => McpResponse::failure(id, TOOL_FAILED, e.to_string()),
    }
}

/// Stable, sorted listing of the CSV/Parquet files under the data
/// directory. An empty listing is a valid answer, not an error.
pub fn list_data_files(data_dir: &Path) -> Result<Vec<String>, EngineError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(data_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_string_lossy().into_owned();
        if FileType::from_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn handle_get_files_list(state: &ServerState) -> Result<String, EngineError> {
    let files = list_data_files(&state.data_dir)?;
    Ok(serde_json::to_string_pretty(&files)?)
}

async fn handle_get_schema(
    state: &ServerState,
    arguments: serde_json::Value,
) -> Result<String, EngineError> {
    let params: GetSchemaParams =
        serde_json::from_value(arguments).map_err(|e| EngineError::Config {
            message: format!("Invalid arguments for get_schema: {}", e),
        })?;

    let file_type = parse_file_type(&params.file_type)?;
    let schema = state.engine.schema(&params.file_location, &file_type).await?;
    Ok(serde_json::to_string_pretty(schema.columns())?)
}

async fn handle_execute_sql(
    state: &ServerState,
    arguments: serde_json::Value,
) -> Result<String, EngineError> {
    let params: ExecuteSqlParams =
        serde_json::from_value(arguments).map_err(|e| EngineError::Config {
            message: format!("Invalid arguments for execute_polars_sql: {}", e),
        })?;

    let file_type = parse_file_type(&params.file_type)?;
    let records = state
        .engine
        .query(&params.file_locations, &file_type, &params.query)
        .await?;
    Ok(serde_json::to_string_pretty(&records)?)
}

async fn health_check(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.engine.health_check().await {
        Ok(_) => Ok(Json(serde_json::json!({
            "status": "healthy",
            "version": "0.1.0",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn list_tools() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "tools": [
            {
                "name": "get_files_list",
                "description": "Get the list of source data files",
                "parameters": {}
            },
            {
                "name": "get_schema",
                "description": "Return column names and data types of one data file",
                "parameters": {
                    "file_location": "string",
                    "file_type": "string (optional, csv|parquet)"
                }
            },
            {
                "name": "execute_polars_sql",
                "description": "Execute a SQL query over same-schema data files",
                "parameters": {
                    "file_locations": "string[]",
                    "query": "string",
                    "file_type": "string (optional, csv|parquet)"
                }
            }
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_state(dir: &TempDir) -> Arc<ServerState> {
        Arc::new(ServerState {
            engine: DataEngine::new().expect("engine init"),
            data_dir: dir.path().to_path_buf(),
        })
    }

    fn write_csv(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, "team,runs\nMI,100\nCSK,80\n").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn initialize_advertises_tool_capability() {
        let info = server_info();
        assert!(info["capabilities"]["tools"].is_object());
        assert_eq!(info["serverInfo"]["name"], "analyst");
    }

    #[test]
    fn tools_list_names_the_three_tools() {
        let listing = tool_listing();
        let names: Vec<&str> = listing["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["get_files_list", "get_schema", "execute_polars_sql"]
        );
    }

    #[test]
    fn file_listing_skips_non_tabular_files() {
        let dir = TempDir::new().unwrap();
        let kept = write_csv(&dir, "matches.csv");
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = list_data_files(dir.path()).unwrap();
        assert_eq!(files, vec![kept]);
    }

    #[tokio::test]
    async fn tool_call_executes_a_valid_query() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "matches.csv");
        let state = test_state(&dir);

        let params = serde_json::json!({
            "name": "execute_polars_sql",
            "arguments": {
                "file_locations": [path],
                "query": "SELECT team, runs FROM self ORDER BY runs DESC"
            }
        });
        let response = handle_tool_call(state, Some(serde_json::json!(7)), Some(params)).await;

        assert!(response.error.is_none());
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["team"], "MI");
    }

    #[tokio::test]
    async fn tool_call_surfaces_the_violated_rule() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "matches.csv");
        let state = test_state(&dir);

        let params = serde_json::json!({
            "name": "execute_polars_sql",
            "arguments": {
                "file_locations": [path],
                "query": "SELECT team, (SELECT SUM(runs) FROM self) AS total FROM self"
            }
        });
        let response = handle_tool_call(state, None, Some(params)).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, TOOL_FAILED);
        assert!(
            error.message.contains("subqueries"),
            "rejection should name the rule, got: {}",
            error.message
        );
    }

    #[tokio::test]
    async fn tool_call_rejects_unknown_file_type() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "matches.csv");
        let state = test_state(&dir);

        let params = serde_json::json!({
            "name": "get_schema",
            "arguments": {
                "file_location": path,
                "file_type": "json"
            }
        });
        let response = handle_tool_call(state, None, Some(params)).await;
        assert!(response.error.unwrap().message.contains("Unsupported file type"));
    }
}
