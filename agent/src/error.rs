use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Remote tool call failed: {message}")]
    Remote { message: String },

    #[error("Remote call timed out after {seconds}s")]
    RemoteTimeout { seconds: u64 },

    #[error("Model call failed: {message}")]
    Llm { message: String },

    #[error("Malformed model output: {message}")]
    Protocol { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
