use std::time::Duration;

use crate::error::AgentError;

/// Runtime configuration, read from the environment once at startup.
/// A missing API key is fatal; everything else has a default.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub model_id: String,
    pub llm_base_url: String,
    pub tool_host_url: String,
    /// Ceiling for data queries against the tool host.
    pub query_timeout: Duration,
    /// Ceiling for model calls, which take longer than data queries.
    pub generation_timeout: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = std::env::var("GROQ_API_KEY").map_err(|_| AgentError::Config {
            message: "GROQ_API_KEY environment variable is not set".to_string(),
        })?;

        Ok(Self {
            api_key,
            model_id: env_or("MODEL_ID", "openai/gpt-oss-20b"),
            llm_base_url: env_or("LLM_BASE_URL", "https://api.groq.com/openai/v1"),
            tool_host_url: env_or("TOOL_HOST_URL", "http://localhost:8050"),
            query_timeout: Duration::from_secs(env_secs("QUERY_TIMEOUT_SECS", 120)?),
            generation_timeout: Duration::from_secs(env_secs("GENERATION_TIMEOUT_SECS", 300)?),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: u64) -> Result<u64, AgentError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| AgentError::Config {
            message: format!("{} must be a whole number of seconds, got `{}`", key, value),
        }),
    }
}
