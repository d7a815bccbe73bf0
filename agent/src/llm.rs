//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    /// The result of one tool invocation, threaded back by call id.
    pub fn tool(call_id: String, text: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: Some(call_id),
        }
    }

    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as the API delivers it.
    pub arguments: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a serde_json::Value>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Seam for the model boundary so the loop can run against scripted
/// replies in tests.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatMessage, AgentError>;
}

pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.llm_base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model_id.clone(),
            timeout: config.generation_timeout,
        }
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatMessage, AgentError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?
            .error_for_status()
            .map_err(|e| AgentError::Llm {
                message: e.to_string(),
            })?;

        let body: ChatResponse = response.json().await.map_err(|e| AgentError::Llm {
            message: format!("invalid chat completion payload: {}", e),
        })?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AgentError::Llm {
                message: "chat completion returned no choices".to_string(),
            })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> AgentError {
    if error.is_timeout() {
        AgentError::RemoteTimeout {
            seconds: timeout.as_secs(),
        }
    } else {
        AgentError::Llm {
            message: error.to_string(),
        }
    }
}
