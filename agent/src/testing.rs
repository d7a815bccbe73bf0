//! Scripted doubles for the two external boundaries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use analyst_engine::{FileType, Record, Schema};

use crate::error::AgentError;
use crate::llm::{ChatApi, ChatMessage};
use crate::tools::ToolHost;

/// Chat double that replays a fixed script, or one reply forever.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<ChatMessage>>,
    repeat: Option<ChatMessage>,
    call_count: AtomicUsize,
    last_seen: Mutex<Vec<ChatMessage>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            call_count: AtomicUsize::new(0),
            last_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(reply: ChatMessage) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            call_count: AtomicUsize::new(0),
            last_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Content of the most recent tool-role message the model was shown.
    pub fn last_tool_feedback(&self) -> Option<String> {
        self.last_seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|message| message.role == "tool")
            .and_then(|message| message.content.clone())
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&serde_json::Value>,
    ) -> Result<ChatMessage, AgentError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_seen.lock().unwrap() = messages.to_vec();

        if let Some(reply) = &self.repeat {
            return Ok(reply.clone());
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Llm {
                message: "scripted chat ran out of replies".to_string(),
            })
    }
}

/// Tool host double with per-operation call counters.
pub struct MockHost {
    files: Vec<String>,
    schema: Schema,
    pub list_calls: AtomicUsize,
    pub schema_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
}

impl MockHost {
    pub fn new(files: Vec<String>, schema: Schema) -> Self {
        Self {
            files,
            schema,
            list_calls: AtomicUsize::new(0),
            schema_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolHost for MockHost {
    async fn get_files_list(&self) -> Result<Vec<String>, AgentError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.clone())
    }

    async fn get_schema(
        &self,
        _file_location: &str,
        _file_type: &FileType,
    ) -> Result<Schema, AgentError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schema.clone())
    }

    async fn execute_sql(
        &self,
        _file_locations: &[String],
        _query: &str,
        _file_type: &FileType,
    ) -> Result<Vec<Record>, AgentError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let mut first = Record::new();
        first.insert("team".to_string(), Value::String("MI".to_string()));
        first.insert("runs".to_string(), Value::from(150i64));
        let mut second = Record::new();
        second.insert("team".to_string(), Value::String("CSK".to_string()));
        second.insert("runs".to_string(), Value::from(80i64));
        Ok(vec![first, second])
    }
}
