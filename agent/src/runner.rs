//! The bounded reasoning/tool loop behind `ask`.
//!
//! The loop is an explicit finite state machine with hard counters, not
//! an open-ended recursion: at most `MAX_ROUNDS` model calls and at
//! most `MAX_TOOL_CALLS` executed queries per question. Exhausting
//! either budget yields a defined partial-result response.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use analyst_engine::{shape_chat, validate, FileType, Schema};

use crate::error::AgentError;
use crate::llm::{ChatApi, ChatMessage, ToolCall};
use crate::session::{Readiness, Session, EMPTY_DATA_MESSAGE};
use crate::tools::ToolHost;

/// Remote query executions allowed per question.
pub const MAX_TOOL_CALLS: usize = 2;
/// Model reasoning rounds allowed per question.
pub const MAX_ROUNDS: usize = 4;

pub const PARTIAL_RESULT_MESSAGE: &str =
    "Partial result: the analysis budget was exhausted before a final answer was reached.";

const EXECUTE_TOOL: &str = "execute_polars_sql";

pub struct Analyst<'a> {
    llm: &'a dyn ChatApi,
    host: &'a dyn ToolHost,
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

impl<'a> Analyst<'a> {
    pub fn new(llm: &'a dyn ChatApi, host: &'a dyn ToolHost) -> Self {
        Self { llm, host }
    }

    pub async fn answer(
        &self,
        session: &mut Session,
        question: &str,
    ) -> Result<String, AgentError> {
        let (files, file_type, schema) = match session.prepare(self.host).await? {
            Readiness::EmptyOnly => return Ok(EMPTY_DATA_MESSAGE.to_string()),
            Readiness::Ready {
                files,
                file_type,
                schema,
            } => (files, file_type, schema),
        };

        let tools = tool_definitions();
        let mut messages = vec![
            ChatMessage::system(instructions(&files, &schema)),
            ChatMessage::user(question.to_string()),
        ];
        let mut executions_used = 0usize;

        for round in 0..MAX_ROUNDS {
            let reply = self.llm.complete(&messages, Some(&tools)).await?;

            let calls = reply.tool_calls.clone().unwrap_or_default();
            if calls.is_empty() {
                if let Some(content) = &reply.content {
                    let content = content.trim();
                    if !content.is_empty() {
                        info!(round, executions_used, "answer produced");
                        return Ok(content.to_string());
                    }
                }
                continue;
            }

            messages.push(reply.clone());
            for call in calls {
                let feedback = self
                    .handle_tool_call(&call, &files, &file_type, &schema, &mut executions_used)
                    .await?;
                messages.push(ChatMessage::tool(call.id.clone(), feedback));
            }
        }

        warn!(executions_used, "reasoning budget exhausted");
        Ok(PARTIAL_RESULT_MESSAGE.to_string())
    }

    /// Runs one model-proposed tool call and produces the text fed back
    /// into the conversation. Validation happens locally first, so a
    /// rule violation costs no remote execution and comes back with the
    /// specific rule for the model to fix.
    async fn handle_tool_call(
        &self,
        call: &ToolCall,
        files: &[String],
        file_type: &FileType,
        schema: &Schema,
        executions_used: &mut usize,
    ) -> Result<String, AgentError> {
        if call.function.name != EXECUTE_TOOL {
            return Ok(format!(
                "Unknown tool `{}`; only `{}` is available.",
                call.function.name, EXECUTE_TOOL
            ));
        }

        let args: QueryArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                return Ok(format!(
                    "Tool arguments must be a JSON object with a `query` string: {}",
                    e
                ))
            }
        };

        if let Err(rejection) = validate(&args.query, schema) {
            info!(%rejection, "query rejected before execution");
            return Ok(format!(
                "Query rejected: {}. Revise the query and call the tool again.",
                rejection
            ));
        }

        if *executions_used >= MAX_TOOL_CALLS {
            return Ok(
                "Tool budget exhausted; answer with the results you already have.".to_string(),
            );
        }
        *executions_used += 1;

        let records = match self.host.execute_sql(files, &args.query, file_type).await {
            Ok(records) => records,
            Err(AgentError::RemoteTimeout { seconds }) => {
                // One retry on timeout, then report it to the model.
                warn!(seconds, "query timed out, retrying once");
                match self.host.execute_sql(files, &args.query, file_type).await {
                    Ok(records) => records,
                    Err(e) => return Ok(format!("Query failed: {}", e)),
                }
            }
            Err(e) => return Ok(format!("Query failed: {}", e)),
        };

        let payload = shape_chat(&records);
        Ok(serde_json::to_string(&payload)?)
    }
}

fn tool_definitions() -> serde_json::Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": EXECUTE_TOOL,
                "description": "Execute one SQL query against the active data files. \
                                The table name is always `self`.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "A single CTE-composed SQL query over `self`"
                        }
                    },
                    "required": ["query"]
                }
            }
        }
    ])
}

fn instructions(files: &[String], schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| format!("{} ({})", c.name, c.dtype))
        .collect();

    format!(
        "You are a data analyst answering questions about tabular data.\n\
         CONTEXT: Data files: {} | Columns: {}\n\
         \n\
         SQL RULES:\n\
         1. The table name is always `self`.\n\
         2. Column names must match the schema exactly (case-sensitive).\n\
         3. No subqueries in SELECT, WHERE, HAVING, or FROM; compose with WITH ... AS (...) chains only.\n\
         4. No joins, explicit or comma-separated.\n\
         5. Every CTE and derived column set needs an explicit AS alias; \
            UNION ALL branches must produce identical aliased column names.\n\
         6. Aggregates alongside plain columns require those columns in GROUP BY.\n\
         \n\
         WORKFLOW: plan one precise query, call the tool at most twice, then answer.\n\
         Tool results arrive as JSON with at most 10 display rows and the true total_rows.\n\
         \n\
         OUTPUT FORMAT: a one-line answer summary, then (when tabular) a Markdown table \
         of at most 10 rows. If the result is empty, say no rows matched. \
         Do not show raw JSON or your reasoning.",
        files.join(", "),
        columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FunctionCall;
    use crate::testing::{MockHost, ScriptedChat};
    use analyst_engine::Column;
    use std::sync::atomic::Ordering;

    fn team_runs_schema() -> Schema {
        Schema::new(vec![
            Column {
                name: "team".to_string(),
                dtype: "String".to_string(),
            },
            Column {
                name: "runs".to_string(),
                dtype: "Int64".to_string(),
            },
        ])
    }

    fn host() -> MockHost {
        MockHost::new(vec!["data/matches.csv".to_string()], team_runs_schema())
    }

    fn tool_call_message(id: &str, query: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: EXECUTE_TOOL.to_string(),
                    arguments: serde_json::json!({ "query": query }).to_string(),
                },
            }]),
            tool_call_id: None,
        }
    }

    fn answer_message(text: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[tokio::test]
    async fn empty_listing_short_circuits_the_loop() {
        let host = MockHost::new(vec![], team_runs_schema());
        let llm = ScriptedChat::new(vec![answer_message("should never be asked")]);
        let analyst = Analyst::new(&llm, &host);
        let mut session = Session::new();

        let answer = analyst.answer(&mut session, "anything").await.unwrap();
        assert_eq!(answer, EMPTY_DATA_MESSAGE);
        assert_eq!(llm.calls(), 0);
        assert_eq!(host.execute_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_query_costs_no_execution_and_feeds_back_the_rule() {
        let host = host();
        let llm = ScriptedChat::new(vec![
            tool_call_message("call_1", "SELECT team, (SELECT SUM(runs) FROM self) AS t FROM self"),
            answer_message("CSK lead the table."),
        ]);
        let analyst = Analyst::new(&llm, &host);
        let mut session = Session::new();

        let answer = analyst.answer(&mut session, "who leads?").await.unwrap();
        assert_eq!(answer, "CSK lead the table.");
        assert_eq!(host.execute_calls.load(Ordering::SeqCst), 0);

        let feedback = llm.last_tool_feedback().expect("rejection fed back");
        assert!(feedback.contains("Query rejected"));
        assert!(feedback.contains("subqueries"));
    }

    #[tokio::test]
    async fn valid_query_executes_and_result_reaches_the_model() {
        let host = host();
        let llm = ScriptedChat::new(vec![
            tool_call_message("call_1", "SELECT team, runs FROM self ORDER BY runs DESC"),
            answer_message("MI scored the most runs."),
        ]);
        let analyst = Analyst::new(&llm, &host);
        let mut session = Session::new();

        let answer = analyst.answer(&mut session, "top team?").await.unwrap();
        assert_eq!(answer, "MI scored the most runs.");
        assert_eq!(host.execute_calls.load(Ordering::SeqCst), 1);

        let feedback = llm.last_tool_feedback().expect("rows fed back");
        assert!(feedback.contains("total_rows"));
    }

    #[tokio::test]
    async fn budgets_bound_the_loop_structurally() {
        let host = host();
        // A model that never stops asking for executions.
        let llm = ScriptedChat::repeating(tool_call_message(
            "call_n",
            "SELECT team, runs FROM self",
        ));
        let analyst = Analyst::new(&llm, &host);
        let mut session = Session::new();

        let answer = analyst.answer(&mut session, "loop forever").await.unwrap();
        assert_eq!(answer, PARTIAL_RESULT_MESSAGE);
        assert_eq!(llm.calls(), MAX_ROUNDS);
        assert_eq!(
            host.execute_calls.load(Ordering::SeqCst),
            MAX_TOOL_CALLS,
            "executions stop at the budget even though the model keeps asking"
        );
    }
}
