//! The dashboard pipeline: schema analysis, per-metric execution, and
//! HTML rendering. Three strictly ordered stages, each awaited before
//! the next.

use serde_json::json;
use tracing::{info, warn};

use analyst_engine::{shape_metric, validate, DashboardSpec, MetricPayload, Schema, VisualizationKind};

use crate::error::AgentError;
use crate::llm::{ChatApi, ChatMessage};
use crate::session::{Readiness, Session};
use crate::tools::ToolHost;

pub struct DashboardBuilder<'a> {
    llm: &'a dyn ChatApi,
    host: &'a dyn ToolHost,
}

pub struct Dashboard {
    pub spec: DashboardSpec,
    pub metrics: Vec<MetricPayload>,
    pub html: String,
}

pub enum DashboardResult {
    /// The session is in the terminal no-data state.
    NoData,
    Ready(Dashboard),
}

impl<'a> DashboardBuilder<'a> {
    pub fn new(llm: &'a dyn ChatApi, host: &'a dyn ToolHost) -> Self {
        Self { llm, host }
    }

    pub async fn build(
        &self,
        session: &mut Session,
        question: &str,
    ) -> Result<DashboardResult, AgentError> {
        let (files, file_type, schema) = match session.prepare(self.host).await? {
            Readiness::EmptyOnly => return Ok(DashboardResult::NoData),
            Readiness::Ready {
                files,
                file_type,
                schema,
            } => (files, file_type, schema),
        };

        let spec = self.analyze(&schema, question).await?;
        info!(metrics = spec.key_metrics.len(), "analysis produced");

        // The pipeline is single-pass: a metric whose query does not
        // survive validation or execution is dropped, not retried.
        let mut metrics = Vec::new();
        for metric in &spec.key_metrics {
            if let Err(rejection) = validate(&metric.sql, &schema) {
                warn!(metric = %metric.metric, %rejection, "metric query rejected, skipping");
                continue;
            }
            match self.host.execute_sql(&files, &metric.sql, &file_type).await {
                Ok(records) => metrics.push(shape_metric(metric, records)),
                Err(e) => {
                    warn!(metric = %metric.metric, error = %e, "metric query failed, skipping")
                }
            }
        }

        let html = self.render(&metrics).await?;
        Ok(DashboardResult::Ready(Dashboard {
            spec,
            metrics,
            html,
        }))
    }

    async fn analyze(
        &self,
        schema: &Schema,
        question: &str,
    ) -> Result<DashboardSpec, AgentError> {
        let payload = json!({
            "schema": schema.columns(),
            "question": question,
        });
        let messages = [
            ChatMessage::system(analysis_instructions()),
            ChatMessage::user(payload.to_string()),
        ];
        let reply = self.llm.complete(&messages, None).await?;
        let content = reply.content.ok_or_else(|| AgentError::Protocol {
            message: "schema analysis returned no content".to_string(),
        })?;

        serde_json::from_str(strip_code_fences(&content)).map_err(|e| AgentError::Protocol {
            message: format!("schema analysis was not valid report JSON: {}", e),
        })
    }

    async fn render(&self, metrics: &[MetricPayload]) -> Result<String, AgentError> {
        let payload = json!({ "metrics": metrics });
        let messages = [
            ChatMessage::system(RENDER_INSTRUCTIONS.to_string()),
            ChatMessage::user(payload.to_string()),
        ];
        let reply = self.llm.complete(&messages, None).await?;
        let content = reply.content.ok_or_else(|| AgentError::Protocol {
            message: "dashboard rendering returned no content".to_string(),
        })?;
        Ok(strip_code_fences(&content).to_string())
    }
}

fn analysis_instructions() -> String {
    let catalog: Vec<String> = VisualizationKind::catalog()
        .iter()
        .map(|(kind, fit)| format!("- {}: {}", kind.as_str(), fit))
        .collect();

    format!(
        "You are an expert data analyst. Given a JSON object with `schema` \
         (columns with name and dtype) and `question`, return a JSON report \
         with key metrics and one SQL query per metric.\n\
         \n\
         RULES:\n\
         - Return ONLY the JSON report, nothing else. Do not call tools.\n\
         - The table name is always `self`.\n\
         - Use only columns present in the schema, exactly as written (case-sensitive).\n\
         - No subqueries anywhere (SELECT, WHERE, HAVING, FROM); use WITH ... AS (...) chains.\n\
         - No joins, implicit or explicit.\n\
         - Explicit GROUP BY for aggregations, explicit ORDER BY for sorting.\n\
         - Use `AS alias_name` for all derived columns and CTEs.\n\
         \n\
         JSON FORMAT:\n\
         {{\n\
           \"key_metrics\": [\n\
             {{\"metric\": \"Metric Name\", \"description\": \"Brief description\", \
             \"visualization_type\": \"chart_type\", \"sql\": \"SQL query\"}}\n\
           ],\n\
           \"dashboard_components\": [\"filters\", \"charts\", \"tables\"]\n\
         }}\n\
         \n\
         Visualization types:\n{}",
        catalog.join("\n")
    )
}

const RENDER_INSTRUCTIONS: &str = "You are a senior dashboard UI engineer. \
Input is a JSON object with an array `metrics`; each metric has metric, description, \
visualization_type, and data. Generate one complete, self-contained HTML document \
rendering every metric as a card. Use the Tailwind CDN for styling and the Chart.js \
CDN for charts. The body must have margin 0, padding 0, and no horizontal overflow; \
cards use vertical margins only. Return ONLY the raw HTML document, with no markdown \
fences and no commentary.";

/// Models often wrap structured output in markdown fences; tolerate it.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
