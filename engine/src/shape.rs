//! Shapes executed records for the two consumers: chat display and
//! dashboard metric payloads.

use serde::{Deserialize, Serialize};

use crate::domain::{MetricSpec, Record, VisualizationKind};

/// Display cap for the chat path. The underlying result is never
/// truncated; only the rendered table is.
pub const CHAT_ROW_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatPayload {
    /// Zero matching rows. A distinct marker, not a zero-row table, so
    /// the caller can say "no matching rows" instead of drawing an
    /// empty grid.
    Empty,
    Table {
        columns: Vec<String>,
        rows: Vec<Record>,
        total_rows: usize,
    },
}

pub fn shape_chat(records: &[Record]) -> ChatPayload {
    let Some(first) = records.first() else {
        return ChatPayload::Empty;
    };
    ChatPayload::Table {
        columns: first.keys().cloned().collect(),
        rows: records.iter().take(CHAT_ROW_LIMIT).cloned().collect(),
        total_rows: records.len(),
    }
}

/// A metric's full result attached to its specification. Row capping is
/// a render-time concern and does not happen here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPayload {
    pub metric: String,
    pub description: String,
    pub visualization_type: VisualizationKind,
    pub data: Vec<Record>,
}

pub fn shape_metric(spec: &MetricSpec, records: Vec<Record>) -> MetricPayload {
    MetricPayload {
        metric: spec.metric.clone(),
        description: spec.description.clone(),
        visualization_type: spec.visualization_type,
        data: records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(team: &str, runs: i64) -> Record {
        let mut record = Record::new();
        record.insert("team".to_string(), Value::String(team.to_string()));
        record.insert("runs".to_string(), Value::from(runs));
        record
    }

    #[test]
    fn chat_caps_rows_but_keeps_total() {
        let records: Vec<Record> = (0..37).map(|i| record("MI", i)).collect();
        match shape_chat(&records) {
            ChatPayload::Table {
                columns,
                rows,
                total_rows,
            } => {
                assert_eq!(columns, vec!["team", "runs"]);
                assert_eq!(rows.len(), CHAT_ROW_LIMIT);
                assert_eq!(total_rows, 37);
            }
            other => panic!("expected table, got {:?}", other),
        }
        assert_eq!(records.len(), 37);
    }

    #[test]
    fn chat_marks_empty_results_explicitly() {
        assert_eq!(shape_chat(&[]), ChatPayload::Empty);
    }

    #[test]
    fn metric_keeps_every_row() {
        let spec = MetricSpec {
            metric: "Runs by team".to_string(),
            description: "Total runs per team".to_string(),
            visualization_type: VisualizationKind::BarChart,
            sql: "SELECT team, SUM(runs) AS total FROM self GROUP BY team".to_string(),
        };
        let records: Vec<Record> = (0..120).map(|i| record("CSK", i)).collect();
        let payload = shape_metric(&spec, records);
        assert_eq!(payload.data.len(), 120);
        assert_eq!(payload.visualization_type, VisualizationKind::BarChart);
    }
}
