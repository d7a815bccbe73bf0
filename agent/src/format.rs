//! Renders chat payloads as Markdown for terminal output.

use analyst_engine::ChatPayload;
use serde_json::Value;

pub fn render_chat(payload: &ChatPayload) -> String {
    match payload {
        ChatPayload::Empty => "No matching rows.".to_string(),
        ChatPayload::Table {
            columns,
            rows,
            total_rows,
        } => {
            let mut out = String::new();
            out.push_str(&format!("| {} |\n", columns.join(" | ")));
            out.push_str(&format!(
                "|{}|\n",
                columns.iter().map(|_| "---").collect::<Vec<_>>().join("|")
            ));
            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|column| cell_text(row.get(column).unwrap_or(&Value::Null)))
                    .collect();
                out.push_str(&format!("| {} |\n", cells.join(" | ")));
            }
            if *total_rows > rows.len() {
                out.push_str(&format!(
                    "\n_Showing first {} of {} rows._\n",
                    rows.len(),
                    total_rows
                ));
            }
            out
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
