use serde::{Deserialize, Serialize};

/// A single row of query output: output column name mapped to a scalar
/// JSON value. Built with serde_json's `preserve_order` feature so the
/// column order of the SELECT list survives serialization.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FileType {
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "parquet")]
    Parquet,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Parquet => "parquet",
        }
    }

    /// Parses the `file_type` tool argument. Anything other than the two
    /// supported formats is an `UnsupportedFileType` at the call site.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "csv" => Some(FileType::Csv),
            "parquet" => Some(FileType::Parquet),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit('.').next()?;
        Self::parse(&ext.to_ascii_lowercase())
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: String,
}

/// Ordered, case-sensitive column listing for one source file. Column
/// order follows the file; names are unique within a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// The fixed set of chart kinds the dashboard path may declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    TimeSeries,
    BarChart,
    PieChart,
    ScatterPlot,
    Heatmap,
    Table,
    Gauge,
    Funnel,
}

impl VisualizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationKind::TimeSeries => "time_series",
            VisualizationKind::BarChart => "bar_chart",
            VisualizationKind::PieChart => "pie_chart",
            VisualizationKind::ScatterPlot => "scatter_plot",
            VisualizationKind::Heatmap => "heatmap",
            VisualizationKind::Table => "table",
            VisualizationKind::Gauge => "gauge",
            VisualizationKind::Funnel => "funnel",
        }
    }

    /// One line per kind, used to teach the model when each chart fits.
    pub fn catalog() -> &'static [(VisualizationKind, &'static str)] {
        &[
            (
                VisualizationKind::TimeSeries,
                "Data that changes over time (trends, growth)",
            ),
            (VisualizationKind::BarChart, "Comparing categories or groups"),
            (VisualizationKind::PieChart, "Composition or proportion"),
            (
                VisualizationKind::ScatterPlot,
                "Relationship between two variables",
            ),
            (VisualizationKind::Heatmap, "Intensity across two dimensions"),
            (
                VisualizationKind::Table,
                "Individual records or precise aggregates",
            ),
            (VisualizationKind::Gauge, "A KPI against a target value"),
            (VisualizationKind::Funnel, "Sequential steps with drop-offs"),
        ]
    }
}

/// One named unit of dashboard analysis: a metric, how to draw it, and
/// the query that produces its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub metric: String,
    pub description: String,
    pub visualization_type: VisualizationKind,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSpec {
    pub key_metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub dashboard_components: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_parse_rejects_unknown() {
        assert_eq!(FileType::parse("csv"), Some(FileType::Csv));
        assert_eq!(FileType::parse("parquet"), Some(FileType::Parquet));
        assert_eq!(FileType::parse("json"), None);
        assert_eq!(FileType::parse("CSV"), None);
    }

    #[test]
    fn file_type_from_path_uses_extension() {
        assert_eq!(FileType::from_path("data/matches.csv"), Some(FileType::Csv));
        assert_eq!(
            FileType::from_path("/tmp/part-0001.PARQUET"),
            Some(FileType::Parquet)
        );
        assert_eq!(FileType::from_path("README"), None);
    }

    #[test]
    fn schema_lookup_is_case_sensitive() {
        let schema = Schema::new(vec![Column {
            name: "Team".to_string(),
            dtype: "String".to_string(),
        }]);
        assert!(schema.contains("Team"));
        assert!(!schema.contains("team"));
    }

    #[test]
    fn visualization_kind_uses_wire_names() {
        let kind: VisualizationKind = serde_json::from_str("\"bar_chart\"").unwrap();
        assert_eq!(kind, VisualizationKind::BarChart);
        assert_eq!(
            serde_json::to_string(&VisualizationKind::TimeSeries).unwrap(),
            "\"time_series\""
        );
        // `as_str` and the serde names must agree; the prompt catalog is
        // built from the former, the parsed spec from the latter.
        for (kind, _) in VisualizationKind::catalog() {
            assert_eq!(
                serde_json::to_string(kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }
}
