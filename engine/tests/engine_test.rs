use std::sync::Once;

use analyst_engine::{
    parse_file_type, shape_chat, ChatPayload, DataEngine, EngineError, FileType,
};
use serde_json::Value;
use tempfile::TempDir;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn write_fixture(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("failed to write fixture");
    path.to_string_lossy().into_owned()
}

const MATCHES: &str = "team,runs\nMI,100\nCSK,80\nMI,50\nRCB,120\n";

#[tokio::test]
async fn schema_catalog_reports_ordered_columns() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().expect("engine init");
    let schema = engine.schema(&path, &FileType::Csv).await.expect("schema");

    let names: Vec<&str> = schema.names();
    assert_eq!(names, vec!["team", "runs"]);
    assert!(
        schema.columns()[1].dtype.starts_with("Int"),
        "runs should infer as an integer type, got {}",
        schema.columns()[1].dtype
    );
}

#[tokio::test]
async fn schema_catalog_rejects_missing_file() {
    init_test_logging();
    let engine = DataEngine::new().unwrap();
    let result = engine
        .schema("/nonexistent/matches.csv", &FileType::Csv)
        .await;
    assert!(matches!(result, Err(EngineError::FileRead { .. })));
}

#[test]
fn file_type_argument_is_restricted() {
    assert!(parse_file_type("csv").is_ok());
    assert!(parse_file_type("parquet").is_ok());
    assert!(matches!(
        parse_file_type("json"),
        Err(EngineError::UnsupportedFileType { .. })
    ));
}

#[tokio::test]
async fn loader_unions_same_schema_files() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let first = write_fixture(&dir, "season_a.csv", "team,runs\nMI,10\nCSK,20\n");
    let second = write_fixture(&dir, "season_b.csv", "team,runs\nRCB,30\n");

    let engine = DataEngine::new().unwrap();
    let records = engine
        .query(
            &[first, second],
            &FileType::Csv,
            "SELECT COUNT(*) AS n FROM self",
        )
        .await
        .expect("query");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("n"), Some(&Value::from(3i64)));
}

#[tokio::test]
async fn loader_rejects_heterogeneous_schemas() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let first = write_fixture(&dir, "matches.csv", MATCHES);
    let second = write_fixture(&dir, "players.csv", "player,average\nRohit,42.1\n");

    let engine = DataEngine::new().unwrap();
    let result = engine.load(&[first, second], &FileType::Csv).await;
    assert!(matches!(result, Err(EngineError::SchemaMismatch { .. })));
}

#[tokio::test]
async fn loader_requires_at_least_one_file() {
    init_test_logging();
    let engine = DataEngine::new().unwrap();
    let result = engine.load(&[], &FileType::Csv).await;
    assert!(matches!(result, Err(EngineError::Config { .. })));
}

#[tokio::test]
async fn cte_aggregation_orders_descending() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().unwrap();
    let query = "WITH totals AS (SELECT team AS team, SUM(runs) AS total_runs \
                 FROM self GROUP BY team) \
                 SELECT team, total_runs FROM totals ORDER BY total_runs DESC";
    let records = engine
        .query(&[path], &FileType::Csv, query)
        .await
        .expect("query");

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].get("team"), Some(&Value::String("MI".into())));
    assert_eq!(records[0].get("total_runs"), Some(&Value::from(150i64)));
    assert_eq!(records[1].get("total_runs"), Some(&Value::from(120i64)));
    assert_eq!(records[2].get("total_runs"), Some(&Value::from(80i64)));
}

#[tokio::test]
async fn validation_rejections_surface_before_execution() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().unwrap();
    let query = "SELECT team, (SELECT SUM(runs) FROM self) AS total FROM self";
    let result = engine.query(&[path], &FileType::Csv, query).await;

    match result {
        Err(EngineError::InvalidQuery(rejection)) => {
            assert_eq!(rejection, analyst_engine::Rejection::IllegalSubquery);
        }
        other => panic!("expected a validation rejection, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn execution_is_idempotent_over_unchanged_dataset() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().unwrap();
    let dataset = engine.load(&[path], &FileType::Csv).await.unwrap();
    let query = "SELECT team, runs FROM self ORDER BY runs DESC";

    let first = engine.execute(&dataset, query).await.expect("first run");
    let second = engine.execute(&dataset, query).await.expect("second run");
    assert_eq!(first, second);
}

#[tokio::test]
async fn runtime_failures_surface_as_execution_errors() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().unwrap();
    // Passes static validation (no dialect rule names functions), then
    // fails in the engine: the function does not exist.
    let query = "SELECT not_a_function(team) AS x FROM self";
    let result = engine.query(&[path], &FileType::Csv, query).await;
    assert!(matches!(result, Err(EngineError::Execution { .. })));
}

#[tokio::test]
async fn empty_results_shape_to_the_empty_marker() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "matches.csv", MATCHES);

    let engine = DataEngine::new().unwrap();
    let records = engine
        .query(
            &[path],
            &FileType::Csv,
            "SELECT team, runs FROM self WHERE runs > 100000",
        )
        .await
        .expect("query");

    assert!(records.is_empty());
    assert_eq!(shape_chat(&records), ChatPayload::Empty);
}
