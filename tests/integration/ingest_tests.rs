//! Integration tests for the ingestion pipeline
//!
//! These tests use wiremock to stand in for the product and completion APIs
//! and run the full discover, fetch, dedupe, persist cycle end-to-end.

use rusqlite::Connection;
use serde_json::{json, Value};
use sluice::config::{load_config, ApiConfig, CompletionConfig, RetryConfig};
use sluice::fetch::{CompletionClient, ProductApiClient};
use sluice::ingest::{IngestReport, IngestionOrchestrator, OrchestratorSettings, ReviewEnricher};
use sluice::logging::read_log;
use sluice::normalize::ProductNormalizer;
use sluice::output::{open_sink, JsonLinesSink, Sink, SqliteSink, TermSummary};
use sluice::retry::RetryPolicy;
use sluice::state::TaskStatus;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Orchestrator = IngestionOrchestrator<ProductApiClient, ProductApiClient>;

fn create_api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        endpoint: format!("{}/request", server.uri()),
        api_key: "test-key".to_string(),
        amazon_domain: "amazon.com".to_string(),
        max_page: 1,
        timeout_secs: 5,
        user_agent: "sluice-test/1.0".to_string(),
    }
}

fn create_settings(dir: &Path) -> OrchestratorSettings {
    OrchestratorSettings {
        term_concurrency: 2,
        item_concurrency: 5,
        log_directory: dir.join("logs"),
        separator: "_".to_string(),
        discovery_policy: RetryPolicy::immediate(2),
    }
}

fn build(server: &MockServer, sink: Box<dyn Sink>, settings: OrchestratorSettings) -> Orchestrator {
    let client = Arc::new(ProductApiClient::new(&create_api_config(server)).unwrap());
    IngestionOrchestrator::new(
        Arc::clone(&client),
        client,
        RetryPolicy::immediate(3),
        Arc::new(ProductNormalizer::new("amazon", BTreeMap::new())),
        sink,
        settings,
    )
}

fn product(asin: &str) -> Value {
    json!({
        "product": {
            "asin": asin,
            "title": format!("Product {}", asin),
            "brand": "Acme",
            "link": format!("https://www.amazon.com/dp/{}", asin),
            "buybox_winner": {"price": {"value": 19.99}}
        }
    })
}

async fn mount_search(server: &MockServer, term: &str, ids: &[&str]) {
    let results: Vec<Value> = ids.iter().map(|id| json!({"asin": id})).collect();
    Mock::given(method("GET"))
        .and(path("/request"))
        .and(query_param("type", "search"))
        .and(query_param("search_term", term))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"search_results": results})))
        .mount(server)
        .await;
}

async fn mount_product(server: &MockServer, asin: &str) {
    Mock::given(method("GET"))
        .and(path("/request"))
        .and(query_param("type", "product"))
        .and(query_param("asin", asin))
        .respond_with(ResponseTemplate::new(200).set_body_json(product(asin)))
        .mount(server)
        .await;
}

fn summary_for<'a>(report: &'a IngestReport, term: &str) -> &'a TermSummary {
    report
        .summary
        .terms
        .iter()
        .find(|t| t.term == term)
        .unwrap()
}

fn terms(names: &[&str]) -> Vec<String> {
    names.iter().map(|t| t.to_string()).collect()
}

fn count_rows(db: &Path, table: &str) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_full_ingest_three_terms() {
    let server = MockServer::start().await;
    mount_search(&server, "Pickleball Paddles", &["A", "B", "A"]).await;
    mount_search(&server, "Tennis Shoes", &["C"]).await;
    mount_search(&server, "Ball Machines", &["D"]).await;
    for asin in ["A", "B", "C", "D"] {
        mount_product(&server, asin).await;
    }

    let temp = TempDir::new().unwrap();
    let db = temp.path().join("sluice.db");
    let sink = Box::new(SqliteSink::new(&db, "_").unwrap());
    let orchestrator =
        Arc::new(build(&server, sink, create_settings(temp.path())).with_config_hash("hash"));

    let report = orchestrator
        .ingest(terms(&["Pickleball Paddles", "Tennis Shoes", "Ball Machines"]))
        .await
        .unwrap();

    assert_eq!(report.batches["Pickleball Paddles"].len(), 2);
    assert_eq!(report.batches["Tennis Shoes"].len(), 1);
    assert_eq!(report.batches["Ball Machines"].len(), 1);

    let paddles = summary_for(&report, "Pickleball Paddles");
    assert_eq!(paddles.discovered, 3);
    assert_eq!(paddles.succeeded, 3);
    assert_eq!(paddles.duplicates, 1);
    assert_eq!(paddles.status, TaskStatus::Completed);

    assert_eq!(count_rows(&db, "Pickleball_Paddles_product_output"), 2);
    assert_eq!(count_rows(&db, "combined_product_output"), 4);
    assert_eq!(count_rows(&db, "runs"), 1);

    let price: String = Connection::open(&db)
        .unwrap()
        .query_row(
            "SELECT price FROM \"Tennis_Shoes_product_output\" WHERE asin = 'C'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(price, "19.99");

    let log = read_log(&temp.path().join("logs/Pickleball_Paddles.log")).unwrap();
    assert_eq!(log.first().unwrap()["event"], "task_started");
    assert_eq!(log.last().unwrap()["event"], "summary");
    assert_eq!(log.last().unwrap()["duplicates"], 1);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    mount_search(&server, "paddles", &["FLAKY"]).await;
    Mock::given(method("GET"))
        .and(query_param("type", "product"))
        .and(query_param("asin", "FLAKY"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_product(&server, "FLAKY").await;

    let temp = TempDir::new().unwrap();
    let sink = Box::new(JsonLinesSink::new(temp.path(), "_"));
    let orchestrator = Arc::new(build(&server, sink, create_settings(temp.path())));

    let report = orchestrator.ingest(terms(&["paddles"])).await.unwrap();

    let summary = summary_for(&report, "paddles");
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.exhausted, 0);

    let log = read_log(&temp.path().join("logs/paddles.log")).unwrap();
    let attempts: Vec<u64> = log
        .iter()
        .filter(|e| e["event"] == "attempt" && e["unit_id"] == "FLAKY")
        .map(|e| e["attempt"].as_u64().unwrap())
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let finished = log
        .iter()
        .find(|e| e["event"] == "unit_finished")
        .unwrap();
    assert_eq!(finished["result"], "succeeded");
    assert_eq!(finished["attempts"], 3);
}

#[tokio::test]
async fn test_discovery_failure_does_not_abort_other_terms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "search"))
        .and(query_param("search_term", "broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    mount_search(&server, "working", &["A"]).await;
    mount_product(&server, "A").await;

    let temp = TempDir::new().unwrap();
    let sink = Box::new(JsonLinesSink::new(temp.path(), "_"));
    let orchestrator = Arc::new(build(&server, sink, create_settings(temp.path())));

    let report = orchestrator
        .ingest(terms(&["broken", "working"]))
        .await
        .unwrap();

    assert!(report.batches["broken"].is_empty());
    let broken = summary_for(&report, "broken");
    assert_eq!(broken.status, TaskStatus::Failed);
    assert!(broken.error.as_deref().unwrap().contains("HTTP 500"));

    assert_eq!(report.batches["working"].len(), 1);
    assert_eq!(summary_for(&report, "working").status, TaskStatus::Completed);
    assert!(temp.path().join("working_product_output.jsonl").exists());
    assert!(!temp.path().join("broken_product_output.jsonl").exists());
}

#[tokio::test]
async fn test_rejected_credentials_abort_only_their_term() {
    let server = MockServer::start().await;
    mount_search(&server, "locked", &["X1", "X2", "X3"]).await;
    mount_search(&server, "open", &["A"]).await;
    Mock::given(method("GET"))
        .and(query_param("type", "product"))
        .and(query_param("asin", "X1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_product(&server, "A").await;

    let temp = TempDir::new().unwrap();
    let sink = Box::new(JsonLinesSink::new(temp.path(), "_"));
    let settings = OrchestratorSettings {
        item_concurrency: 1,
        ..create_settings(temp.path())
    };
    let orchestrator = Arc::new(build(&server, sink, settings));

    let report = orchestrator.ingest(terms(&["locked", "open"])).await.unwrap();

    let locked = summary_for(&report, "locked");
    assert_eq!(locked.exhausted, 1);
    assert_eq!(locked.cancelled, 2);
    assert_eq!(locked.status, TaskStatus::Failed);
    assert_eq!(summary_for(&report, "open").succeeded, 1);

    let log = read_log(&temp.path().join("logs/locked.log")).unwrap();
    assert!(log.iter().any(|e| e["event"] == "batch_aborted"));
}

#[tokio::test]
async fn test_cancellation_leaves_no_unit_in_flight() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (0..20).map(|i| format!("SLOW{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    mount_search(&server, "slow", &id_refs).await;
    Mock::given(method("GET"))
        .and(query_param("type", "product"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(product("SLOW"))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let sink = Box::new(JsonLinesSink::new(temp.path(), "_"));
    let settings = OrchestratorSettings {
        item_concurrency: 2,
        ..create_settings(temp.path())
    };
    let orchestrator = Arc::new(build(&server, sink, settings));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
    });

    let report = orchestrator.ingest(terms(&["slow"])).await.unwrap();

    let slow = summary_for(&report, "slow");
    assert_eq!(slow.discovered, 20);
    assert_eq!(slow.total_units(), 20);
    assert!(slow.cancelled > 0);

    let log = read_log(&temp.path().join("logs/slow.log")).unwrap();
    let results: Vec<&str> = log
        .iter()
        .filter(|e| e["event"] == "unit_finished")
        .map(|e| e["result"].as_str().unwrap())
        .collect();
    assert_eq!(results.len(), 20);
    assert!(results
        .iter()
        .all(|r| matches!(*r, "succeeded" | "exhausted" | "cancelled")));
}

#[tokio::test]
async fn test_review_enrichment_end_to_end() {
    let server = MockServer::start().await;
    mount_search(&server, "paddles", &["A"]).await;
    mount_product(&server, "A").await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "choices": [{"message": {"content": "A sturdy, well balanced paddle for beginners."}}]
        })))
        .mount(&server)
        .await;

    let completion = CompletionConfig {
        endpoint: format!("{}/v1", server.uri()),
        api_key: "secret".to_string(),
        model: "test-model".to_string(),
        max_tokens: 100,
        timeout_secs: 5,
        prompt_template: "Review {title} by {brand}".to_string(),
        min_content_chars: 10,
        incomplete_markers: vec!["Initiating a web search".to_string()],
        retry: RetryConfig::default(),
    };

    let temp = TempDir::new().unwrap();
    let sink = Box::new(JsonLinesSink::new(temp.path(), "_"));
    let enricher = ReviewEnricher::new(
        CompletionClient::new(reqwest::Client::new(), &completion),
        completion.prompt_template.clone(),
        RetryPolicy::immediate(2),
        2,
    );
    let orchestrator =
        Arc::new(build(&server, sink, create_settings(temp.path())).with_enricher(enricher));

    let report = orchestrator.ingest(terms(&["paddles"])).await.unwrap();
    assert_eq!(summary_for(&report, "paddles").enriched, 1);

    let text = std::fs::read_to_string(temp.path().join("paddles_product_output.jsonl")).unwrap();
    let row: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(row["review"], "A sturdy, well balanced paddle for beginners.");
    assert_eq!(row["product_type"], "paddles");
}

fn create_config_file(server: &MockServer, output: &Path, terms: &[&str]) -> NamedTempFile {
    let terms: Vec<String> = terms.iter().map(|t| format!("{:?}", t)).collect();
    let content = format!(
        r#"
[api]
endpoint = "{}/request"
api-key = "test-key"

[ingest]
terms = [{}]

[retry]
max-attempts = 2
base-delay-ms = 0
max-delay-ms = 0

[output]
directory = '{}'
format = "sqlite"
"#,
        server.uri(),
        terms.join(", "),
        output.display()
    );
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_config_rejects_terms_sharing_an_artifact() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    for terms in [
        &["Pickleball Paddles", "Pickleball  Paddles"][..],
        &["Paddles", "paddles"][..],
        &["Paddles", "combined"][..],
        &["../escape", "escape"][..],
    ] {
        let file = create_config_file(&server, temp.path(), terms);
        assert!(load_config(file.path()).is_err(), "accepted {:?}", terms);
    }
}

#[tokio::test]
async fn test_distinct_terms_get_distinct_artifacts_and_logs() {
    let server = MockServer::start().await;
    mount_search(&server, "Paddles", &["A"]).await;
    mount_search(&server, "Pickleball Paddles", &["B", "C"]).await;
    mount_search(&server, "Pickleball-Paddles", &["D", "E", "F"]).await;
    mount_search(&server, "../escape", &["G"]).await;
    for asin in ["A", "B", "C", "D", "E", "F", "G"] {
        mount_product(&server, asin).await;
    }

    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");
    let terms = [
        "Paddles",
        "Pickleball Paddles",
        "Pickleball-Paddles",
        "../escape",
    ];
    let file = create_config_file(&server, &output, &terms);
    let config = load_config(file.path()).unwrap();

    let client = Arc::new(ProductApiClient::new(&config.api).unwrap());
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::clone(&client),
        client,
        config.retry.to_policy(),
        Arc::new(ProductNormalizer::new("amazon", BTreeMap::new())),
        open_sink(&config.output).unwrap(),
        OrchestratorSettings::from_config(&config),
    ));

    let report = orchestrator
        .ingest(config.ingest.terms.clone())
        .await
        .unwrap();

    let db = output.join(&config.output.database_file);
    let expected = [
        ("Paddles", "Paddles", 1),
        ("Pickleball Paddles", "Pickleball_Paddles", 2),
        ("Pickleball-Paddles", "Pickleball-Paddles", 3),
        ("../escape", "escape", 1),
    ];
    for (term, name, rows) in expected {
        let summary = summary_for(&report, term);
        assert_eq!(summary.written, rows, "{}", term);
        assert_eq!(
            summary.artifact.as_deref(),
            Some(format!("{}_product_output", name).as_str())
        );
        assert_eq!(
            count_rows(&db, &format!("{}_product_output", name)),
            rows as i64
        );

        let log_path = output.join("logs").join(format!("{}.log", name));
        let log = read_log(&log_path).unwrap();
        assert!(log.iter().all(|e| e["term"] == term));
        assert_eq!(log.last().unwrap()["written"], rows);
    }
    assert_eq!(count_rows(&db, "combined_product_output"), 7);
    assert!(!temp.path().join("escape.log").exists());
    assert!(!temp.path().join("escape_product_output.jsonl").exists());
}
