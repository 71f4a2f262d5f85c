//! Review enrichment
//!
//! A second fan-out over a term's deduplicated records: each record becomes
//! one completion unit keyed by its fingerprint, driven through the same
//! [`BoundedScheduler`] and [`RetryExecutor`] as product fetches.

use super::scheduler::BoundedScheduler;
use super::unit_completion;
use crate::config::CompletionConfig;
use crate::fetch::{CompletionClient, FetchUnit, PromptedCompletions};
use crate::logging::{LogEvent, TaskLogger};
use crate::record::Record;
use crate::retry::{FetchResult, RetryExecutor, RetryPolicy};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Record field the review text is stored in
pub const REVIEW_FIELD: &str = "review";

/// How many records each enrichment outcome applied to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentCounts {
    pub enriched: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Adds a generated review to each record
pub struct ReviewEnricher {
    client: Arc<CompletionClient>,
    template: String,
    policy: RetryPolicy,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ReviewEnricher {
    pub fn new(
        client: CompletionClient,
        template: impl Into<String>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            client: Arc::new(client),
            template: template.into(),
            policy,
            concurrency,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds an enricher from the `[completion]` config section
    pub fn from_config(http: Client, config: &CompletionConfig, concurrency: usize) -> Self {
        Self::new(
            CompletionClient::new(http, config),
            config.prompt_template.clone(),
            config.retry.to_policy(),
            concurrency,
        )
    }

    /// Stops admitting and retrying completions once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fills the `{link}`, `{title}` and `{brand}` placeholders from the record
    pub fn render_prompt(&self, record: &Record) -> String {
        self.template
            .replace("{link}", record.get_str("link").unwrap_or_default())
            .replace("{title}", record.get_str("title").unwrap_or_default())
            .replace("{brand}", record.get_str("brand").unwrap_or_default())
    }

    /// Stores a review (or the failure cause) in every record's `review` field
    ///
    /// Records whose unit was cancelled are left untouched.
    pub async fn enrich(
        &self,
        term: &str,
        records: &mut [Record],
        logger: &Arc<TaskLogger>,
    ) -> EnrichmentCounts {
        let mut prompts = HashMap::with_capacity(records.len());
        let mut units = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let id = record.fingerprint().to_string();
            prompts.insert(id.clone(), self.render_prompt(record));
            units.push((index, FetchUnit::new(id, term)));
        }

        let client = PromptedCompletions::new(Arc::clone(&self.client), prompts);
        let executor = RetryExecutor::new(Arc::new(client), self.policy.clone())
            .with_cancellation(self.cancel.clone());
        let scheduler = BoundedScheduler::new(self.concurrency, self.cancel.clone());

        let worker_logger = Arc::clone(logger);
        let report = scheduler
            .run(units, move |(index, unit): (usize, FetchUnit)| {
                let executor = executor.clone();
                let logger = Arc::clone(&worker_logger);
                async move {
                    let result = executor.execute(&unit, &logger).await;
                    unit_completion(index, unit, result)
                }
            })
            .await;

        if let Some(cause) = &report.halted {
            tracing::error!(term, "Review enrichment aborted: {}", cause);
            logger.record(LogEvent::BatchAborted {
                cause: format!("enrichment: {}", cause),
            });
        }

        let mut counts = EnrichmentCounts {
            cancelled: report.cancelled.len(),
            ..EnrichmentCounts::default()
        };
        for (index, unit, result) in report.completed {
            let (text, outcome) = match result {
                FetchResult::Succeeded(answer) => {
                    counts.enriched += 1;
                    (answer.get_str("content").unwrap_or_default().to_string(), "succeeded")
                }
                FetchResult::Exhausted { last_cause, .. } => {
                    counts.failed += 1;
                    (format!("Error: {}", last_cause), "exhausted")
                }
                FetchResult::Cancelled => {
                    counts.cancelled += 1;
                    continue;
                }
            };
            if let Some(record) = records.get_mut(index) {
                record.insert(REVIEW_FIELD, Value::String(text));
            }
            logger.record(LogEvent::Enrichment {
                unit_id: unit.id,
                result: outcome,
            });
        }
        for (_, unit) in &report.panicked {
            counts.failed += 1;
            logger.record(LogEvent::Enrichment {
                unit_id: unit.id.clone(),
                result: "panicked",
            });
        }

        tracing::info!(
            term,
            enriched = counts.enriched,
            failed = counts.failed,
            cancelled = counts.cancelled,
            "Review enrichment finished"
        );
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::read_log;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(endpoint: String) -> CompletionConfig {
        CompletionConfig {
            endpoint,
            api_key: "secret".to_string(),
            model: "test-model".to_string(),
            max_tokens: 100,
            timeout_secs: 5,
            prompt_template: "{title} by {brand}".to_string(),
            min_content_chars: 10,
            incomplete_markers: vec!["Initiating a web search".to_string()],
            retry: Default::default(),
        }
    }

    fn answer(content: &str) -> serde_json::Value {
        json!({"model": "test-model", "choices": [{"message": {"content": content}}]})
    }

    fn product(title: &str) -> Record {
        Record::from_value(json!({"title": title, "brand": "Selkirk", "link": "https://x/1"}))
            .unwrap()
    }

    fn enricher_for(server: &MockServer) -> ReviewEnricher {
        let config = create_test_config(server.uri());
        ReviewEnricher::new(
            CompletionClient::new(Client::new(), &config),
            config.prompt_template,
            RetryPolicy::immediate(2),
            2,
        )
    }

    #[test]
    fn test_render_prompt() {
        let config = create_test_config("http://127.0.0.1:9".to_string());
        let enricher = ReviewEnricher::new(
            CompletionClient::new(Client::new(), &config),
            "Review {title} ({brand}) at {link}",
            RetryPolicy::default(),
            1,
        );
        assert_eq!(
            enricher.render_prompt(&product("Paddle")),
            "Review Paddle (Selkirk) at https://x/1"
        );
        assert_eq!(enricher.render_prompt(&Record::default()), "Review  () at ");
    }

    #[tokio::test]
    async fn test_enrich_stores_reviews_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "Search for Good Paddle by Selkirk"}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("A detailed positive review")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("Initiating a web search")),
            )
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let logger = Arc::new(TaskLogger::new("paddles", temp.path().join("paddles.log")));
        let mut records = vec![product("Good Paddle"), product("Bad Paddle")];

        let counts = enricher_for(&server)
            .enrich("paddles", &mut records, &logger)
            .await;
        logger.close().unwrap();

        assert_eq!(counts.enriched, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(records[0].get_str(REVIEW_FIELD), Some("A detailed positive review"));
        assert!(records[1]
            .get_str(REVIEW_FIELD)
            .unwrap()
            .starts_with("Error: incomplete response"));

        let entries = read_log(logger.path()).unwrap();
        let enrichments = entries
            .iter()
            .filter(|e| e["event"] == "enrichment")
            .count();
        assert_eq!(enrichments, 2);
    }

    #[tokio::test]
    async fn test_cancelled_enrichment_leaves_records_untouched() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let temp = TempDir::new().unwrap();
        let logger = Arc::new(TaskLogger::new("paddles", temp.path().join("paddles.log")));
        let mut records = vec![product("Good Paddle")];

        let counts = enricher_for(&server)
            .with_cancellation(cancel)
            .enrich("paddles", &mut records, &logger)
            .await;

        assert_eq!(counts.cancelled, 1);
        assert!(records[0].get(REVIEW_FIELD).is_none());
    }
}
