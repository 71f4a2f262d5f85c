//! Chat-completion client
//!
//! Language-model calls are just another fetch unit: one POST per attempt,
//! classified into the same transient/fatal taxonomy as product lookups.
//! Whether a 200 response actually carries an answer is decided by a
//! pluggable [`CompletenessCheck`]; an incomplete answer is transient.

use super::product::send_json;
use super::{FetchClient, FetchFailure, FetchOutcome, FetchUnit};
use crate::config::CompletionConfig;
use crate::record::Record;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a completion's text is a usable answer
pub trait CompletenessCheck: Send + Sync + fmt::Debug {
    /// Returns `Err(reason)` when the content should be retried
    fn check(&self, content: &str) -> Result<(), String>;
}

/// Accepts content that is long enough and contains no placeholder phrase
#[derive(Debug, Clone)]
pub struct MinimumContent {
    pub min_chars: usize,
    pub markers: Vec<String>,
}

impl MinimumContent {
    pub fn new(min_chars: usize, markers: Vec<String>) -> Self {
        Self { min_chars, markers }
    }
}

impl CompletenessCheck for MinimumContent {
    fn check(&self, content: &str) -> Result<(), String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err("empty content".to_string());
        }
        if let Some(marker) = self.markers.iter().find(|m| trimmed.contains(m.as_str())) {
            return Err(format!("content contains placeholder '{}'", marker));
        }
        let chars = trimmed.chars().count();
        if chars < self.min_chars {
            return Err(format!(
                "content has {} characters, expected at least {}",
                chars, self.min_chars
            ));
        }
        Ok(())
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    completeness: Arc<dyn CompletenessCheck>,
}

impl CompletionClient {
    pub fn new(client: Client, config: &CompletionConfig) -> Self {
        let completeness = Arc::new(MinimumContent::new(
            config.min_content_chars,
            config.incomplete_markers.clone(),
        ));
        Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            completeness,
        }
    }

    /// Replaces the completeness predicate
    pub fn with_completeness(mut self, completeness: Arc<dyn CompletenessCheck>) -> Self {
        self.completeness = completeness;
        self
    }

    /// Sends one prompt and returns the answer as a record
    ///
    /// The record carries `content`, `model` and `created`.
    pub async fn complete(&self, prompt: &str) -> Result<Record, FetchFailure> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": format!("Search for {}", prompt)}],
            "max_tokens": self.max_tokens,
            "temperature": 0.7,
        });
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body);
        let response = send_json(request).await?;

        let content = response
            .pointer("/choices/0/message/content")
            .ok_or_else(|| FetchFailure::Malformed("response has no choices".to_string()))?
            .as_str()
            .unwrap_or_default();

        self.completeness
            .check(content)
            .map_err(FetchFailure::Incomplete)?;

        let mut record = Record::default();
        record.insert("content", Value::String(content.to_string()));
        record.insert("model", response.get("model").cloned().unwrap_or(Value::Null));
        record.insert(
            "created",
            response.get("created").cloned().unwrap_or(Value::Null),
        );
        Ok(record)
    }
}

/// Completion fetches keyed by unit id
///
/// Each unit id maps to the prompt rendered for it. Retries reword the
/// prompt with a `(retry n)` suffix so the upstream does not serve a cached
/// placeholder again.
#[derive(Debug, Clone)]
pub struct PromptedCompletions {
    client: Arc<CompletionClient>,
    prompts: HashMap<String, String>,
}

impl PromptedCompletions {
    pub fn new(client: Arc<CompletionClient>, prompts: HashMap<String, String>) -> Self {
        Self { client, prompts }
    }
}

#[async_trait]
impl FetchClient for PromptedCompletions {
    async fn fetch(&self, unit: &FetchUnit, attempt: u32) -> FetchOutcome {
        let Some(prompt) = self.prompts.get(&unit.id) else {
            return FetchOutcome::Fatal(FetchFailure::Malformed(format!(
                "no prompt rendered for unit {}",
                unit.id
            )));
        };

        let prompt = if attempt > 1 {
            format!("{} (retry {})", prompt, attempt - 1)
        } else {
            prompt.clone()
        };

        self.client.complete(&prompt).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(endpoint: String) -> CompletionConfig {
        CompletionConfig {
            endpoint,
            api_key: "secret".to_string(),
            model: "test-model".to_string(),
            max_tokens: 100,
            timeout_secs: 5,
            prompt_template: "{title}".to_string(),
            min_content_chars: 10,
            incomplete_markers: vec!["Initiating a web search".to_string()],
            retry: Default::default(),
        }
    }

    fn answer(content: &str) -> Value {
        json!({
            "model": "test-model",
            "created": 1700000000,
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn test_minimum_content() {
        let check = MinimumContent::new(10, vec!["Initiating a web search".to_string()]);
        assert!(check.check("A thorough review of the paddle.").is_ok());
        assert!(check.check("   ").is_err());
        assert!(check.check("short").is_err());
        assert!(check
            .check("Initiating a web search for this product right now")
            .is_err());
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("Great paddle, 4.5 stars")),
            )
            .mount(&server)
            .await;

        let config = create_test_config(format!("{}/v1/", server.uri()));
        let client = CompletionClient::new(Client::new(), &config);
        let record = client.complete("Selkirk paddle").await.unwrap();
        assert_eq!(record.get_str("content"), Some("Great paddle, 4.5 stars"));
        assert_eq!(record.get_str("model"), Some("test-model"));
    }

    #[tokio::test]
    async fn test_placeholder_answer_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("Initiating a web search...")),
            )
            .mount(&server)
            .await;

        let config = create_test_config(server.uri());
        let client = CompletionClient::new(Client::new(), &config);
        let fetcher = PromptedCompletions::new(
            Arc::new(client),
            HashMap::from([("u1".to_string(), "Selkirk paddle".to_string())]),
        );
        let outcome = fetcher.fetch(&FetchUnit::new("u1", "paddles"), 1).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Transient(FetchFailure::Incomplete(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_attempt_rewords_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "Search for Selkirk paddle (retry 2)"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("A long enough answer")))
            .mount(&server)
            .await;

        let config = create_test_config(server.uri());
        let fetcher = PromptedCompletions::new(
            Arc::new(CompletionClient::new(Client::new(), &config)),
            HashMap::from([("u1".to_string(), "Selkirk paddle".to_string())]),
        );
        let outcome = fetcher.fetch(&FetchUnit::new("u1", "paddles"), 3).await;
        assert!(matches!(outcome, FetchOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_unknown_unit_is_fatal() {
        let config = create_test_config("http://127.0.0.1:9".to_string());
        let fetcher = PromptedCompletions::new(
            Arc::new(CompletionClient::new(Client::new(), &config)),
            HashMap::new(),
        );
        let outcome = fetcher.fetch(&FetchUnit::new("missing", "paddles"), 1).await;
        assert!(matches!(outcome, FetchOutcome::Fatal(FetchFailure::Malformed(_))));
    }

    #[tokio::test]
    async fn test_missing_choices_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let config = create_test_config(server.uri());
        let client = CompletionClient::new(Client::new(), &config);
        let result = client.complete("x").await;
        assert!(matches!(result, Err(FetchFailure::Malformed(_))));
    }
}
