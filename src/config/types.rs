use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sluice
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "discovery-retry", default = "RetryConfig::discovery")]
    pub discovery_retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub completion: Option<CompletionConfig>,
}

/// Product API connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Request endpoint shared by discovery and product lookups
    #[serde(default = "default_api_endpoint")]
    pub endpoint: String,

    /// API key; falls back to the `SLUICE_API_KEY` environment variable
    #[serde(rename = "api-key", default)]
    pub api_key: String,

    /// Marketplace domain passed with every request
    #[serde(rename = "amazon-domain", default = "default_amazon_domain")]
    pub amazon_domain: String,

    /// Number of search result pages requested during discovery
    #[serde(rename = "max-page", default = "default_max_page")]
    pub max_page: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Which terms to ingest and how wide to fan out
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub terms: Vec<String>,

    /// Maximum number of terms processed at once
    #[serde(rename = "term-concurrency", default = "default_term_concurrency")]
    pub term_concurrency: usize,

    /// Maximum number of item fetches in flight per term
    #[serde(rename = "item-concurrency", default = "default_item_concurrency")]
    pub item_concurrency: usize,
}

/// Retry policy fields as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "backoff-multiplier", default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, as a fraction (0.2 = ±20%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Defaults for the term-level discovery call
    pub fn discovery() -> Self {
        Self {
            max_attempts: 2,
            ..Self::default()
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// Where and how batches are persisted
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// SQLite file name inside `directory` (sqlite format only)
    #[serde(rename = "database-file", default = "default_database_file")]
    pub database_file: String,

    /// Replaces whitespace when deriving artifact and log names from a term
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Value of the `platform` column
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Optional term -> `product_type` column overrides
    #[serde(rename = "product-types", default)]
    pub product_types: BTreeMap<String, String>,

    /// Markdown run summary file name inside `directory`
    #[serde(rename = "summary-file", default = "default_summary_file")]
    pub summary_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            format: OutputFormat::default(),
            database_file: default_database_file(),
            separator: default_separator(),
            platform: default_platform(),
            product_types: BTreeMap::new(),
            summary_file: default_summary_file(),
        }
    }
}

/// Persistence backend for batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Sqlite,
    Jsonl,
}

/// Chat-completion endpoint used to enrich records with reviews
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Base URL; `/chat/completions` is appended
    pub endpoint: String,

    /// API key; falls back to the `SLUICE_COMPLETION_API_KEY` environment variable
    #[serde(rename = "api-key", default)]
    pub api_key: String,

    pub model: String,

    #[serde(rename = "max-tokens", default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(rename = "timeout-secs", default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,

    /// Prompt with `{link}`, `{title}` and `{brand}` placeholders
    #[serde(rename = "prompt-template")]
    pub prompt_template: String,

    /// Responses shorter than this are treated as incomplete
    #[serde(rename = "min-content-chars", default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Phrases that mark a response as a placeholder rather than an answer
    #[serde(rename = "incomplete-markers", default = "default_incomplete_markers")]
    pub incomplete_markers: Vec<String>,

    /// Retry policy for completion calls
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_endpoint() -> String {
    "https://api.rainforestapi.com/request".to_string()
}

fn default_amazon_domain() -> String {
    "amazon.com".to_string()
}

fn default_max_page() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("sluice/{}", env!("CARGO_PKG_VERSION"))
}

fn default_term_concurrency() -> usize {
    2
}

fn default_item_concurrency() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./output")
}

fn default_database_file() -> String {
    "sluice.db".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_platform() -> String {
    "amazon".to_string()
}

fn default_summary_file() -> String {
    "summary.md".to_string()
}

fn default_max_tokens() -> u32 {
    3000
}

fn default_completion_timeout_secs() -> u64 {
    90
}

fn default_min_content_chars() -> usize {
    100
}

fn default_incomplete_markers() -> Vec<String> {
    vec!["Initiating a web search".to_string()]
}
