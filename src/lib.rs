//! Sluice: a resilient search-term ingestion pipeline
//!
//! This crate fans each configured search term out into many per-item fetches
//! against a rate-limited product API, retries transient failures with
//! exponential backoff, deduplicates the resulting records, and persists one
//! clean batch per term plus a structured per-term log.

pub mod config;
pub mod fetch;
pub mod ingest;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod record;
pub mod retry;
pub mod state;

use thiserror::Error;

/// Main error type for Sluice operations
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Task log error: {0}")]
    Logger(#[from] logging::LoggerError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),
}

/// Configuration-specific errors
///
/// These are the only errors that stop a run, and they are raised before any
/// network activity starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No API key configured (set api-key or {env})")]
    MissingApiKey { env: &'static str },

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetch::{Discoverer, FetchClient, FetchFailure, FetchOutcome, FetchUnit};
pub use ingest::{BoundedScheduler, IngestReport, IngestionOrchestrator, ReviewEnricher};
pub use normalize::{Normalizer, ProductNormalizer};
pub use output::{RunSummary, Sink, TermSummary};
pub use record::{Batch, Record};
pub use retry::{FetchResult, RetryExecutor, RetryPolicy};
pub use state::{TaskStatus, UnitState};
