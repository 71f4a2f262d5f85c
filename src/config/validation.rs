use crate::config::parser::{API_KEY_ENV, COMPLETION_API_KEY_ENV};
use crate::config::types::{
    ApiConfig, CompletionConfig, Config, IngestConfig, OutputConfig, RetryConfig,
};
use crate::output::check_term_names;
use crate::ConfigError;
use url::Url;

/// Upper bound for either concurrency limit
const MAX_CONCURRENCY: usize = 64;

/// Placeholders a prompt template may use
const PROMPT_PLACEHOLDERS: [&str; 3] = ["{link}", "{title}", "{brand}"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_ingest_config(&config.ingest)?;
    validate_retry_config("retry", &config.retry)?;
    validate_retry_config("discovery-retry", &config.discovery_retry)?;
    validate_output_config(&config.output)?;
    check_term_names(&config.ingest.terms, &config.output.separator)
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    if let Some(completion) = &config.completion {
        validate_completion_config(completion)?;
    }
    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    if config.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey { env: API_KEY_ENV });
    }

    validate_http_url("api.endpoint", &config.endpoint)?;

    if config.amazon_domain.trim().is_empty() {
        return Err(ConfigError::Validation(
            "amazon-domain cannot be empty".to_string(),
        ));
    }

    if config.max_page < 1 {
        return Err(ConfigError::Validation(format!(
            "max-page must be >= 1, got {}",
            config.max_page
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "api timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_ingest_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.terms.is_empty() {
        return Err(ConfigError::Validation(
            "at least one search term is required".to_string(),
        ));
    }

    if config.terms.iter().any(|term| term.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "search terms cannot be blank".to_string(),
        ));
    }

    validate_concurrency("term-concurrency", config.term_concurrency)?;
    validate_concurrency("item-concurrency", config.item_concurrency)?;

    Ok(())
}

fn validate_concurrency(name: &str, value: usize) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_CONCURRENCY, value
        )));
    }
    Ok(())
}

fn validate_retry_config(section: &str, config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "[{}] max-attempts must be >= 1",
            section
        )));
    }

    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "[{}] backoff-multiplier must be >= 1.0, got {}",
            section, config.backoff_multiplier
        )));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "[{}] max-delay-ms ({}) must be >= base-delay-ms ({})",
            section, config.max_delay_ms, config.base_delay_ms
        )));
    }

    if !(0.0..=0.5).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "[{}] jitter must be between 0.0 and 0.5, got {}",
            section, config.jitter
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.separator.is_empty() {
        return Err(ConfigError::Validation(
            "output separator cannot be empty".to_string(),
        ));
    }

    if config
        .separator
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_whitespace())
    {
        return Err(ConfigError::Validation(format!(
            "output separator '{}' cannot contain path separators or whitespace",
            config.separator
        )));
    }

    if config.database_file.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-file cannot be empty".to_string(),
        ));
    }

    if config.summary_file.trim().is_empty() {
        return Err(ConfigError::Validation(
            "summary-file cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_completion_config(config: &CompletionConfig) -> Result<(), ConfigError> {
    if config.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey {
            env: COMPLETION_API_KEY_ENV,
        });
    }

    validate_http_url("completion.endpoint", &config.endpoint)?;

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "completion model cannot be empty".to_string(),
        ));
    }

    if !PROMPT_PLACEHOLDERS
        .iter()
        .any(|p| config.prompt_template.contains(p))
    {
        return Err(ConfigError::Validation(format!(
            "prompt-template must use at least one of {}",
            PROMPT_PLACEHOLDERS.join(", ")
        )));
    }

    validate_retry_config("completion.retry", &config.retry)
}

/// Validates that a URL parses and uses http or https
fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} '{}': {}", name, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            name, value
        )));
    }

    Ok(())
}
