use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable consulted when `api.api-key` is empty
pub const API_KEY_ENV: &str = "SLUICE_API_KEY";

/// Environment variable consulted when `completion.api-key` is empty
pub const COMPLETION_API_KEY_ENV: &str = "SLUICE_COMPLETION_API_KEY";

/// Loads and parses a configuration file from the given path
///
/// Empty API keys are filled from the environment before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parses and validates configuration text
///
/// # Arguments
///
/// * `content` - TOML text
/// * `env` - Looks up an environment variable by name
pub fn parse_config(
    content: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;

    if config.api.api_key.trim().is_empty() {
        config.api.api_key = env(API_KEY_ENV).unwrap_or_default();
    }
    if let Some(completion) = config.completion.as_mut() {
        if completion.api_key.trim().is_empty() {
            completion.api_key = env(COMPLETION_API_KEY_ENV).unwrap_or_default();
        }
    }

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Recorded with every run so results can be traced back to the exact
/// configuration that produced them.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
