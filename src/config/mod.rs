//! Configuration module for Sluice
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sluice::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sluice.toml")).unwrap();
//! println!("Ingesting {} terms", config.ingest.terms.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, CompletionConfig, Config, IngestConfig, OutputConfig, OutputFormat, RetryConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, API_KEY_ENV,
    COMPLETION_API_KEY_ENV,
};
pub use validation::validate;
