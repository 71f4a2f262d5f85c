//! Output module for persisting batches and reporting run results
//!
//! This module handles:
//! - Writing one tabular artifact per term plus a combined artifact
//! - Deriving artifact and log names from search terms
//! - Printing and writing run summaries

mod jsonl_sink;
mod markdown;
mod sqlite_sink;
pub mod stats;
mod traits;

pub use jsonl_sink::JsonLinesSink;
pub use markdown::{format_markdown_summary, write_markdown_summary};
pub use sqlite_sink::SqliteSink;
pub use stats::print_summary;
pub use traits::{OutputError, OutputResult, RunSummary, Sink, TermSummary};

use crate::config::{OutputConfig, OutputFormat};
use std::collections::HashMap;
use thiserror::Error;

/// Name of the artifact holding every term's rows
pub const COMBINED_ARTIFACT: &str = "combined_product_output";

/// Joins a term's words with `separator`
///
/// Whitespace and path separators both split words, and `.`/`..` words are
/// dropped, so the result is always a single path component.
/// `"Pickleball  Paddles"` with `"_"` becomes `"Pickleball_Paddles"`.
pub fn normalize_term(term: &str, separator: &str) -> String {
    term.split(|c: char| c.is_whitespace() || c == '/' || c == '\\')
        .filter(|word| !word.is_empty() && *word != "." && *word != "..")
        .collect::<Vec<_>>()
        .join(separator)
}

/// Artifact name for one term's batch
pub fn term_artifact(term: &str, separator: &str) -> String {
    format!("{}_product_output", normalize_term(term, separator))
}

/// A term list that cannot be given one artifact and log per term
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermNameError {
    #[error("search term '{term}' has no characters usable in a file name")]
    Unnamed { term: String },

    #[error("search term '{term}' maps to the reserved artifact '{artifact}'")]
    Reserved { term: String, artifact: String },

    #[error("search terms '{first}' and '{second}' both map to artifact '{artifact}'")]
    Collision {
        first: String,
        second: String,
        artifact: String,
    },
}

/// Checks that every term gets its own artifact and log file
///
/// Names compare case-insensitively since SQLite table names and some
/// filesystems do.
pub fn check_term_names(terms: &[String], separator: &str) -> Result<(), TermNameError> {
    let mut claimed: HashMap<String, &str> = HashMap::new();
    for term in terms {
        if normalize_term(term, separator).is_empty() {
            return Err(TermNameError::Unnamed { term: term.clone() });
        }
        let artifact = term_artifact(term, separator);
        let key = artifact.to_lowercase();
        if key == COMBINED_ARTIFACT.to_lowercase() {
            return Err(TermNameError::Reserved {
                term: term.clone(),
                artifact,
            });
        }
        if let Some(first) = claimed.insert(key, term) {
            return Err(TermNameError::Collision {
                first: first.to_string(),
                second: term.clone(),
                artifact,
            });
        }
    }
    Ok(())
}

/// Opens the sink selected by the output configuration
///
/// # Arguments
///
/// * `config` - The output configuration
///
/// # Returns
///
/// * `Ok(Box<dyn Sink>)` - Sink ready to accept batches
/// * `Err(OutputError)` - The output directory or database could not be opened
pub fn open_sink(config: &OutputConfig) -> OutputResult<Box<dyn Sink>> {
    std::fs::create_dir_all(&config.directory)?;
    let sink: Box<dyn Sink> = match config.format {
        OutputFormat::Sqlite => Box::new(SqliteSink::new(
            &config.directory.join(&config.database_file),
            &config.separator,
        )?),
        OutputFormat::Jsonl => Box::new(JsonLinesSink::new(&config.directory, &config.separator)),
    };
    Ok(sink)
}
