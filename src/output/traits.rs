//! Sink trait and summary types
//!
//! This module defines the trait interface for batch sinks and the
//! per-term and per-run summaries reported at the end of a run.

use crate::normalize::FlatRecord;
use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode row: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Durable destination for normalized batches
///
/// Writing a term's artifact again replaces its previous contents.
pub trait Sink: Send {
    /// Persists one term's rows
    ///
    /// # Arguments
    ///
    /// * `term` - The search term the rows belong to
    /// * `columns` - Column names, aligned with each row's values
    /// * `rows` - Rows in batch order
    ///
    /// # Returns
    ///
    /// The artifact name or path that was written
    fn write_term(
        &mut self,
        term: &str,
        columns: &[String],
        rows: &[FlatRecord],
    ) -> OutputResult<String>;

    /// Persists the rows of every term as one artifact
    fn write_combined(&mut self, columns: &[String], rows: &[FlatRecord]) -> OutputResult<String>;

    /// Records the finished run and flushes anything buffered
    fn finalize(&mut self, summary: &RunSummary) -> OutputResult<()>;
}

/// Outcome counts for one search term
#[derive(Debug, Clone, PartialEq)]
pub struct TermSummary {
    pub term: String,
    pub status: TaskStatus,

    /// Identifiers returned by discovery, duplicates included
    pub discovered: usize,

    pub succeeded: usize,
    pub exhausted: usize,

    /// Units never admitted, after cancellation or a batch abort
    pub cancelled: usize,

    /// Records dropped as duplicates
    pub duplicates: usize,

    /// Records that could not be normalized
    pub normalize_failed: usize,

    /// Records that received a review
    pub enriched: usize,

    /// Rows persisted by the sink
    pub written: usize,

    pub artifact: Option<String>,
    pub error: Option<String>,
}

impl TermSummary {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            status: TaskStatus::Pending,
            discovered: 0,
            succeeded: 0,
            exhausted: 0,
            cancelled: 0,
            duplicates: 0,
            normalize_failed: 0,
            enriched: 0,
            written: 0,
            artifact: None,
            error: None,
        }
    }

    /// Summary for a term whose task failed outright
    pub fn failed(term: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.into()),
            ..Self::new(term)
        }
    }

    /// Units that reached a final state
    pub fn total_units(&self) -> usize {
        self.succeeded + self.exhausted + self.cancelled
    }
}

/// Summary of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,

    /// Per-term summaries in configuration order
    pub terms: Vec<TermSummary>,

    /// Artifact holding every term's rows, if it was written
    pub combined_artifact: Option<String>,
}

impl RunSummary {
    pub fn new(config_hash: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            config_hash: config_hash.into(),
            terms: Vec::new(),
            combined_artifact: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// `completed` when at least one term completed, else `failed`
    pub fn status(&self) -> TaskStatus {
        if self
            .terms
            .iter()
            .any(|t| t.status == TaskStatus::Completed)
        {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }

    pub fn total_discovered(&self) -> usize {
        self.terms.iter().map(|t| t.discovered).sum()
    }

    pub fn total_succeeded(&self) -> usize {
        self.terms.iter().map(|t| t.succeeded).sum()
    }

    pub fn total_exhausted(&self) -> usize {
        self.terms.iter().map(|t| t.exhausted).sum()
    }

    pub fn total_cancelled(&self) -> usize {
        self.terms.iter().map(|t| t.cancelled).sum()
    }

    pub fn total_duplicates(&self) -> usize {
        self.terms.iter().map(|t| t.duplicates).sum()
    }

    pub fn total_written(&self) -> usize {
        self.terms.iter().map(|t| t.written).sum()
    }

    pub fn failed_terms(&self) -> usize {
        self.terms
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count()
    }

    /// Succeeded units as a percentage of units that were attempted
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_succeeded() + self.total_exhausted();
        if attempted == 0 {
            return 0.0;
        }
        (self.total_succeeded() as f64 / attempted as f64) * 100.0
    }
}
