//! Per-term structured run logs
//!
//! Each search term owns one [`TaskLogger`]. Entries are JSON objects, one per
//! line, so the log can be tailed by humans and parsed by tools alike.

mod events;
mod task_logger;

pub use events::{LogEvent, LogLevel};
pub use task_logger::{read_log, TaskLogger};

use thiserror::Error;

/// Errors raised by a task log
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to write task log {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Task log {0} is already closed")]
    Closed(String),

    #[error("Task log {0} lock was poisoned by a panicking writer")]
    Poisoned(String),
}
