//! Append-only JSON-lines log for one search term
//!
//! The backing file is opened on the first append and closed exactly once.
//! Appends from concurrent workers are serialized through a mutex so that a
//! line is always written whole.

use super::{LogEvent, LogLevel, LoggerError};
use crate::output::normalize_term;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
enum Stream {
    Unopened,
    Open(File),
    Closed,
}

#[derive(Serialize)]
struct Entry<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    term: &'a str,
    #[serde(flatten)]
    event: &'a LogEvent,
}

/// Structured log stream owned by one search task
#[derive(Debug)]
pub struct TaskLogger {
    term: String,
    path: PathBuf,
    stream: Mutex<Stream>,
    written: AtomicUsize,
}

impl TaskLogger {
    /// Creates a logger writing to `path`; nothing touches disk until the first append
    pub fn new(term: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            term: term.into(),
            path: path.into(),
            stream: Mutex::new(Stream::Unopened),
            written: AtomicUsize::new(0),
        }
    }

    /// Creates a logger named after the term inside `directory`
    ///
    /// `"Pickleball Paddles"` with separator `_` logs to `Pickleball_Paddles.log`.
    pub fn for_term(directory: &Path, term: &str, separator: &str) -> Self {
        let file_name = format!("{}.log", normalize_term(term, separator));
        Self::new(term, directory.join(file_name))
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far
    pub fn entries_written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.lock().as_deref(), Ok(Stream::Closed))
    }

    /// Appends one entry at the event's default level
    pub fn append(&self, event: LogEvent) -> Result<(), LoggerError> {
        let level = event.level();
        self.append_at(level, event)
    }

    /// Appends one entry at an explicit level
    pub fn append_at(&self, level: LogLevel, event: LogEvent) -> Result<(), LoggerError> {
        let entry = Entry {
            timestamp: Utc::now(),
            level,
            term: &self.term,
            event: &event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut stream = self.lock()?;
        if let Stream::Unopened = *stream {
            *stream = Stream::Open(self.open()?);
        }
        let Stream::Open(file) = &mut *stream else {
            return Err(LoggerError::Closed(self.path.display().to_string()));
        };
        file.write_all(line.as_bytes())
            .map_err(|source| self.io_error(source))?;

        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Appends an entry, reporting failures through tracing instead of returning them
    ///
    /// A broken log file must not fail the fetch that tried to record itself.
    pub fn record(&self, event: LogEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(term = %self.term, "Failed to append task log entry: {}", e);
        }
    }

    /// Flushes and closes the stream
    ///
    /// Closing a logger that never opened still marks it closed. A second
    /// close is an error.
    pub fn close(&self) -> Result<(), LoggerError> {
        let mut stream = self.lock()?;
        match std::mem::replace(&mut *stream, Stream::Closed) {
            Stream::Open(mut file) => {
                file.flush().map_err(|source| self.io_error(source))?;
                file.sync_all().map_err(|source| self.io_error(source))?;
                Ok(())
            }
            Stream::Unopened => Ok(()),
            Stream::Closed => Err(LoggerError::Closed(self.path.display().to_string())),
        }
    }

    fn open(&self) -> Result<File, LoggerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        tracing::debug!("Opening task log {}", self.path.display());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Stream>, LoggerError> {
        self.stream
            .lock()
            .map_err(|_| LoggerError::Poisoned(self.path.display().to_string()))
    }

    fn io_error(&self, source: std::io::Error) -> LoggerError {
        LoggerError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Reads back every entry of a task log
pub fn read_log(path: &Path) -> Result<Vec<serde_json::Value>, LoggerError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoggerError::Io {
        path: path.display().to_string(),
        source,
    })?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(LoggerError::from))
        .collect()
}
