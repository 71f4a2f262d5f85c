use serde::Serialize;

/// Severity of a task log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Everything a task log can record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    TaskStarted,
    Discovered {
        count: usize,
    },
    DiscoveryFailed {
        cause: String,
        attempts: u32,
    },
    DiscoveryCancelled {
        attempts: u32,
    },
    Attempt {
        unit_id: String,
        attempt: u32,
        outcome: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    RetryScheduled {
        unit_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    UnitFinished {
        unit_id: String,
        result: &'static str,
        attempts: u32,
    },
    BatchAborted {
        cause: String,
    },
    Enrichment {
        unit_id: String,
        result: &'static str,
    },
    NormalizeFailed {
        index: usize,
        cause: String,
    },
    BatchWritten {
        records: usize,
        artifact: String,
    },
    SinkFailed {
        cause: String,
    },
    Summary {
        discovered: usize,
        succeeded: usize,
        exhausted: usize,
        cancelled: usize,
        duplicates: usize,
        written: usize,
    },
}

impl LogEvent {
    /// Default severity for the event
    pub fn level(&self) -> LogLevel {
        match self {
            Self::DiscoveryFailed { .. } | Self::BatchAborted { .. } | Self::SinkFailed { .. } => {
                LogLevel::Error
            }
            Self::RetryScheduled { .. } | Self::NormalizeFailed { .. } => LogLevel::Warn,
            Self::Attempt { cause, .. } if cause.is_some() => LogLevel::Warn,
            Self::UnitFinished { result, .. } if *result != "succeeded" => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}
