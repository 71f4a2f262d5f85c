//! Fetch units, outcomes, and the clients that produce them
//!
//! A [`FetchClient`] performs exactly one network call per invocation and
//! reports a typed [`FetchOutcome`]; it never retries on its own. Retrying is
//! the job of [`crate::retry::RetryExecutor`].

mod completion;
mod product;

pub use completion::{CompletenessCheck, CompletionClient, MinimumContent, PromptedCompletions};
pub use product::{build_http_client, ProductApiClient};

use crate::record::Record;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// The smallest retryable piece of work: one identifier to resolve
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchUnit {
    pub id: String,
    pub parent_term: String,
}

impl FetchUnit {
    pub fn new(id: impl Into<String>, parent_term: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_term: parent_term.into(),
        }
    }
}

/// Why a single call failed
///
/// Transient causes are retried by the executor; everything else is fatal for
/// the unit that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream server error (HTTP {status})")]
    Server { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("incomplete response: {0}")]
    Incomplete(String),

    #[error("credentials rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("request rejected (HTTP {status})")]
    Client { status: u16 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response has no '{0}' payload")]
    MissingPayload(String),
}

impl FetchFailure {
    /// Returns true if another attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimited
                | Self::Server { .. }
                | Self::Network(_)
                | Self::Incomplete(_)
        )
    }

    /// Returns true if the failure means the configured credentials are bad
    ///
    /// Such a failure will repeat for every other unit of the batch too.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Maps a non-success HTTP status to a failure, or `None` for 2xx
    pub fn from_status(status: StatusCode) -> Option<Self> {
        let code = status.as_u16();
        if status.is_success() {
            None
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(Self::RateLimited)
        } else if status == StatusCode::REQUEST_TIMEOUT {
            Some(Self::Timeout)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Some(Self::Unauthorized { status: code })
        } else if status.is_server_error() {
            Some(Self::Server { status: code })
        } else {
            Some(Self::Client { status: code })
        }
    }

    /// Classifies a transport-level error from the HTTP client
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::from_status(status).unwrap_or_else(|| Self::Network(err.to_string()))
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if err.is_builder() {
            Self::Client { status: 0 }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Record),
    Transient(FetchFailure),
    Fatal(FetchFailure),
}

impl FetchOutcome {
    /// Wraps a failure in the outcome its kind calls for
    pub fn failed(failure: FetchFailure) -> Self {
        if failure.is_transient() {
            Self::Transient(failure)
        } else {
            Self::Fatal(failure)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Transient(_) => "transient_error",
            Self::Fatal(_) => "fatal_error",
        }
    }
}

impl From<Result<Record, FetchFailure>> for FetchOutcome {
    fn from(result: Result<Record, FetchFailure>) -> Self {
        match result {
            Ok(record) => Self::Success(record),
            Err(failure) => Self::failed(failure),
        }
    }
}

/// Performs one network call for one unit of work
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Fetches `unit`; `attempt` starts at 1 and is informational
    async fn fetch(&self, unit: &FetchUnit, attempt: u32) -> FetchOutcome;
}

/// Turns a search term into the identifiers to fetch
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Returns identifiers in discovery order with empty ones removed
    async fn discover(&self, term: &str) -> Result<Vec<String>, FetchFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(FetchFailure::from_status(StatusCode::OK), None);
        assert_eq!(
            FetchFailure::from_status(StatusCode::TOO_MANY_REQUESTS),
            Some(FetchFailure::RateLimited)
        );
        assert_eq!(
            FetchFailure::from_status(StatusCode::BAD_GATEWAY),
            Some(FetchFailure::Server { status: 502 })
        );
        assert_eq!(
            FetchFailure::from_status(StatusCode::UNAUTHORIZED),
            Some(FetchFailure::Unauthorized { status: 401 })
        );
        assert_eq!(
            FetchFailure::from_status(StatusCode::NOT_FOUND),
            Some(FetchFailure::Client { status: 404 })
        );
    }

    #[test]
    fn test_transient_taxonomy() {
        assert!(FetchFailure::Timeout.is_transient());
        assert!(FetchFailure::RateLimited.is_transient());
        assert!(FetchFailure::Server { status: 503 }.is_transient());
        assert!(FetchFailure::Incomplete("short".into()).is_transient());

        assert!(!FetchFailure::Unauthorized { status: 403 }.is_transient());
        assert!(!FetchFailure::Client { status: 400 }.is_transient());
        assert!(!FetchFailure::Malformed("eof".into()).is_transient());
        assert!(!FetchFailure::MissingPayload("product".into()).is_transient());
    }

    #[test]
    fn test_outcome_from_failure() {
        assert!(matches!(
            FetchOutcome::failed(FetchFailure::RateLimited),
            FetchOutcome::Transient(_)
        ));
        assert!(matches!(
            FetchOutcome::failed(FetchFailure::Client { status: 400 }),
            FetchOutcome::Fatal(_)
        ));
        assert_eq!(FetchOutcome::failed(FetchFailure::Timeout).kind(), "transient_error");
    }
}
