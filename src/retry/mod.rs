//! Retry policy and the per-unit retry state machine

mod executor;
mod policy;

pub use executor::{FetchAttempt, FetchResult, RetryExecutor};
pub use policy::RetryPolicy;
